//! Beaver triples and the dealer supply.
//!
//! A triple is an additive sharing of `(a, b, c)` with `a·b ≡ c (mod p)`.
//! Each multiplication consumes exactly one; a [`TripleSupply`] is budgeted
//! ahead of an operation, and running dry mid-operation is fatal.
//!
//! `exchange` realizes the one-sided dealer: peer 0 samples the triples and
//! ships peer 1's halves over the channel in a single frame. An OT/VOLE
//! triple generator that hides the factors from both parties plugs in behind
//! the same supply type.

use std::collections::VecDeque;
use std::io::{Read, Write};

use eph_common::Role;
use eph_wire::FramedChannel;
use num_bigint::BigUint;
use rand::RngCore;

use crate::error::SpdzError;
use crate::field;

/// This party's share of one Beaver triple.
#[derive(Debug, Clone)]
pub struct Triple {
    pub a: BigUint,
    pub b: BigUint,
    pub c: BigUint,
}

/// A budgeted queue of triples.
pub struct TripleSupply {
    queue: VecDeque<Triple>,
}

impl TripleSupply {
    pub fn new(triples: Vec<Triple>) -> TripleSupply {
        TripleSupply {
            queue: triples.into(),
        }
    }

    /// An empty supply; any multiplication against it fails.
    pub fn empty() -> TripleSupply {
        TripleSupply {
            queue: VecDeque::new(),
        }
    }

    pub fn take(&mut self) -> Result<Triple, SpdzError> {
        self.queue.pop_front().ok_or(SpdzError::TriplesExhausted)
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

/// Deal `n` correlated triples locally, returning the two parties' share
/// vectors. Used by in-process tests and by the sending side of `exchange`.
pub fn deal(n: usize, rng: &mut impl RngCore) -> (Vec<Triple>, Vec<Triple>) {
    let mut side0 = Vec::with_capacity(n);
    let mut side1 = Vec::with_capacity(n);
    for _ in 0..n {
        let a = field::random(rng);
        let b = field::random(rng);
        let c = field::mul(&a, &b);

        let a0 = field::random(rng);
        let b0 = field::random(rng);
        let c0 = field::random(rng);
        let a1 = field::sub(&a, &a0);
        let b1 = field::sub(&b, &b0);
        let c1 = field::sub(&c, &c0);

        side0.push(Triple {
            a: a0,
            b: b0,
            c: c0,
        });
        side1.push(Triple {
            a: a1,
            b: b1,
            c: c1,
        });
    }
    (side0, side1)
}

/// One-sided dealer exchange: the garbler samples `n` triples and sends the
/// evaluator's shares across the channel; both sides end up with matching
/// supplies.
pub fn exchange<S: Read + Write>(
    role: Role,
    chan: &mut FramedChannel<S>,
    n: usize,
    rng: &mut impl RngCore,
) -> Result<TripleSupply, SpdzError> {
    match role {
        Role::Garbler => {
            let (mine, theirs) = deal(n, rng);
            let mut payload = Vec::with_capacity(n * 96);
            for t in &theirs {
                payload.extend_from_slice(&field::to_bytes32(&t.a));
                payload.extend_from_slice(&field::to_bytes32(&t.b));
                payload.extend_from_slice(&field::to_bytes32(&t.c));
            }
            chan.send_bytes(&payload)?;
            chan.flush()?;
            Ok(TripleSupply::new(mine))
        }
        Role::Evaluator => {
            let payload = chan.recv_bytes()?;
            if payload.len() != n * 96 {
                return Err(SpdzError::Point(format!(
                    "triple payload is {} bytes, expected {}",
                    payload.len(),
                    n * 96
                )));
            }
            let mut triples = Vec::with_capacity(n);
            for chunk in payload.chunks_exact(96) {
                triples.push(Triple {
                    a: field::from_bytes(&chunk[0..32]),
                    b: field::from_bytes(&chunk[32..64]),
                    c: field::from_bytes(&chunk[64..96]),
                });
            }
            Ok(TripleSupply::new(triples))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dealt_triples_reconstruct() {
        let mut rng = rand::thread_rng();
        let (s0, s1) = deal(8, &mut rng);
        for (t0, t1) in s0.iter().zip(&s1) {
            let a = field::add(&t0.a, &t1.a);
            let b = field::add(&t0.b, &t1.b);
            let c = field::add(&t0.c, &t1.c);
            assert_eq!(field::mul(&a, &b), c);
        }
    }

    #[test]
    fn test_supply_exhaustion_is_an_error() {
        let mut rng = rand::thread_rng();
        let (s0, _) = deal(2, &mut rng);
        let mut supply = TripleSupply::new(s0);
        assert!(supply.take().is_ok());
        assert!(supply.take().is_ok());
        assert!(matches!(
            supply.take(),
            Err(SpdzError::TriplesExhausted)
        ));
    }

    #[test]
    fn test_exchange_matches_across_peers() {
        use eph_wire::duplex_pair;

        let (a, b) = duplex_pair();
        let peer = std::thread::spawn(move || {
            let mut chan = FramedChannel::new(b);
            let mut rng = rand::thread_rng();
            exchange(Role::Evaluator, &mut chan, 4, &mut rng).unwrap()
        });

        let mut chan = FramedChannel::new(a);
        let mut rng = rand::thread_rng();
        let mut mine = exchange(Role::Garbler, &mut chan, 4, &mut rng).unwrap();
        let mut theirs = peer.join().unwrap();

        for _ in 0..4 {
            let t0 = mine.take().unwrap();
            let t1 = theirs.take().unwrap();
            let a = field::add(&t0.a, &t1.a);
            let b = field::add(&t0.b, &t1.b);
            let c = field::add(&t0.c, &t1.c);
            assert_eq!(field::mul(&a, &b), c);
        }
    }
}
