//! Two-party SPDZ session.
//!
//! A session borrows the process's framed channel and a triple supply and
//! offers the share-level operations: `input`, `add`, `sub`, `mul`, `open`,
//! `exp_public`, `inv` and `point_add`.
//!
//! ## Opening discipline
//!
//! Every opening is a single two-message round. The garbler (peer 0) always
//! sends first and then receives; the evaluator receives first and then
//! sends. The fixed order makes the rounds deadlock-free without relying on
//! transport buffering.

use std::io::{Read, Write};

use eph_common::Role;
use eph_wire::FramedChannel;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::RngCore;

use crate::error::SpdzError;
use crate::field;
use crate::triple::TripleSupply;

pub struct Session<'a, S> {
    role: Role,
    chan: &'a mut FramedChannel<S>,
    triples: TripleSupply,
}

impl<'a, S: Read + Write> Session<'a, S> {
    pub fn new(role: Role, chan: &'a mut FramedChannel<S>, triples: TripleSupply) -> Self {
        Session {
            role,
            chan,
            triples,
        }
    }

    pub fn triples_remaining(&self) -> usize {
        self.triples.remaining()
    }

    // ── Share constructors ─────────────────────────────────────────────

    /// Share a value this party owns: mask with fresh `r`, send `v - r`,
    /// keep `r` as the local share.
    pub fn input_owned(
        &mut self,
        v: &BigUint,
        rng: &mut impl RngCore,
    ) -> Result<BigUint, SpdzError> {
        let v = v % field::modulus();
        let r = field::random(rng);
        let masked = field::sub(&v, &r);
        self.chan.send_bytes(&field::to_bytes32(&masked))?;
        self.chan.flush()?;
        Ok(r)
    }

    /// Receive the masked value for a share the peer owns.
    pub fn input_peer(&mut self) -> Result<BigUint, SpdzError> {
        let masked = self.chan.recv_bytes()?;
        Ok(field::from_bytes(&masked))
    }

    /// Additively encode a public constant: peer 0 holds the value, peer 1
    /// holds zero.
    pub fn constant(&self, v: &BigUint) -> BigUint {
        if self.role.index() == 0 {
            v % field::modulus()
        } else {
            BigUint::zero()
        }
    }

    // ── Linear operations (local) ──────────────────────────────────────

    pub fn add(&self, a: &BigUint, b: &BigUint) -> BigUint {
        field::add(a, b)
    }

    pub fn sub(&self, a: &BigUint, b: &BigUint) -> BigUint {
        field::sub(a, b)
    }

    // ── Openings ───────────────────────────────────────────────────────

    /// Open a batch of shares: exchange local shares in one frame each way
    /// and return the reconstructed public values.
    pub fn open_batch(&mut self, shares: &[BigUint]) -> Result<Vec<BigUint>, SpdzError> {
        let peer = self.swap(shares)?;
        Ok(shares
            .iter()
            .zip(&peer)
            .map(|(mine, theirs)| field::add(mine, theirs))
            .collect())
    }

    pub fn open(&mut self, share: &BigUint) -> Result<BigUint, SpdzError> {
        Ok(self.open_batch(std::slice::from_ref(share))?.remove(0))
    }

    /// Role-ordered exchange of an equal-length share vector.
    fn swap(&mut self, vals: &[BigUint]) -> Result<Vec<BigUint>, SpdzError> {
        let mut payload = Vec::with_capacity(vals.len() * 32);
        for v in vals {
            payload.extend_from_slice(&field::to_bytes32(v));
        }

        let theirs = if self.role.index() == 0 {
            self.chan.send_bytes(&payload)?;
            self.chan.flush()?;
            self.chan.recv_bytes()?
        } else {
            let theirs = self.chan.recv_bytes()?;
            self.chan.send_bytes(&payload)?;
            self.chan.flush()?;
            theirs
        };

        if theirs.len() != payload.len() {
            return Err(SpdzError::Point(format!(
                "opening size mismatch: sent {}, received {}",
                payload.len(),
                theirs.len()
            )));
        }
        Ok(theirs.chunks_exact(32).map(field::from_bytes).collect())
    }

    // ── Multiplication ─────────────────────────────────────────────────

    /// Beaver multiplication: open `d = a - A` and `e = b - B` in one round,
    /// then `z = C + d·B + e·A (+ d·e on peer 0)`.
    pub fn mul(&mut self, a: &BigUint, b: &BigUint) -> Result<BigUint, SpdzError> {
        let t = self.triples.take()?;
        let d_share = field::sub(a, &t.a);
        let e_share = field::sub(b, &t.b);

        let opened = self.open_batch(&[d_share, e_share])?;
        let d = &opened[0];
        let e = &opened[1];

        let mut z = field::add(
            &t.c,
            &field::add(&field::mul(d, &t.b), &field::mul(e, &t.a)),
        );
        if self.role.index() == 0 {
            z = field::add(&z, &field::mul(d, e));
        }
        Ok(z)
    }

    // ── Exponentiation ─────────────────────────────────────────────────

    /// `a^k` for public `k`, square-and-multiply MSB first. The accumulator
    /// starts at the additive encoding of 1.
    pub fn exp_public(&mut self, a: &BigUint, k: &BigUint) -> Result<BigUint, SpdzError> {
        let mut acc = self.constant(&BigUint::one());
        if k.is_zero() {
            return Ok(acc);
        }
        for byte in k.to_bytes_be() {
            for bit in (0..8).rev() {
                acc = self.mul(&acc, &acc)?;
                if (byte >> bit) & 1 == 1 {
                    acc = self.mul(&acc, a)?;
                }
            }
        }
        Ok(acc)
    }

    /// Fermat inversion: `a^(p-2)`.
    pub fn inv(&mut self, a: &BigUint) -> Result<BigUint, SpdzError> {
        let exp = field::modulus() - BigUint::from(2u32);
        self.exp_public(a, &exp)
    }

    // ── Point addition ─────────────────────────────────────────────────

    /// Affine addition of two shared, distinct, non-inverse points:
    /// `λ = (y2-y1)/(x2-x1)`, `x3 = λ² - x1 - x2`, `y3 = λ(x1-x3) - y1`.
    pub fn point_add(
        &mut self,
        p1: (&BigUint, &BigUint),
        p2: (&BigUint, &BigUint),
    ) -> Result<(BigUint, BigUint), SpdzError> {
        let (x1, y1) = p1;
        let (x2, y2) = p2;

        let dx = self.sub(x2, x1);
        let dy = self.sub(y2, y1);
        let dx_inv = self.inv(&dx)?;
        let lambda = self.mul(&dy, &dx_inv)?;

        let lambda_sq = self.mul(&lambda, &lambda)?;
        let x3 = self.sub(&self.sub(&lambda_sq, x1), x2);

        let rise = self.sub(x1, &x3);
        let y3_t = self.mul(&lambda, &rise)?;
        let y3 = self.sub(&y3_t, y1);

        Ok((x3, y3))
    }
}
