//! Two-party SPDZ arithmetic over the P-256 base field.
//!
//! Values are additively shared residues mod the curve's base prime `p`:
//! `v = v0 + v1 (mod p)` where peer 0 is the garbler and peer 1 the
//! evaluator. Linear operations are local; multiplication consumes one
//! Beaver triple and a single two-message opening round; inversion is
//! Fermat exponentiation; `point_add` runs the affine chord formula on
//! shared coordinates.
//!
//! The protocol here is semi-honest: no MACs, no triple sacrifice. Triples
//! come from a one-sided dealer ([`triple::exchange`]) or any other source
//! feeding a [`triple::TripleSupply`]; running out mid-operation is fatal.

pub mod dh;
pub mod error;
pub mod field;
pub mod session;
pub mod triple;

pub use dh::DhPeer;
pub use error::SpdzError;
pub use session::Session;
pub use triple::{Triple, TripleSupply};
