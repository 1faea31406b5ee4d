//! Canonical residue arithmetic mod the P-256 base prime.
//!
//! All values handed between the session operations live in `[0, p)`.
//! Subtraction adds `p` before reducing so negative intermediates never
//! appear; serialization is always 32-byte big-endian.

use std::sync::OnceLock;

use num_bigint::BigUint;
use num_traits::Zero;
use rand::RngCore;

/// Base-field prime of secp256r1:
/// `2^256 - 2^224 + 2^192 + 2^96 - 1`.
const P256_PRIME_HEX: &[u8] =
    b"ffffffff00000001000000000000000000000000ffffffffffffffffffffffff";

/// The field modulus `p`.
pub fn modulus() -> &'static BigUint {
    static P: OnceLock<BigUint> = OnceLock::new();
    P.get_or_init(|| BigUint::parse_bytes(P256_PRIME_HEX, 16).expect("prime literal"))
}

/// Reduce an arbitrary big-endian byte string into `[0, p)`.
pub fn from_bytes(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes) % modulus()
}

/// Canonical 32-byte big-endian serialization.
pub fn to_bytes32(v: &BigUint) -> [u8; 32] {
    let raw = v.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - raw.len()..].copy_from_slice(&raw);
    out
}

pub fn add(a: &BigUint, b: &BigUint) -> BigUint {
    (a + b) % modulus()
}

/// `a - b mod p`; `p` is added first so the subtraction never underflows.
pub fn sub(a: &BigUint, b: &BigUint) -> BigUint {
    ((a + modulus()) - (b % modulus())) % modulus()
}

pub fn mul(a: &BigUint, b: &BigUint) -> BigUint {
    (a * b) % modulus()
}

/// A uniformly random residue. Sampled with 64 spare bits so the single
/// reduction leaves no usable bias.
pub fn random(rng: &mut impl RngCore) -> BigUint {
    let mut buf = [0u8; 40];
    rng.fill_bytes(&mut buf);
    BigUint::from_bytes_be(&buf) % modulus()
}

/// True if `v` is the canonical zero residue.
pub fn is_zero(v: &BigUint) -> bool {
    v.is_zero()
}
