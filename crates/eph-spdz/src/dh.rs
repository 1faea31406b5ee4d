//! Distributed Diffie-Hellman shares on P-256.
//!
//! Each peer holds a scalar `αᵢ ∈ [1, n-1]` and publishes `αᵢ·G`; the
//! combined server public key is the point sum of the published shares. On
//! receiving the client's `β·G`, a peer computes its partial `αᵢ·(β·G)`,
//! whose affine coordinates feed the SPDZ point addition.
//!
//! Points travel SEC1-uncompressed (65 bytes, `0x04 ∥ x ∥ y`).

use num_bigint::BigUint;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{AffinePoint, EncodedPoint, NonZeroScalar, ProjectivePoint};
use rand::rngs::OsRng;

use crate::error::SpdzError;

/// One peer's DH share.
pub struct DhPeer {
    pub name: String,
    scalar: NonZeroScalar,
    public: ProjectivePoint,
}

impl DhPeer {
    /// Sample a fresh scalar in `[1, n-1]` and its public point.
    pub fn generate(name: &str) -> DhPeer {
        let scalar = NonZeroScalar::random(&mut OsRng);
        let public = ProjectivePoint::GENERATOR * *scalar;
        DhPeer {
            name: name.to_string(),
            scalar,
            public,
        }
    }

    /// SEC1-uncompressed encoding of `αᵢ·G`.
    pub fn public_bytes(&self) -> Vec<u8> {
        encode_point(&self.public)
    }

    /// The partial `αᵢ·(β·G)` for a peer-supplied public point.
    pub fn partial(&self, peer_point: &[u8]) -> Result<ProjectivePoint, SpdzError> {
        let beta_g = decode_point(peer_point)?;
        Ok(beta_g * *self.scalar)
    }
}

/// Sum a list of SEC1-encoded public shares into the combined key.
pub fn combine(shares: &[&[u8]]) -> Result<Vec<u8>, SpdzError> {
    let mut sum = ProjectivePoint::IDENTITY;
    for s in shares {
        sum += decode_point(s)?;
    }
    if sum == ProjectivePoint::IDENTITY {
        return Err(SpdzError::Point("combined key is the identity".to_string()));
    }
    Ok(encode_point(&sum))
}

/// Decode a SEC1 point, rejecting off-curve encodings.
pub fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint, SpdzError> {
    let encoded = EncodedPoint::from_bytes(bytes)
        .map_err(|e| SpdzError::Point(format!("sec1: {}", e)))?;
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    affine
        .map(ProjectivePoint::from)
        .ok_or_else(|| SpdzError::Point("not on curve".to_string()))
}

/// SEC1-uncompressed encoding.
pub fn encode_point(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(false).as_bytes().to_vec()
}

/// Affine coordinates of a point as base-field residues.
pub fn point_coords(point: &ProjectivePoint) -> Result<(BigUint, BigUint), SpdzError> {
    let encoded = point.to_affine().to_encoded_point(false);
    let x = encoded
        .x()
        .ok_or_else(|| SpdzError::Point("identity has no coordinates".to_string()))?;
    let y = encoded
        .y()
        .ok_or_else(|| SpdzError::Point("identity has no coordinates".to_string()))?;
    Ok((
        BigUint::from_bytes_be(x.as_slice()),
        BigUint::from_bytes_be(y.as_slice()),
    ))
}
