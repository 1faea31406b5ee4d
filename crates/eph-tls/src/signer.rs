//! CertificateVerify signing seam.
//!
//! In production the signature is produced by the threshold-ECDSA
//! collaborator: both peers hold shares of the certificate key and jointly
//! sign the transcript digest. That whole machinery sits behind
//! [`TranscriptSigner`]; [`LocalSigner`] is the single-party stand-in used
//! by tests and the CLI. ECDSA here is RFC 6979 deterministic, so mirrored
//! signers with the same key produce identical signatures on both peers.

use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::TlsError;
use crate::hs::SIG_ECDSA_SECP256R1_SHA256;

pub trait TranscriptSigner: Send + Sync {
    /// Signature scheme advertised in CertificateVerify.
    fn scheme(&self) -> u16 {
        SIG_ECDSA_SECP256R1_SHA256
    }

    /// Sign the RFC 8446 §4.4.3 content string, returning a DER signature.
    fn sign(&self, content: &[u8]) -> Result<Vec<u8>, TlsError>;
}

/// Single-party ECDSA P-256 signer.
pub struct LocalSigner {
    key: SigningKey,
}

impl LocalSigner {
    pub fn new(key: SigningKey) -> LocalSigner {
        LocalSigner { key }
    }

    pub fn generate() -> LocalSigner {
        LocalSigner {
            key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<LocalSigner, TlsError> {
        let key = SigningKey::from_slice(bytes)
            .map_err(|e| TlsError::Decode(format!("signing key: {}", e)))?;
        Ok(LocalSigner { key })
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.key.verifying_key()
    }
}

impl TranscriptSigner for LocalSigner {
    fn sign(&self, content: &[u8]) -> Result<Vec<u8>, TlsError> {
        let sig: Signature = self.key.sign(content);
        Ok(sig.to_der().as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;

    #[test]
    fn test_signature_verifies() {
        let signer = LocalSigner::generate();
        let sig_der = signer.sign(b"transcript content").unwrap();
        let sig = Signature::from_der(&sig_der).unwrap();
        signer
            .verifying_key()
            .verify(b"transcript content", &sig)
            .unwrap();
    }

    #[test]
    fn test_mirrored_signers_agree() {
        // RFC 6979: same key and message means byte-identical signatures,
        // which keeps the two peers' transcripts in lockstep.
        let signer = LocalSigner::generate();
        let twin = LocalSigner::from_bytes(signer.key.to_bytes().as_slice()).unwrap();
        assert_eq!(
            signer.sign(b"same content").unwrap(),
            twin.sign(b"same content").unwrap()
        );
    }

    #[test]
    fn test_default_scheme() {
        let signer = LocalSigner::generate();
        assert_eq!(signer.scheme(), SIG_ECDSA_SECP256R1_SHA256);
    }
}
