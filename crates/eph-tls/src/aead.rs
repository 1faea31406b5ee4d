//! AEAD record protection.
//!
//! The per-record nonce is the static IV XOR the big-endian sequence
//! counter; additional data is the 5-byte record header with the outer type
//! `application_data` and the ciphertext length; the inner plaintext carries
//! the true content type as its last non-zero byte, with optional zero
//! padding after it.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, KeyInit};
#[cfg(feature = "chacha")]
use chacha20poly1305::ChaCha20Poly1305;

use crate::alert::AlertDesc;
use crate::error::TlsError;
use crate::record::{ContentType, MAX_RECORD_PAYLOAD};

const TAG_LEN: usize = 16;

/// Negotiable cipher suites. The hash is SHA-256 for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    Aes128GcmSha256,
    #[cfg(feature = "chacha")]
    ChaCha20Poly1305Sha256,
}

impl Suite {
    pub fn id(self) -> u16 {
        match self {
            Suite::Aes128GcmSha256 => crate::hs::SUITE_AES_128_GCM_SHA256,
            #[cfg(feature = "chacha")]
            Suite::ChaCha20Poly1305Sha256 => crate::hs::SUITE_CHACHA20_POLY1305_SHA256,
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            Suite::Aes128GcmSha256 => 16,
            #[cfg(feature = "chacha")]
            Suite::ChaCha20Poly1305Sha256 => 32,
        }
    }
}

/// One direction of record protection with its sequence counter.
pub struct RecordCipher {
    suite: Suite,
    key: Vec<u8>,
    iv: [u8; 12],
    seq: u64,
}

impl RecordCipher {
    pub fn new(suite: Suite, key: &[u8], iv: [u8; 12]) -> RecordCipher {
        RecordCipher {
            suite,
            key: key.to_vec(),
            iv,
            seq: 0,
        }
    }

    fn nonce(&self) -> [u8; 12] {
        let mut nonce = self.iv;
        for (i, b) in self.seq.to_be_bytes().iter().enumerate() {
            nonce[4 + i] ^= b;
        }
        nonce
    }

    fn header(len: usize) -> [u8; 5] {
        let mut h = [0u8; 5];
        h[0] = ContentType::ApplicationData as u8;
        h[1..3].copy_from_slice(&0x0303u16.to_be_bytes());
        h[3..5].copy_from_slice(&(len as u16).to_be_bytes());
        h
    }

    fn run(&self, nonce: &[u8; 12], msg: &[u8], aad: &[u8], seal: bool) -> Result<Vec<u8>, ()> {
        let payload = Payload { msg, aad };
        match self.suite {
            Suite::Aes128GcmSha256 => {
                let cipher = Aes128Gcm::new_from_slice(&self.key).map_err(|_| ())?;
                let nonce = aes_gcm::Nonce::from_slice(nonce);
                if seal {
                    cipher.encrypt(nonce, payload).map_err(|_| ())
                } else {
                    cipher.decrypt(nonce, payload).map_err(|_| ())
                }
            }
            #[cfg(feature = "chacha")]
            Suite::ChaCha20Poly1305Sha256 => {
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key).map_err(|_| ())?;
                let nonce = chacha20poly1305::Nonce::from_slice(nonce);
                if seal {
                    cipher.encrypt(nonce, payload).map_err(|_| ())
                } else {
                    cipher.decrypt(nonce, payload).map_err(|_| ())
                }
            }
        }
    }

    /// Protect one record; returns the ciphertext record payload.
    pub fn seal(&mut self, inner_type: ContentType, plaintext: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut inner = Vec::with_capacity(plaintext.len() + 1);
        inner.extend_from_slice(plaintext);
        inner.push(inner_type as u8);

        let ct_len = inner.len() + TAG_LEN;
        if ct_len > MAX_RECORD_PAYLOAD {
            return Err(TlsError::alert(AlertDesc::RecordOverflow));
        }
        let aad = Self::header(ct_len);
        let nonce = self.nonce();
        let ct = self
            .run(&nonce, &inner, &aad, true)
            .map_err(|_| TlsError::alert(AlertDesc::InternalError))?;
        self.seq += 1;
        Ok(ct)
    }

    /// Unprotect one record payload; returns the true content type and the
    /// plaintext with padding stripped.
    pub fn open(&mut self, payload: &[u8]) -> Result<(ContentType, Vec<u8>), TlsError> {
        let aad = Self::header(payload.len());
        let nonce = self.nonce();
        let mut inner = self
            .run(&nonce, payload, &aad, false)
            .map_err(|_| TlsError::alert(AlertDesc::BadRecordMac))?;
        self.seq += 1;

        // Strip zero padding, then the trailing content-type byte.
        while inner.last() == Some(&0) {
            inner.pop();
        }
        let ct_byte = inner
            .pop()
            .ok_or_else(|| TlsError::alert(AlertDesc::DecodeError))?;
        let ct = ContentType::from_u8(ct_byte)
            .ok_or_else(|| TlsError::alert(AlertDesc::DecodeError))?;
        Ok((ct, inner))
    }
}
