//! Encrypted-file header and per-block AEAD framing.
//!
//! ## Header Layout (28 bytes)
//!
//! - bytes 0..3: magic `45 46 4D 01`
//! - bytes 4..5: block size (u16, big-endian)
//! - byte 6: algorithm id
//! - byte 7: flags
//! - bytes 8..15: plaintext size (u64, big-endian)
//! - bytes 16..27: random 96-bit nonce
//!
//! Per-block nonce: header nonce XOR the block index (u64, big-endian,
//! zero-extended into the low 8 bytes). AAD: 14 bytes =
//! `u32 block_index ∥ u64 plain_size ∥ u16 flags`.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, KeyInit};

pub const ENC_MAGIC: [u8; 4] = [0x45, 0x46, 0x4d, 0x01];
pub const HEADER_LEN: usize = 28;

pub const ALGO_AES_128_GCM: u8 = 1;
pub const ALGO_CHACHA20_POLY1305: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncHeader {
    pub block_size: u16,
    pub algo: u8,
    pub flags: u8,
    pub plain_size: u64,
    pub nonce: [u8; 12],
}

impl EncHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&ENC_MAGIC);
        out[4..6].copy_from_slice(&self.block_size.to_be_bytes());
        out[6] = self.algo;
        out[7] = self.flags;
        out[8..16].copy_from_slice(&self.plain_size.to_be_bytes());
        out[16..28].copy_from_slice(&self.nonce);
        out
    }

    pub fn parse(raw: &[u8]) -> Option<EncHeader> {
        if raw.len() < HEADER_LEN || raw[0..4] != ENC_MAGIC {
            return None;
        }
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&raw[16..28]);
        Some(EncHeader {
            block_size: u16::from_be_bytes([raw[4], raw[5]]),
            algo: raw[6],
            flags: raw[7],
            plain_size: u64::from_be_bytes(raw[8..16].try_into().unwrap()),
            nonce,
        })
    }

    /// Header nonce XOR the zero-extended block index.
    pub fn block_nonce(&self, index: u64) -> [u8; 12] {
        let mut nonce = self.nonce;
        for (i, b) in index.to_be_bytes().iter().enumerate() {
            nonce[4 + i] ^= b;
        }
        nonce
    }

    /// `u32 block_index ∥ u64 plain_size ∥ u16 flags`.
    pub fn block_aad(&self, index: u32) -> [u8; 14] {
        let mut aad = [0u8; 14];
        aad[0..4].copy_from_slice(&index.to_be_bytes());
        aad[4..12].copy_from_slice(&self.plain_size.to_be_bytes());
        aad[12..14].copy_from_slice(&(self.flags as u16).to_be_bytes());
        aad
    }
}

/// Encrypt one block under the header's framing.
pub fn seal_block(
    key: &[u8],
    header: &EncHeader,
    index: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, String> {
    if header.algo != ALGO_AES_128_GCM {
        return Err(format!("unsupported algorithm {}", header.algo));
    }
    let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| "bad key length".to_string())?;
    let nonce = header.block_nonce(index);
    let aad = header.block_aad(index as u32);
    cipher
        .encrypt(
            aes_gcm::Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| "encrypt failed".to_string())
}

/// Decrypt one block under the header's framing.
pub fn open_block(
    key: &[u8],
    header: &EncHeader,
    index: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>, String> {
    if header.algo != ALGO_AES_128_GCM {
        return Err(format!("unsupported algorithm {}", header.algo));
    }
    let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| "bad key length".to_string())?;
    let nonce = header.block_nonce(index);
    let aad = header.block_aad(index as u32);
    cipher
        .decrypt(
            aes_gcm::Nonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| "bad block mac".to_string())
}
