//! Encrypted-filesystem import/export.
//!
//! Files on the encrypted FS are the 28-byte header followed by one AEAD
//! ciphertext per `block_size` plaintext chunk. The tool reconstructs the
//! symmetric key from the two vault shares; the kernel itself never does --
//! reconstruction is an offline operator action.

use std::fs;
use std::path::Path;

use eph_common::Role;
use eph_kernel::encfile::{open_block, seal_block, EncHeader, ALGO_AES_128_GCM, HEADER_LEN};
use eph_kernel::vault::{share_path, xor_combine};
use rand::RngCore;

/// Ciphertext block length for a given header.
fn sealed_len(block_size: u16) -> usize {
    block_size as usize + 16
}

/// Load and XOR both vault shares of a symmetric key.
pub fn load_key(vault_prefix: &Path, name: &str) -> Result<Vec<u8>, String> {
    let g = fs::read(share_path(vault_prefix, Role::Garbler, name))
        .map_err(|e| format!("garbler share: {}", e))?;
    let e = fs::read(share_path(vault_prefix, Role::Evaluator, name))
        .map_err(|e| format!("evaluator share: {}", e))?;
    if g.len() != e.len() {
        return Err("share length mismatch".to_string());
    }
    Ok(xor_combine(&g, &e))
}

/// Encrypt `src` into the encrypted-FS file `dst`.
pub fn import(key: &[u8], src: &Path, dst: &Path, block_size: u16) -> Result<(), String> {
    let plain = fs::read(src).map_err(|e| format!("{}: {}", src.display(), e))?;
    let mut nonce = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let header = EncHeader {
        block_size,
        algo: ALGO_AES_128_GCM,
        flags: 0,
        plain_size: plain.len() as u64,
        nonce,
    };

    let mut out = header.encode().to_vec();
    for (index, chunk) in plain.chunks(block_size as usize).enumerate() {
        // Short final blocks are padded to the block size so the layout
        // stays seekable; the header's plain_size recovers the tail.
        let mut block = chunk.to_vec();
        block.resize(block_size as usize, 0);
        out.extend_from_slice(&seal_block(key, &header, index as u64, &block)?);
    }
    fs::write(dst, out).map_err(|e| format!("{}: {}", dst.display(), e))
}

/// Decrypt the encrypted-FS file `src` into `dst`.
pub fn export(key: &[u8], src: &Path, dst: &Path) -> Result<(), String> {
    let raw = fs::read(src).map_err(|e| format!("{}: {}", src.display(), e))?;
    let header =
        EncHeader::parse(&raw).ok_or_else(|| "not an encrypted file".to_string())?;

    let mut plain = Vec::with_capacity(header.plain_size as usize);
    let step = sealed_len(header.block_size);
    for (index, chunk) in raw[HEADER_LEN..].chunks(step).enumerate() {
        plain.extend_from_slice(&open_block(key, &header, index as u64, chunk)?);
    }
    plain.truncate(header.plain_size as usize);
    fs::write(dst, plain).map_err(|e| format!("{}: {}", dst.display(), e))
}

/// Header fields of an encrypted file, for `stat`.
pub fn stat(src: &Path) -> Result<serde_json::Value, String> {
    let raw = fs::read(src).map_err(|e| format!("{}: {}", src.display(), e))?;
    let header =
        EncHeader::parse(&raw).ok_or_else(|| "not an encrypted file".to_string())?;
    Ok(serde_json::json!({
        "block_size": header.block_size,
        "algorithm": header.algo,
        "flags": header.flags,
        "plain_size": header.plain_size,
        "nonce": header.nonce.iter().map(|b| format!("{:02x}", b)).collect::<String>(),
    }))
}
