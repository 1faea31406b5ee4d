//! Vault key shares.
//!
//! Key "foo" lives at `<prefix>0/foo` on the garbler and `<prefix>1/foo` on
//! the evaluator. The two share files XOR to the underlying symmetric key,
//! or act as additive shares for P-256 material; the kernel never combines
//! them -- each side only ever reads its own share.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use eph_common::Role;

/// A descriptor-facing reader over one side's key share.
pub struct KeyReader {
    data: Vec<u8>,
    pos: usize,
}

impl KeyReader {
    pub fn new(data: Vec<u8>) -> KeyReader {
        KeyReader { data, pos: 0 }
    }

    pub fn read(&mut self, max: usize) -> (i32, Vec<u8>) {
        if self.pos >= self.data.len() {
            return (0, Vec::new());
        }
        let n = (self.data.len() - self.pos).min(max);
        let out = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        (n as i32, out)
    }
}

/// The share path for a key name: `<prefix><party-index>/<name>`.
pub fn share_path(prefix: &Path, role: Role, name: &str) -> PathBuf {
    let mut dir = prefix.as_os_str().to_os_string();
    dir.push(role.index().to_string());
    PathBuf::from(dir).join(name)
}

/// Open this side's share of a named key.
pub fn open_key(prefix: &Path, role: Role, name: &str) -> io::Result<KeyReader> {
    let data = fs::read(share_path(prefix, role, name))?;
    Ok(KeyReader::new(data))
}

/// Reconstruct symmetric material from both shares.
pub fn xor_combine(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}
