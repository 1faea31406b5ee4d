//! Kernel parameter block.
//!
//! All process-wide knobs travel in an explicit `KernelParams` value handed
//! to the kernel at boot; nothing here is a module-level singleton.

use std::path::PathBuf;

/// Which ktrace events are emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceFlags {
    /// Trace syscall entry.
    pub calls: bool,
    /// Trace syscall return values.
    pub returns: bool,
    /// Trace process exit.
    pub exits: bool,
    /// Dump the rusage accumulator on exit.
    pub rusage: bool,
}

impl TraceFlags {
    /// Everything on.
    pub fn all() -> TraceFlags {
        TraceFlags {
            calls: true,
            returns: true,
            exits: true,
            rusage: true,
        }
    }
}

/// Process-wide kernel configuration.
#[derive(Debug, Clone)]
pub struct KernelParams {
    pub trace: TraceFlags,
    /// Host directory all process path resolution is rooted under.
    pub fs_root: PathBuf,
    /// Vault directory prefix; the role index is appended (`<prefix>0/`,
    /// `<prefix>1/`).
    pub vault_prefix: PathBuf,
    /// Directory programs are loaded from by name.
    pub program_root: PathBuf,
    /// Beaver triples pre-allocated per SPDZ point addition.
    pub triple_budget: usize,
}

impl Default for KernelParams {
    fn default() -> Self {
        KernelParams {
            trace: TraceFlags::default(),
            fs_root: PathBuf::from("/"),
            vault_prefix: PathBuf::from("vault"),
            program_root: PathBuf::from("."),
            triple_budget: 1400,
        }
    }
}
