//! The Ephemelier MPC kernel.
//!
//! Two mutually distrusting peers each run a kernel: the garbler performs
//! the real host I/O, the evaluator mirrors descriptors and contributes its
//! half of every joint computation. A process exists as a mirrored pair --
//! one object in each kernel, connected by a dedicated framed channel -- and
//! advances by evaluating one garbled circuit per state, decoding the
//! resulting syscall record, and letting the kernel perform the named host
//! operation before the next state runs.
//!
//! Module map:
//! - [`fd`]: reference-counted descriptor handles and the per-process table
//! - [`port`]: in-process mailboxes for descriptor passing between siblings
//! - [`syscall`]: the syscall record codec and call numbering
//! - [`circuit`]: the black-box circuit-runner and OT-context seams
//! - [`program`]: on-disk program loading and state-name normalization
//! - [`process`]: the mirrored process object and its life cycle
//! - [`kernel`]: the scheduler loop and syscall dispatch
//! - [`path`], [`encfile`], [`vault`]: path resolution, the encrypted-file
//!   header, vault key shares
//! - [`rusage`], [`trace`]: accounting and ktrace output

pub mod circuit;
pub mod conn;
pub mod encfile;
pub mod error;
pub mod fd;
pub mod kernel;
pub mod path;
pub mod port;
pub mod process;
pub mod program;
pub mod rusage;
pub mod syscall;
pub mod trace;
pub mod vault;

pub use conn::{PeerChannel, PeerStream};
pub use error::KernelError;
pub use kernel::{Kernel, LocalConnector, PeerConnector, TlsSettings};
pub use process::{ProcState, Process};
pub use syscall::{Sys, SyscallRecord};
