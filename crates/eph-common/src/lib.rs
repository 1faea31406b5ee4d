//! Shared vocabulary types for the Ephemelier MPC kernel.
//!
//! Everything in this crate is pure data: the POSIX-like errno enumeration
//! used as the syscall error currency, the composite process identifier that
//! names a mirrored process pair, the two MPC roles, and the kernel parameter
//! block that is threaded through constructors instead of living in globals.

pub mod errno;
pub mod params;
pub mod pid;

pub use errno::Errno;
pub use params::{KernelParams, TraceFlags};
pub use pid::{Pid, Role};
