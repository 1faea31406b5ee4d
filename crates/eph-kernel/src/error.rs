//! Fatal kernel errors.
//!
//! Everything here terminates the owning process. Recoverable host errors
//! never appear as `KernelError`; they travel back to the circuit as
//! negative errno values in `arg0`.

use std::fmt;
use std::io;

use eph_spdz::SpdzError;
use eph_tls::TlsError;

#[derive(Debug)]
pub enum KernelError {
    /// Peer channel failure (framing, EOF, short read).
    Io(io::Error),
    /// Peer-protocol violation: unknown tag, malformed control message.
    Protocol(String),
    /// Program loading failure.
    Load(String),
    /// Invalid syscall record from a circuit evaluation.
    Record(String),
    /// SPDZ failure mid-operation (budget exhaustion, desync).
    Spdz(SpdzError),
    /// TLS failure that cannot be surfaced as an errno.
    Tls(TlsError),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Io(e) => write!(f, "peer channel: {}", e),
            KernelError::Protocol(m) => write!(f, "peer protocol: {}", m),
            KernelError::Load(m) => write!(f, "program load: {}", m),
            KernelError::Record(m) => write!(f, "syscall record: {}", m),
            KernelError::Spdz(e) => write!(f, "spdz: {}", e),
            KernelError::Tls(e) => write!(f, "tls: {}", e),
        }
    }
}

impl From<io::Error> for KernelError {
    fn from(e: io::Error) -> KernelError {
        KernelError::Io(e)
    }
}

impl From<SpdzError> for KernelError {
    fn from(e: SpdzError) -> KernelError {
        KernelError::Spdz(e)
    }
}

impl From<TlsError> for KernelError {
    fn from(e: TlsError) -> KernelError {
        KernelError::Tls(e)
    }
}
