//! TLS error type with alert-return duality.
//!
//! The TLS layer often needs to both emit an alert on the transport and
//! return an error. `TlsError::Alert` carries the alert we sent (or decided
//! to send) plus any transport-write failure chained behind it; the kernel
//! only ever looks at [`TlsError::errno`].

use std::fmt;
use std::io;

use eph_common::Errno;

use crate::alert::{Alert, AlertDesc};

#[derive(Debug)]
pub enum TlsError {
    /// Transport failure.
    Io(io::Error),
    /// We aborted with this alert; `write_err` is a failure to deliver it.
    Alert {
        desc: AlertDesc,
        write_err: Option<io::Error>,
    },
    /// The peer sent this alert.
    PeerAlert(Alert),
    /// Malformed handshake or record contents.
    Decode(String),
    /// The cross-peer key-exchange dance failed with this errno.
    Kex(i32, String),
    /// The connection is in the wrong state for the requested operation.
    State(&'static str),
}

impl TlsError {
    pub fn alert(desc: AlertDesc) -> TlsError {
        TlsError::Alert {
            desc,
            write_err: None,
        }
    }

    /// The errno surfaced to the circuit. 0 only for a peer `close_notify`.
    pub fn errno(&self) -> i32 {
        match self {
            TlsError::Io(e) => Errno::from_io(e).code(),
            TlsError::Alert { desc, .. } => {
                let code = desc.errno();
                if code == 0 {
                    Errno::ECONNRESET.code()
                } else {
                    code
                }
            }
            TlsError::PeerAlert(a) => a.desc.errno(),
            TlsError::Decode(_) => Errno::EBADMSG.code(),
            TlsError::Kex(errno, _) => errno.abs(),
            TlsError::State(_) => Errno::EPROTO.code(),
        }
    }
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsError::Io(e) => write!(f, "tls transport: {}", e),
            TlsError::Alert {
                desc,
                write_err: None,
            } => write!(f, "tls abort: {}", desc),
            TlsError::Alert {
                desc,
                write_err: Some(we),
            } => write!(f, "tls abort: {} (alert write failed: {})", desc, we),
            TlsError::PeerAlert(a) => write!(f, "peer alert: {}", a.desc),
            TlsError::Decode(m) => write!(f, "tls decode: {}", m),
            TlsError::Kex(errno, m) => write!(f, "kex failed ({}): {}", errno, m),
            TlsError::State(m) => write!(f, "tls state: {}", m),
        }
    }
}

impl From<io::Error> for TlsError {
    fn from(e: io::Error) -> TlsError {
        TlsError::Io(e)
    }
}
