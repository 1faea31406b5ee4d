//! Ports: in-process mailboxes between sibling processes.
//!
//! A port owns two queues -- one server-bound, one client-bound -- plus a
//! 16-byte key share and a 96-bit nonce counter. Endpoints are descriptor
//! handles; the process that owns the port reads on the server side, its
//! sibling on the client side.
//!
//! The evaluator participates for synchronization only: its writes enqueue
//! empty bodies, and its reads surface just the key-share prefix. Only the
//! garbler carries real payload bytes.

use crossbeam_channel::{unbounded, Receiver, Sender};
use eph_common::{Errno, Role};
use parking_lot::Mutex;
use rand::RngCore;
use std::sync::Arc;

use crate::fd::Fd;

/// A queued mailbox message: bytes or a passed descriptor.
pub enum PortMsg {
    Data(Vec<u8>),
    Desc(Fd),
}

/// Shared port identity: key share and nonce counter.
pub struct Port {
    key: [u8; 16],
    /// 96-bit counter as (high, low).
    nonce: Mutex<(u32, u64)>,
}

impl Port {
    fn new(rng: &mut impl RngCore) -> Arc<Port> {
        let mut key = [0u8; 16];
        rng.fill_bytes(&mut key);
        Arc::new(Port {
            key,
            nonce: Mutex::new((0, 0)),
        })
    }

    #[cfg(test)]
    fn with_counter(high: u32, low: u64) -> Arc<Port> {
        Arc::new(Port {
            key: [0; 16],
            nonce: Mutex::new((high, low)),
        })
    }

    pub fn key(&self) -> [u8; 16] {
        self.key
    }

    /// The next 96-bit nonce, big-endian `high ∥ low`. Fails once the top
    /// bit of `high` would be set -- that bit marks the server direction in
    /// envelopes and must stay unambiguous.
    pub fn nonce(&self) -> Result<[u8; 12], Errno> {
        let mut guard = self.nonce.lock();
        let (high, low) = *guard;
        if high & 0x8000_0000 != 0 {
            return Err(Errno::ERANGE);
        }
        let mut out = [0u8; 12];
        out[..4].copy_from_slice(&high.to_be_bytes());
        out[4..].copy_from_slice(&low.to_be_bytes());

        let (next_low, carry) = low.overflowing_add(1);
        *guard = (if carry { high + 1 } else { high }, next_low);
        Ok(out)
    }
}

/// The owning process's end: both queues plus the shared identity.
pub struct PortPair {
    pub port: Arc<Port>,
    srv_tx: Sender<PortMsg>,
    srv_rx: Receiver<PortMsg>,
    cli_tx: Sender<PortMsg>,
    cli_rx: Receiver<PortMsg>,
}

impl PortPair {
    pub fn new(rng: &mut impl RngCore) -> PortPair {
        let (srv_tx, srv_rx) = unbounded();
        let (cli_tx, cli_rx) = unbounded();
        PortPair {
            port: Port::new(rng),
            srv_tx,
            srv_rx,
            cli_tx,
            cli_rx,
        }
    }

    /// Obtain an endpoint. The server endpoint reads the server-bound queue
    /// and writes the client-bound one; the client endpoint is the reverse.
    pub fn endpoint(&self, server: bool, role: Role) -> PortEndpoint {
        let (tx, rx) = if server {
            (self.cli_tx.clone(), self.srv_rx.clone())
        } else {
            (self.srv_tx.clone(), self.cli_rx.clone())
        };
        PortEndpoint {
            port: Arc::clone(&self.port),
            server,
            role,
            tx,
            rx,
        }
    }
}

/// A descriptor-facing port endpoint.
pub struct PortEndpoint {
    port: Arc<Port>,
    server: bool,
    role: Role,
    tx: Sender<PortMsg>,
    rx: Receiver<PortMsg>,
}

impl PortEndpoint {
    /// Enqueue a message. On the evaluator the body is replaced with empty
    /// bytes; the return value still reports the requested length so both
    /// circuits observe the same count.
    pub fn write(&self, data: &[u8]) -> i32 {
        let body = if self.role.is_garbler() {
            data.to_vec()
        } else {
            Vec::new()
        };
        match self.tx.send(PortMsg::Data(body)) {
            Ok(()) => data.len() as i32,
            Err(_) => Errno::EPIPE.ret(),
        }
    }

    /// Dequeue a message, prepending the port's key share. A descriptor in
    /// the queue where bytes were expected is closed and `-ENOMSG`
    /// returned.
    pub fn read(&self, max: usize) -> (i32, Vec<u8>) {
        match self.rx.recv() {
            Err(_) => (0, Vec::new()),
            Ok(PortMsg::Desc(fd)) => {
                fd.close();
                (Errno::ENOMSG.ret(), Vec::new())
            }
            Ok(PortMsg::Data(body)) => {
                let mut out = Vec::with_capacity(16 + body.len());
                out.extend_from_slice(&self.port.key());
                out.extend_from_slice(&body);
                out.truncate(max.max(16));
                (out.len() as i32, out)
            }
        }
    }

    /// Pass a descriptor to the sibling.
    pub fn send_fd(&self, fd: Fd) -> i32 {
        match self.tx.send(PortMsg::Desc(fd)) {
            Ok(()) => 0,
            Err(_) => Errno::EPIPE.ret(),
        }
    }

    /// Receive a descriptor. Bytes in the queue where a descriptor was
    /// expected are dropped and `-ENOMSG` returned.
    pub fn recv_fd(&self) -> Result<Fd, Errno> {
        match self.rx.recv() {
            Err(_) => Err(Errno::EPIPE),
            Ok(PortMsg::Data(_)) => Err(Errno::ENOMSG),
            Ok(PortMsg::Desc(fd)) => Ok(fd),
        }
    }

    /// A fresh message envelope: `key ∥ nonce` on the garbler, just the key
    /// share on the evaluator. The top bit of the first nonce byte marks
    /// the server direction.
    pub fn create_msg(&self) -> Result<Vec<u8>, Errno> {
        let mut out = self.port.key().to_vec();
        if self.role.is_garbler() {
            let mut nonce = self.port.nonce()?;
            if self.server {
                nonce[0] |= 0x80;
            }
            out.extend_from_slice(&nonce);
        }
        Ok(out)
    }
}
