//! File descriptors.
//!
//! An `Fd` is an explicitly reference-counted handle around one tagged
//! variant with the capability set `{close, read, write}`. `copy()`
//! increments the count (descriptor inheritance, fd passing); `close()`
//! decrements and releases the host resource on the last drop. Reads and
//! writes return `n ≥ 0` on success, `0` on EOF and `-errno` on failure;
//! any operation on a released handle returns `-EBADF`.

use std::fs::File;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use eph_common::Errno;
use eph_tls::{NullIo, ServerConnection, TlsError, TranscriptSigner};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::port::PortEndpoint;
use crate::vault::KeyReader;

// ── TLS connection wrapper ─────────────────────────────────────────────

/// The garbler holds the live connection; the evaluator mirrors the same
/// state machine over a null transport.
pub enum TlsConn {
    Live(ServerConnection<TcpStream>),
    Mirror(ServerConnection<NullIo>),
}

impl TlsConn {
    pub fn next_handshake(
        &mut self,
        ht: u8,
        data: &[u8],
        signer: &dyn TranscriptSigner,
    ) -> Result<Vec<u8>, TlsError> {
        match self {
            TlsConn::Live(c) => c.next_handshake(ht, data, signer),
            TlsConn::Mirror(c) => c.next_handshake(ht, data, signer),
        }
    }

    pub fn write_premade(&mut self, record: &[u8], tail: &[u8]) -> Result<(), TlsError> {
        match self {
            TlsConn::Live(c) => c.write_premade_record(record, tail),
            TlsConn::Mirror(c) => c.write_premade_record(record, tail),
        }
    }

    /// Complete the handshake: the live side consumes and verifies the
    /// client Finished, the mirror just switches keys.
    pub fn finish(&mut self) -> Result<(), TlsError> {
        match self {
            TlsConn::Live(c) => c.complete(),
            TlsConn::Mirror(c) => c.complete_mirror(),
        }
    }

    pub fn app_read(&mut self) -> Result<Option<Vec<u8>>, TlsError> {
        match self {
            TlsConn::Live(c) => c.app_read(),
            // The mirror's transport is at EOF by construction.
            TlsConn::Mirror(_) => Ok(None),
        }
    }

    pub fn app_write(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        match self {
            TlsConn::Live(c) => c.app_write(data),
            TlsConn::Mirror(c) => c.app_write(data),
        }
    }

    pub fn transcript_raw(&self) -> &[u8] {
        match self {
            TlsConn::Live(c) => c.transcript_raw(),
            TlsConn::Mirror(c) => c.transcript_raw(),
        }
    }

    pub fn handshake_keys(&self) -> Option<&eph_tls::keys::HandshakeKeys> {
        match self {
            TlsConn::Live(c) => c.handshake_keys(),
            TlsConn::Mirror(c) => c.handshake_keys(),
        }
    }
}

/// TLS descriptor state: the connection plus read-ahead the last record
/// delivered beyond the caller's buffer.
pub struct TlsFd {
    pub conn: TlsConn,
    pending: Vec<u8>,
}

impl TlsFd {
    pub fn new(conn: TlsConn) -> TlsFd {
        TlsFd {
            conn,
            pending: Vec::new(),
        }
    }
}

// ── Variants ───────────────────────────────────────────────────────────

pub enum FdKind {
    File(File),
    Stdin,
    Stdout,
    Stderr,
    Socket(TcpStream),
    Listener(TcpListener),
    Null,
    Port(PortEndpoint),
    Tls(Box<TlsFd>),
    Key(KeyReader),
}

// ── Handle ─────────────────────────────────────────────────────────────

struct FdObject {
    refs: Mutex<u32>,
    kind: Mutex<Option<FdKind>>,
}

/// A shared descriptor handle. `clone()` aliases the handle without
/// touching the reference count; `copy()` is the counted operation.
#[derive(Clone)]
pub struct Fd {
    inner: Arc<FdObject>,
}

impl std::fmt::Debug for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fd").finish()
    }
}

impl Fd {
    pub fn new(kind: FdKind) -> Fd {
        Fd {
            inner: Arc::new(FdObject {
                refs: Mutex::new(1),
                kind: Mutex::new(Some(kind)),
            }),
        }
    }

    /// Duplicate the descriptor: same underlying resource, count + 1.
    pub fn copy(&self) -> Fd {
        *self.inner.refs.lock() += 1;
        self.clone()
    }

    /// Drop one reference; the host resource is released when the count
    /// reaches zero. Returns 0, or `-EBADF` for an already-released handle.
    pub fn close(&self) -> i32 {
        let mut refs = self.inner.refs.lock();
        if *refs == 0 {
            return Errno::EBADF.ret();
        }
        *refs -= 1;
        if *refs == 0 {
            // Releasing the variant drops the host handle exactly once.
            *self.inner.kind.lock() = None;
        }
        0
    }

    pub fn refcount(&self) -> u32 {
        *self.inner.refs.lock()
    }

    /// Run `f` against the live variant, or return `Err(EBADF)` if the
    /// descriptor has been released.
    pub fn with<R>(&self, f: impl FnOnce(&mut FdKind) -> R) -> Result<R, Errno> {
        let mut guard = self.inner.kind.lock();
        match guard.as_mut() {
            Some(kind) => Ok(f(kind)),
            None => Err(Errno::EBADF),
        }
    }

    /// Read up to `max` bytes. Returns `(count | 0 | -errno, data)`.
    pub fn read(&self, max: usize) -> (i32, Vec<u8>) {
        let res = self.with(|kind| match kind {
            FdKind::File(f) => read_stream(f, max),
            FdKind::Stdin => read_stream(&mut std::io::stdin().lock(), max),
            FdKind::Stdout | FdKind::Stderr => (Errno::EBADF.ret(), Vec::new()),
            FdKind::Socket(s) => read_stream(s, max),
            FdKind::Listener(_) => (Errno::EINVAL.ret(), Vec::new()),
            FdKind::Null => (0, Vec::new()),
            FdKind::Port(p) => p.read(max),
            FdKind::Key(k) => k.read(max),
            FdKind::Tls(t) => {
                if !t.pending.is_empty() {
                    let n = t.pending.len().min(max);
                    let out: Vec<u8> = t.pending.drain(..n).collect();
                    return (out.len() as i32, out);
                }
                match t.conn.app_read() {
                    Ok(None) => (0, Vec::new()),
                    Ok(Some(mut data)) => {
                        if data.len() > max {
                            t.pending = data.split_off(max);
                        }
                        (data.len() as i32, data)
                    }
                    Err(e) => (tls_ret(&e), Vec::new()),
                }
            }
        });
        res.unwrap_or_else(|e| (e.ret(), Vec::new()))
    }

    /// Write all of `data`. Returns the count or `-errno`.
    pub fn write(&self, data: &[u8]) -> i32 {
        let res = self.with(|kind| match kind {
            FdKind::File(f) => write_stream(f, data),
            FdKind::Stdin => Errno::EBADF.ret(),
            FdKind::Stdout => write_stream(&mut std::io::stdout().lock(), data),
            FdKind::Stderr => write_stream(&mut std::io::stderr().lock(), data),
            FdKind::Socket(s) => write_stream(s, data),
            FdKind::Listener(_) => Errno::EINVAL.ret(),
            FdKind::Null => data.len() as i32,
            FdKind::Port(p) => p.write(data),
            FdKind::Key(_) => Errno::EBADF.ret(),
            FdKind::Tls(t) => match t.conn.app_write(data) {
                Ok(n) => n as i32,
                Err(e) => tls_ret(&e),
            },
        });
        res.unwrap_or_else(|e| e.ret())
    }

    /// Accept on a listener descriptor.
    pub fn accept(&self) -> Result<TcpStream, Errno> {
        self.with(|kind| match kind {
            FdKind::Listener(l) => l
                .accept()
                .map(|(s, _)| s)
                .map_err(|e| Errno::from_io(&e)),
            FdKind::Null => Err(Errno::EOPNOTSUPP),
            _ => Err(Errno::ENOTSOCK),
        })?
    }
}

fn tls_ret(e: &TlsError) -> i32 {
    let code = e.errno();
    if code == 0 {
        0
    } else {
        -code
    }
}

fn read_stream(r: &mut impl Read, max: usize) -> (i32, Vec<u8>) {
    let mut buf = vec![0u8; max];
    match r.read(&mut buf) {
        Ok(n) => {
            buf.truncate(n);
            (n as i32, buf)
        }
        Err(e) => (Errno::from_io(&e).ret(), Vec::new()),
    }
}

fn write_stream(w: &mut impl Write, data: &[u8]) -> i32 {
    match w.write_all(data).and_then(|_| w.flush()) {
        Ok(()) => data.len() as i32,
        Err(e) => Errno::from_io(&e).ret(),
    }
}

// ── Table ──────────────────────────────────────────────────────────────

/// Per-process descriptor table. Integer ids must match across the two
/// mirrored processes; ids below 3 are the standard streams.
pub struct FdTable {
    map: FxHashMap<i32, Fd>,
    next: i32,
}

impl FdTable {
    pub fn new() -> FdTable {
        FdTable {
            map: FxHashMap::default(),
            next: 3,
        }
    }

    /// Standard streams: real stdio on the garbler, null devices on the
    /// evaluator.
    pub fn with_stdio(garbler: bool) -> FdTable {
        let mut table = FdTable::new();
        if garbler {
            table.map.insert(0, Fd::new(FdKind::Stdin));
            table.map.insert(1, Fd::new(FdKind::Stdout));
            table.map.insert(2, Fd::new(FdKind::Stderr));
        } else {
            for id in 0..3 {
                table.map.insert(id, Fd::new(FdKind::Null));
            }
        }
        table
    }

    pub fn get(&self, id: i32) -> Option<Fd> {
        self.map.get(&id).cloned()
    }

    /// Allocate the next free id at or above 3.
    pub fn alloc(&mut self, fd: Fd) -> i32 {
        while self.map.contains_key(&self.next) {
            self.next += 1;
        }
        let id = self.next;
        self.map.insert(id, fd);
        self.next += 1;
        id
    }

    /// Install a descriptor under a peer-synchronized id, closing whatever
    /// was there.
    pub fn insert_at(&mut self, id: i32, fd: Fd) {
        if let Some(old) = self.map.insert(id, fd) {
            old.close();
        }
    }

    pub fn remove(&mut self, id: i32) -> Option<Fd> {
        self.map.remove(&id)
    }

    pub fn close_all(&mut self) {
        for (_, fd) in self.map.drain() {
            fd.close();
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        FdTable::new()
    }
}
