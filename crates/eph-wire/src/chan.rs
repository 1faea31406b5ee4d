//! Length-prefixed framed channel.
//!
//! ## Wire Layout
//!
//! Every message is a frame: a 4-byte big-endian length followed by that many
//! payload bytes. The typed helpers each send or expect one frame with a
//! fixed payload shape; all integers are big-endian.
//!
//! Writes are buffered until [`FramedChannel::flush`] so a multi-frame
//! sequence goes out in one transport write. Receiving flushes any pending
//! output first, which keeps strictly alternating request/response sequences
//! deadlock-free even when the caller forgets an explicit flush.
//!
//! A short read or EOF surfaces as an `io::Error`; the kernel treats that as
//! fatal for the owning process.

use std::io::{self, Read, Write};

/// Frames above this size are a protocol violation, not data.
const MAX_FRAME: usize = 64 * 1024 * 1024;

/// A framed, typed, FIFO channel over any blocking byte stream.
pub struct FramedChannel<S> {
    stream: S,
    wbuf: Vec<u8>,
}

impl<S: Read + Write> FramedChannel<S> {
    pub fn new(stream: S) -> FramedChannel<S> {
        FramedChannel {
            stream,
            wbuf: Vec::with_capacity(512),
        }
    }

    /// Consume the channel, returning the underlying stream.
    pub fn into_inner(mut self) -> io::Result<S> {
        self.flush()?;
        Ok(self.stream)
    }

    // ── Frames ─────────────────────────────────────────────────────────

    /// Queue one frame for sending.
    pub fn send_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        if payload.len() > MAX_FRAME {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds limit", payload.len()),
            ));
        }
        self.wbuf
            .extend_from_slice(&(payload.len() as u32).to_be_bytes());
        self.wbuf.extend_from_slice(payload);
        Ok(())
    }

    /// Receive one frame, blocking until it is complete.
    pub fn recv_frame(&mut self) -> io::Result<Vec<u8>> {
        self.flush()?;
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("peer announced {} byte frame", len),
            ));
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;
        Ok(payload)
    }

    /// Push all queued frames to the transport.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.wbuf.is_empty() {
            self.stream.write_all(&self.wbuf)?;
            self.wbuf.clear();
        }
        self.stream.flush()
    }

    // ── Typed scalars ──────────────────────────────────────────────────

    pub fn send_byte(&mut self, v: u8) -> io::Result<()> {
        self.send_frame(&[v])
    }

    pub fn recv_byte(&mut self) -> io::Result<u8> {
        let f = self.recv_fixed(1)?;
        Ok(f[0])
    }

    pub fn send_u16(&mut self, v: u16) -> io::Result<()> {
        self.send_frame(&v.to_be_bytes())
    }

    pub fn recv_u16(&mut self) -> io::Result<u16> {
        let f = self.recv_fixed(2)?;
        Ok(u16::from_be_bytes([f[0], f[1]]))
    }

    pub fn send_u32(&mut self, v: u32) -> io::Result<()> {
        self.send_frame(&v.to_be_bytes())
    }

    pub fn recv_u32(&mut self) -> io::Result<u32> {
        let f = self.recv_fixed(4)?;
        Ok(u32::from_be_bytes([f[0], f[1], f[2], f[3]]))
    }

    /// Signed 32-bit value; the kernel's descriptor-sync messages use this
    /// (negative values carry `-errno`).
    pub fn send_i32(&mut self, v: i32) -> io::Result<()> {
        self.send_frame(&v.to_be_bytes())
    }

    pub fn recv_i32(&mut self) -> io::Result<i32> {
        let f = self.recv_fixed(4)?;
        Ok(i32::from_be_bytes([f[0], f[1], f[2], f[3]]))
    }

    pub fn send_string(&mut self, v: &str) -> io::Result<()> {
        self.send_frame(v.as_bytes())
    }

    pub fn recv_string(&mut self) -> io::Result<String> {
        let f = self.recv_frame()?;
        String::from_utf8(f)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "string frame is not UTF-8"))
    }

    pub fn send_bytes(&mut self, v: &[u8]) -> io::Result<()> {
        self.send_frame(v)
    }

    pub fn recv_bytes(&mut self) -> io::Result<Vec<u8>> {
        self.recv_frame()
    }

    /// A vector of 32-bit lengths, used to exchange per-input bit sizes for
    /// dynamically compiled circuits.
    pub fn send_lens(&mut self, lens: &[u32]) -> io::Result<()> {
        let mut payload = Vec::with_capacity(lens.len() * 4);
        for l in lens {
            payload.extend_from_slice(&l.to_be_bytes());
        }
        self.send_frame(&payload)
    }

    pub fn recv_lens(&mut self) -> io::Result<Vec<u32>> {
        let f = self.recv_frame()?;
        if f.len() % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "length vector frame is not a multiple of 4",
            ));
        }
        Ok(f.chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn recv_fixed(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let f = self.recv_frame()?;
        if f.len() != n {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected {} byte frame, got {}", n, f.len()),
            ));
        }
        Ok(f)
    }
}
