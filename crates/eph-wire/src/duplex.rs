//! In-memory blocking byte pipe.
//!
//! `duplex_pair` returns two connected stream halves, each implementing
//! `Read` + `Write`. Dropping either half makes reads on the other return
//! EOF and writes fail with `BrokenPipe`, matching the cancellation model of
//! a closed socket: a waiting peer wakes up with an I/O error.

use std::io::{self, Read, Write};

use crossbeam_channel::{unbounded, Receiver, Sender};

/// One half of an in-memory duplex connection.
pub struct DuplexStream {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

/// Create a connected pair of duplex stream halves.
pub fn duplex_pair() -> (DuplexStream, DuplexStream) {
    let (a_tx, a_rx) = unbounded();
    let (b_tx, b_rx) = unbounded();
    (
        DuplexStream {
            tx: a_tx,
            rx: b_rx,
            pending: Vec::new(),
            pos: 0,
        },
        DuplexStream {
            tx: b_tx,
            rx: a_rx,
            pending: Vec::new(),
            pos: 0,
        },
    )
}

impl Read for DuplexStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                // Peer dropped its sender: EOF.
                Err(_) => return Ok(0),
            }
        }
        let n = (self.pending.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for DuplexStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_cross_the_pipe() {
        let (mut a, mut b) = duplex_pair();
        a.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn test_both_directions() {
        let (mut a, mut b) = duplex_pair();
        a.write_all(b"to-b").unwrap();
        b.write_all(b"to-a").unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"to-b");
        a.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"to-a");
    }

    #[test]
    fn test_drop_propagates_eof() {
        let (a, mut b) = duplex_pair();
        drop(a);
        let mut buf = [0u8; 1];
        assert_eq!(b.read(&mut buf).unwrap(), 0);
        assert!(b.write_all(b"x").is_err());
    }

    #[test]
    fn test_partial_reads_preserve_order() {
        let (mut a, mut b) = duplex_pair();
        a.write_all(b"abcdef").unwrap();
        let mut one = [0u8; 1];
        for expected in b"abcdef" {
            b.read_exact(&mut one).unwrap();
            assert_eq!(one[0], *expected);
        }
    }
}
