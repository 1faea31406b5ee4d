//! The concrete peer-channel stream.
//!
//! A process pair talks over TCP between two kernel hosts, or over an
//! in-memory duplex when both kernels share one address space (tests,
//! single-host deployments).

use std::io::{self, Read, Write};
use std::net::TcpStream;

use eph_wire::{DuplexStream, FramedChannel};

pub enum PeerStream {
    Tcp(TcpStream),
    Mem(DuplexStream),
}

pub type PeerChannel = FramedChannel<PeerStream>;

impl Read for PeerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PeerStream::Tcp(s) => s.read(buf),
            PeerStream::Mem(s) => s.read(buf),
        }
    }
}

impl Write for PeerStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PeerStream::Tcp(s) => s.write(buf),
            PeerStream::Mem(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PeerStream::Tcp(s) => s.flush(),
            PeerStream::Mem(s) => s.flush(),
        }
    }
}
