//! Wire layer for the paired-process channel.
//!
//! Two mirrored processes talk over one framed, typed, FIFO byte stream.
//! This crate provides:
//!
//! - [`chan::FramedChannel`]: the length-prefixed channel with typed scalar
//!   helpers and explicit flushing,
//! - [`msg`]: the tagged fixed-schema control messages the kernels exchange
//!   during the TLS key-exchange dance,
//! - [`duplex`]: an in-memory blocking byte pipe used to pair two kernels in
//!   one address space (tests and single-host deployments).

pub mod chan;
pub mod duplex;
pub mod msg;

pub use chan::FramedChannel;
pub use duplex::{duplex_pair, DuplexStream};
pub use msg::{ControlMsg, MsgDecodeError, TlsErrorMsg, TlsKex, TlsKexResult};
