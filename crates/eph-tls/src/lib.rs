//! TLS 1.3 server with a distributed-ECDH seam.
//!
//! This crate implements the server side of a TLS 1.3 handshake from the
//! record layer up: record framing, alert handling, handshake message
//! codecs, the RFC 8446 key schedule, AEAD record protection, and the
//! server state machine. What it deliberately does *not* do is produce the
//! ECDH shared secret: the server's keypair is split across the two MPC
//! peers, so the state machine stops at the ServerHello key-share decision
//! point and hands control back to the kernel, which runs the cross-peer
//! SPDZ point addition and returns the secret.
//!
//! Accepted parameters (server policy): TLS 1.3 only, AES-128-GCM-SHA256
//! (plus CHACHA20-POLY1305-SHA256 behind the `chacha` feature), secp256r1,
//! ecdsa_secp256r1_sha256.

pub mod aead;
pub mod alert;
pub mod error;
pub mod hs;
pub mod keys;
pub mod record;
pub mod server;
pub mod signer;

pub use aead::{RecordCipher, Suite};
pub use alert::{Alert, AlertDesc};
pub use error::TlsError;
pub use server::{NullIo, ServerConfig, ServerConnection};
pub use signer::{LocalSigner, TranscriptSigner};
