//! RFC 8446 §7.1 key schedule and the handshake transcript.
//!
//! The hash is SHA-256 for both accepted suites. The transcript keeps the
//! raw concatenated handshake messages (the kernel returns them to the
//! circuit) and hashes on demand; `retry` performs the HelloRetryRequest
//! synthetic-hash substitution.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::aead::Suite;
use crate::hs::HT_MESSAGE_HASH;

type HmacSha256 = Hmac<Sha256>;

// ── Transcript ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    raw: Vec<u8>,
}

impl Transcript {
    pub fn new() -> Transcript {
        Transcript::default()
    }

    /// Restore a transcript from raw bytes received from the peer kernel.
    pub fn seed(raw: Vec<u8>) -> Transcript {
        Transcript { raw }
    }

    pub fn push(&mut self, msg: &[u8]) {
        self.raw.extend_from_slice(msg);
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(&self.raw).into()
    }

    /// HelloRetryRequest substitution: the transcript so far (ClientHello1)
    /// is replaced by a synthetic `message_hash` message containing its
    /// hash (RFC 8446 §4.4.1).
    pub fn retry(&mut self) {
        let ch1_hash = self.hash();
        self.raw.clear();
        self.raw
            .extend_from_slice(&[HT_MESSAGE_HASH, 0, 0, 32]);
        self.raw.extend_from_slice(&ch1_hash);
    }
}

// ── HKDF primitives ────────────────────────────────────────────────────

pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; 32] {
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
    prk.into()
}

/// `HKDF-Expand-Label(secret, "tls13 " + label, context, len)`.
pub fn hkdf_expand_label(secret: &[u8], label: &str, context: &[u8], len: usize) -> Vec<u8> {
    let mut info = Vec::with_capacity(10 + label.len() + context.len());
    info.extend_from_slice(&(len as u16).to_be_bytes());
    info.push((6 + label.len()) as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label.as_bytes());
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    let hk = Hkdf::<Sha256>::from_prk(secret).expect("prk is a digest");
    let mut okm = vec![0u8; len];
    hk.expand(&info, &mut okm).expect("okm within bounds");
    okm
}

pub fn derive_secret(secret: &[u8], label: &str, transcript_hash: &[u8]) -> [u8; 32] {
    hkdf_expand_label(secret, label, transcript_hash, 32)
        .try_into()
        .expect("32-byte derive")
}

/// `verify_data = HMAC(finished_key, transcript_hash)`.
pub fn finished_verify(base_secret: &[u8], transcript_hash: &[u8; 32]) -> [u8; 32] {
    let finished_key = hkdf_expand_label(base_secret, "finished", &[], 32);
    let mut mac = HmacSha256::new_from_slice(&finished_key).expect("any key size");
    mac.update(transcript_hash);
    mac.finalize().into_bytes().into()
}

// ── Derived key sets ───────────────────────────────────────────────────

/// Traffic key material for one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficKeys {
    pub secret: [u8; 32],
    pub key: Vec<u8>,
    pub iv: [u8; 12],
}

fn traffic_keys(suite: Suite, secret: [u8; 32]) -> TrafficKeys {
    let key = hkdf_expand_label(&secret, "key", &[], suite.key_len());
    let iv: [u8; 12] = hkdf_expand_label(&secret, "iv", &[], 12)
        .try_into()
        .expect("12-byte iv");
    TrafficKeys { secret, key, iv }
}

/// Handshake-phase secrets bound to the transcript at ServerHello.
#[derive(Debug, Clone)]
pub struct HandshakeKeys {
    pub handshake_secret: [u8; 32],
    pub client: TrafficKeys,
    pub server: TrafficKeys,
}

pub fn handshake_keys(suite: Suite, shared_secret: &[u8], hello_hash: &[u8; 32]) -> HandshakeKeys {
    let early = hkdf_extract(&[], &[0u8; 32]);
    let empty_hash: [u8; 32] = Sha256::digest(b"").into();
    let derived = derive_secret(&early, "derived", &empty_hash);
    let handshake_secret = hkdf_extract(&derived, shared_secret);

    let client_secret = derive_secret(&handshake_secret, "c hs traffic", hello_hash);
    let server_secret = derive_secret(&handshake_secret, "s hs traffic", hello_hash);

    HandshakeKeys {
        handshake_secret,
        client: traffic_keys(suite, client_secret),
        server: traffic_keys(suite, server_secret),
    }
}

/// Application-phase secrets bound to the transcript at server Finished.
#[derive(Debug, Clone)]
pub struct AppKeys {
    pub client: TrafficKeys,
    pub server: TrafficKeys,
}

pub fn app_keys(suite: Suite, handshake_secret: &[u8; 32], finished_hash: &[u8; 32]) -> AppKeys {
    let empty_hash: [u8; 32] = Sha256::digest(b"").into();
    let derived = derive_secret(handshake_secret, "derived", &empty_hash);
    let master = hkdf_extract(&derived, &[0u8; 32]);

    let client_secret = derive_secret(&master, "c ap traffic", finished_hash);
    let server_secret = derive_secret(&master, "s ap traffic", finished_hash);

    AppKeys {
        client: traffic_keys(suite, client_secret),
        server: traffic_keys(suite, server_secret),
    }
}
