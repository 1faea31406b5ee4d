//! Handshake message codecs.
//!
//! Parsing covers what the server policy needs from a ClientHello; building
//! covers everything the server emits: ServerHello, HelloRetryRequest,
//! EncryptedExtensions, Certificate, CertificateVerify, Finished.
//!
//! Every message carries the 4-byte handshake header
//! `type(1) ∥ length(3)`; builders return the full message including the
//! header so callers can append it to the transcript verbatim.

use crate::alert::AlertDesc;
use crate::error::TlsError;

// ── Constants ──────────────────────────────────────────────────────────

pub const HT_CLIENT_HELLO: u8 = 1;
pub const HT_SERVER_HELLO: u8 = 2;
pub const HT_ENCRYPTED_EXTENSIONS: u8 = 8;
pub const HT_CERTIFICATE: u8 = 11;
pub const HT_CERTIFICATE_VERIFY: u8 = 15;
pub const HT_FINISHED: u8 = 20;
pub const HT_MESSAGE_HASH: u8 = 254;

pub const TLS13: u16 = 0x0304;
pub const SUITE_AES_128_GCM_SHA256: u16 = 0x1301;
pub const SUITE_CHACHA20_POLY1305_SHA256: u16 = 0x1303;
pub const GROUP_SECP256R1: u16 = 0x0017;
pub const GROUP_X25519: u16 = 0x001d;
pub const SIG_ECDSA_SECP256R1_SHA256: u16 = 0x0403;

pub const EXT_SERVER_NAME: u16 = 0;
pub const EXT_SUPPORTED_GROUPS: u16 = 10;
pub const EXT_SIGNATURE_ALGORITHMS: u16 = 13;
pub const EXT_SUPPORTED_VERSIONS: u16 = 43;
pub const EXT_KEY_SHARE: u16 = 51;

/// The fixed HelloRetryRequest random (SHA-256 of "HelloRetryRequest",
/// RFC 8446 §4.1.3).
pub const HRR_RANDOM: [u8; 32] = [
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8,
    0x91, 0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8,
    0x33, 0x9c,
];

// ── Reader helpers ─────────────────────────────────────────────────────

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Reader<'a> {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TlsError> {
        if self.remaining() < n {
            return Err(TlsError::alert(AlertDesc::DecodeError));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, TlsError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, TlsError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<usize, TlsError> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn vec8(&mut self) -> Result<&'a [u8], TlsError> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    fn vec16(&mut self) -> Result<&'a [u8], TlsError> {
        let len = self.u16()? as usize;
        self.take(len)
    }
}

// ── Builder helpers ────────────────────────────────────────────────────

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_vec8(buf: &mut Vec<u8>, v: &[u8]) {
    buf.push(v.len() as u8);
    buf.extend_from_slice(v);
}

fn put_vec16(buf: &mut Vec<u8>, v: &[u8]) {
    put_u16(buf, v.len() as u16);
    buf.extend_from_slice(v);
}

fn put_vec24(buf: &mut Vec<u8>, v: &[u8]) {
    let len = v.len();
    buf.push((len >> 16) as u8);
    buf.push((len >> 8) as u8);
    buf.push(len as u8);
    buf.extend_from_slice(v);
}

fn put_ext(buf: &mut Vec<u8>, id: u16, body: &[u8]) {
    put_u16(buf, id);
    put_vec16(buf, body);
}

/// Wrap a handshake body with its `type ∥ u24 length` header.
pub fn wrap(ht: u8, body: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(body.len() + 4);
    msg.push(ht);
    put_vec24(&mut msg, body);
    msg
}

/// Split one handshake message off the front of a buffer, returning
/// `(type, full message, rest)`.
pub fn split_message(data: &[u8]) -> Result<(u8, &[u8], &[u8]), TlsError> {
    if data.len() < 4 {
        return Err(TlsError::alert(AlertDesc::DecodeError));
    }
    let len = ((data[1] as usize) << 16) | ((data[2] as usize) << 8) | data[3] as usize;
    if data.len() < 4 + len {
        return Err(TlsError::alert(AlertDesc::DecodeError));
    }
    Ok((data[0], &data[..4 + len], &data[4 + len..]))
}

// ── ClientHello ────────────────────────────────────────────────────────

/// The fields of a ClientHello the server policy looks at.
#[derive(Debug, Clone, Default)]
pub struct ClientHello {
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub versions: Vec<u16>,
    pub groups: Vec<u16>,
    pub sig_schemes: Vec<u16>,
    /// `(group, key-exchange octets)` in client preference order.
    pub key_shares: Vec<(u16, Vec<u8>)>,
    pub server_name: Option<String>,
}

impl ClientHello {
    pub fn key_share_for(&self, group: u16) -> Option<&[u8]> {
        self.key_shares
            .iter()
            .find(|(g, _)| *g == group)
            .map(|(_, d)| d.as_slice())
    }
}

/// Parse a full ClientHello handshake message (header included).
pub fn parse_client_hello(msg: &[u8]) -> Result<ClientHello, TlsError> {
    let (ht, full, _rest) = split_message(msg)?;
    if ht != HT_CLIENT_HELLO {
        return Err(TlsError::alert(AlertDesc::UnexpectedMessage));
    }
    let mut r = Reader::new(&full[4..]);

    let _legacy_version = r.u16()?;
    let mut hello = ClientHello::default();
    hello.random.copy_from_slice(r.take(32)?);
    hello.session_id = r.vec8()?.to_vec();

    let suites = r.vec16()?;
    if suites.len() % 2 != 0 {
        return Err(TlsError::alert(AlertDesc::DecodeError));
    }
    hello.cipher_suites = suites
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();

    let _compression = r.vec8()?;

    let extensions = r.vec16()?;
    let mut er = Reader::new(extensions);
    while er.remaining() > 0 {
        let ext_id = er.u16()?;
        let body = er.vec16()?;
        let mut b = Reader::new(body);
        match ext_id {
            EXT_SUPPORTED_VERSIONS => {
                let list = b.vec8()?;
                hello.versions = list
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
            }
            EXT_SUPPORTED_GROUPS => {
                let list = b.vec16()?;
                hello.groups = list
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
            }
            EXT_SIGNATURE_ALGORITHMS => {
                let list = b.vec16()?;
                hello.sig_schemes = list
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
            }
            EXT_KEY_SHARE => {
                let shares = b.vec16()?;
                let mut sr = Reader::new(shares);
                while sr.remaining() > 0 {
                    let group = sr.u16()?;
                    let data = sr.vec16()?;
                    hello.key_shares.push((group, data.to_vec()));
                }
            }
            EXT_SERVER_NAME => {
                // server_name_list: one host_name entry is all we look at.
                let list = b.vec16()?;
                let mut nr = Reader::new(list);
                if nr.remaining() > 0 && nr.u8()? == 0 {
                    let name = nr.vec16()?;
                    hello.server_name = String::from_utf8(name.to_vec()).ok();
                }
            }
            _ => {}
        }
    }

    Ok(hello)
}

// ── Server messages ────────────────────────────────────────────────────

/// Build a ServerHello carrying the combined key share.
pub fn server_hello(
    random: &[u8; 32],
    session_id: &[u8],
    suite: u16,
    key_share: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(128);
    put_u16(&mut body, 0x0303);
    body.extend_from_slice(random);
    put_vec8(&mut body, session_id);
    put_u16(&mut body, suite);
    body.push(0); // legacy compression

    let mut exts = Vec::new();
    put_ext(&mut exts, EXT_SUPPORTED_VERSIONS, &TLS13.to_be_bytes());
    let mut ks = Vec::new();
    put_u16(&mut ks, GROUP_SECP256R1);
    put_vec16(&mut ks, key_share);
    put_ext(&mut exts, EXT_KEY_SHARE, &ks);
    put_vec16(&mut body, &exts);

    wrap(HT_SERVER_HELLO, &body)
}

/// Build a HelloRetryRequest selecting secp256r1.
pub fn hello_retry_request(session_id: &[u8], suite: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(96);
    put_u16(&mut body, 0x0303);
    body.extend_from_slice(&HRR_RANDOM);
    put_vec8(&mut body, session_id);
    put_u16(&mut body, suite);
    body.push(0);

    let mut exts = Vec::new();
    put_ext(&mut exts, EXT_SUPPORTED_VERSIONS, &TLS13.to_be_bytes());
    // In a retry the key_share extension carries only the selected group.
    put_ext(&mut exts, EXT_KEY_SHARE, &GROUP_SECP256R1.to_be_bytes());
    put_vec16(&mut body, &exts);

    wrap(HT_SERVER_HELLO, &body)
}

/// True if a ServerHello message is a HelloRetryRequest.
pub fn is_hello_retry(msg: &[u8]) -> bool {
    msg.len() >= 4 + 2 + 32 && msg[0] == HT_SERVER_HELLO && msg[6..38] == HRR_RANDOM
}

pub fn encrypted_extensions() -> Vec<u8> {
    // No extensions.
    wrap(HT_ENCRYPTED_EXTENSIONS, &[0, 0])
}

/// Certificate message with one entry and an empty request context.
pub fn certificate(cert_der: &[u8]) -> Vec<u8> {
    let mut entry = Vec::with_capacity(cert_der.len() + 8);
    put_vec24(&mut entry, cert_der);
    put_u16(&mut entry, 0); // no per-certificate extensions

    let mut body = Vec::with_capacity(entry.len() + 8);
    body.push(0); // certificate_request_context
    put_vec24(&mut body, &entry);
    wrap(HT_CERTIFICATE, &body)
}

pub fn certificate_verify(scheme: u16, signature: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(signature.len() + 4);
    put_u16(&mut body, scheme);
    put_vec16(&mut body, signature);
    wrap(HT_CERTIFICATE_VERIFY, &body)
}

pub fn finished(verify_data: &[u8]) -> Vec<u8> {
    wrap(HT_FINISHED, verify_data)
}

/// The digest input for a server CertificateVerify signature
/// (RFC 8446 §4.4.3).
pub fn certificate_verify_content(transcript_hash: &[u8; 32]) -> Vec<u8> {
    let mut content = Vec::with_capacity(130);
    content.extend_from_slice(&[0x20u8; 64]);
    content.extend_from_slice(b"TLS 1.3, server CertificateVerify");
    content.push(0);
    content.extend_from_slice(transcript_hash);
    content
}
