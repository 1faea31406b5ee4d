//! Kernel↔kernel control messages.
//!
//! ## Wire Layout
//!
//! Each control message travels as one channel frame whose payload starts
//! with a single tag byte followed by the message's fixed schema. Variable
//! fields are length-prefixed with a big-endian `u32`; integers are
//! big-endian throughout.
//!
//! Tags:
//! - `0x01` TLSKEX        -- `u32 len ∥ client key-exchange bytes`
//! - `0x02` TLSKEXResult  -- `u32 len ∥ public ∥ u32 len ∥ partial`
//! - `0x03` TLSError      -- `i32 errno ∥ u32 len ∥ message (UTF-8)`
//!
//! An unknown tag or a malformed body is a decode error; callers translate
//! it into an alert or terminate the process.

use std::fmt;

pub const TAG_TLS_KEX: u8 = 0x01;
pub const TAG_TLS_KEX_RESULT: u8 = 0x02;
pub const TAG_TLS_ERROR: u8 = 0x03;

/// Garbler → evaluator: the client's key-exchange bytes (the full
/// ClientHello handshake message as read off the TLS transport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsKex {
    pub client_kex: Vec<u8>,
}

/// Evaluator → garbler: the evaluator's DH public share and its partial
/// point, both SEC1-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsKexResult {
    pub public: Vec<u8>,
    pub partial: Vec<u8>,
}

/// Either direction: the sender failed mid-dance; the receiver surfaces the
/// errno to its circuit so both sides agree on the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsErrorMsg {
    pub errno: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMsg {
    Kex(TlsKex),
    KexResult(TlsKexResult),
    Error(TlsErrorMsg),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgDecodeError {
    Truncated,
    UnknownTag(u8),
    BadUtf8,
}

impl fmt::Display for MsgDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgDecodeError::Truncated => write!(f, "control message truncated"),
            MsgDecodeError::UnknownTag(t) => write!(f, "unknown control tag 0x{:02x}", t),
            MsgDecodeError::BadUtf8 => write!(f, "control message string is not UTF-8"),
        }
    }
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

fn put_bytes(buf: &mut Vec<u8>, v: &[u8]) {
    buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
    buf.extend_from_slice(v);
}

fn take_u32(data: &[u8], pos: &mut usize) -> Result<u32, MsgDecodeError> {
    if *pos + 4 > data.len() {
        return Err(MsgDecodeError::Truncated);
    }
    let v = u32::from_be_bytes(data[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}

fn take_bytes(data: &[u8], pos: &mut usize) -> Result<Vec<u8>, MsgDecodeError> {
    let len = take_u32(data, pos)? as usize;
    if *pos + len > data.len() {
        return Err(MsgDecodeError::Truncated);
    }
    let v = data[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(v)
}

impl ControlMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        match self {
            ControlMsg::Kex(m) => {
                buf.push(TAG_TLS_KEX);
                put_bytes(&mut buf, &m.client_kex);
            }
            ControlMsg::KexResult(m) => {
                buf.push(TAG_TLS_KEX_RESULT);
                put_bytes(&mut buf, &m.public);
                put_bytes(&mut buf, &m.partial);
            }
            ControlMsg::Error(m) => {
                buf.push(TAG_TLS_ERROR);
                buf.extend_from_slice(&m.errno.to_be_bytes());
                put_bytes(&mut buf, m.message.as_bytes());
            }
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<ControlMsg, MsgDecodeError> {
        if data.is_empty() {
            return Err(MsgDecodeError::Truncated);
        }
        let mut pos = 1;
        match data[0] {
            TAG_TLS_KEX => {
                let client_kex = take_bytes(data, &mut pos)?;
                Ok(ControlMsg::Kex(TlsKex { client_kex }))
            }
            TAG_TLS_KEX_RESULT => {
                let public = take_bytes(data, &mut pos)?;
                let partial = take_bytes(data, &mut pos)?;
                Ok(ControlMsg::KexResult(TlsKexResult { public, partial }))
            }
            TAG_TLS_ERROR => {
                if pos + 4 > data.len() {
                    return Err(MsgDecodeError::Truncated);
                }
                let errno = i32::from_be_bytes(data[pos..pos + 4].try_into().unwrap());
                pos += 4;
                let raw = take_bytes(data, &mut pos)?;
                let message = String::from_utf8(raw).map_err(|_| MsgDecodeError::BadUtf8)?;
                Ok(ControlMsg::Error(TlsErrorMsg { errno, message }))
            }
            other => Err(MsgDecodeError::UnknownTag(other)),
        }
    }
}
