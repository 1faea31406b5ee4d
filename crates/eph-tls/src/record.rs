//! TLS record framing.
//!
//! Frames are `type(1) ∥ legacy_version(2) ∥ length(2) ∥ payload`. Writers
//! always stamp the fixed legacy version 0x0303; readers accept whatever
//! legacy version the peer stamped and restart short reads until the full
//! payload is in hand.

use std::io::{Read, Write};

use crate::error::TlsError;

pub const LEGACY_VERSION: u16 = 0x0303;

/// Ciphertext records may exceed the 2^14 plaintext limit by the expansion
/// allowance (RFC 8446 §5.2).
pub const MAX_RECORD_PAYLOAD: usize = 16384 + 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    pub fn from_u8(v: u8) -> Option<ContentType> {
        Some(match v {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => return None,
        })
    }
}

/// Read one record. Blocks until the full payload arrives.
pub fn read_record(r: &mut impl Read) -> Result<(ContentType, Vec<u8>), TlsError> {
    let mut header = [0u8; 5];
    r.read_exact(&mut header)?;
    let ct = ContentType::from_u8(header[0])
        .ok_or_else(|| TlsError::Decode(format!("record type {}", header[0])))?;
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    if len > MAX_RECORD_PAYLOAD {
        return Err(TlsError::alert(crate::alert::AlertDesc::RecordOverflow));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok((ct, payload))
}

/// Write one record with the fixed legacy version.
pub fn write_record(w: &mut impl Write, ct: ContentType, payload: &[u8]) -> Result<(), TlsError> {
    if payload.len() > MAX_RECORD_PAYLOAD {
        return Err(TlsError::alert(crate::alert::AlertDesc::RecordOverflow));
    }
    let mut header = [0u8; 5];
    header[0] = ct as u8;
    header[1..3].copy_from_slice(&LEGACY_VERSION.to_be_bytes());
    header[3..5].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    w.write_all(&header)?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_record_roundtrip() {
        let mut buf = Vec::new();
        write_record(&mut buf, ContentType::Handshake, b"hello").unwrap();
        assert_eq!(buf[0], 22);
        assert_eq!(&buf[1..3], &[0x03, 0x03]);

        let mut cur = Cursor::new(buf);
        let (ct, payload) = read_record(&mut cur).unwrap();
        assert_eq!(ct, ContentType::Handshake);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn test_reader_accepts_old_legacy_version() {
        // A first ClientHello may arrive under record version 0x0301.
        let mut buf = vec![22, 0x03, 0x01, 0, 2, 0xaa, 0xbb];
        let mut cur = Cursor::new(std::mem::take(&mut buf));
        let (ct, payload) = read_record(&mut cur).unwrap();
        assert_eq!(ct, ContentType::Handshake);
        assert_eq!(payload, vec![0xaa, 0xbb]);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let buf = vec![99, 3, 3, 0, 0];
        let mut cur = Cursor::new(buf);
        assert!(read_record(&mut cur).is_err());
    }

    #[test]
    fn test_oversize_record_rejected() {
        let mut buf = vec![23, 3, 3];
        buf.extend_from_slice(&(u16::MAX).to_be_bytes());
        buf.extend_from_slice(&vec![0; u16::MAX as usize]);
        let mut cur = Cursor::new(buf);
        assert!(matches!(
            read_record(&mut cur),
            Err(TlsError::Alert { .. })
        ));
    }

    #[test]
    fn test_truncated_record_is_io_error() {
        let buf = vec![22, 3, 3, 0, 10, 1, 2];
        let mut cur = Cursor::new(buf);
        assert!(matches!(read_record(&mut cur), Err(TlsError::Io(_))));
    }
}
