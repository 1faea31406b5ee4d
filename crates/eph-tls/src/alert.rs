//! TLS alerts and the alert→errno mapping.
//!
//! Alert records are two bytes: level then description. The kernel never
//! acts on the level; the description maps to an errno that the circuit
//! sees in `arg0`. `close_notify` maps to 0 (clean EOF).

use std::fmt;

use eph_common::Errno;

pub const LEVEL_WARNING: u8 = 1;
pub const LEVEL_FATAL: u8 = 2;

/// TLS 1.3 alert descriptions (RFC 8446 §6 registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDesc {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    InappropriateFallback = 86,
    UserCanceled = 90,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    BadCertificateStatusResponse = 113,
    UnknownPskIdentity = 115,
    CertificateRequired = 116,
    NoApplicationProtocol = 120,
}

impl AlertDesc {
    pub fn from_u8(v: u8) -> Option<AlertDesc> {
        use AlertDesc::*;
        Some(match v {
            0 => CloseNotify,
            10 => UnexpectedMessage,
            20 => BadRecordMac,
            22 => RecordOverflow,
            40 => HandshakeFailure,
            42 => BadCertificate,
            43 => UnsupportedCertificate,
            44 => CertificateRevoked,
            45 => CertificateExpired,
            46 => CertificateUnknown,
            47 => IllegalParameter,
            48 => UnknownCa,
            49 => AccessDenied,
            50 => DecodeError,
            51 => DecryptError,
            70 => ProtocolVersion,
            71 => InsufficientSecurity,
            80 => InternalError,
            86 => InappropriateFallback,
            90 => UserCanceled,
            109 => MissingExtension,
            110 => UnsupportedExtension,
            112 => UnrecognizedName,
            113 => BadCertificateStatusResponse,
            115 => UnknownPskIdentity,
            116 => CertificateRequired,
            120 => NoApplicationProtocol,
            _ => return None,
        })
    }

    /// The errno an alert surfaces as, or 0 for a clean `close_notify`.
    pub fn errno(self) -> i32 {
        use AlertDesc::*;
        match self {
            CloseNotify => 0,
            BadRecordMac => Errno::EBADMSG.code(),
            RecordOverflow => Errno::EMSGSIZE.code(),
            DecodeError => Errno::EBADMSG.code(),
            IllegalParameter => Errno::EINVAL.code(),
            ProtocolVersion => Errno::EPROTONOSUPPORT.code(),
            HandshakeFailure => Errno::ECONNABORTED.code(),
            AccessDenied => Errno::EACCES.code(),
            DecryptError | InsufficientSecurity | UnknownPskIdentity | BadCertificate
            | UnsupportedCertificate | CertificateRevoked | CertificateUnknown | UnknownCa
            | CertificateRequired => Errno::EAUTH.code(),
            CertificateExpired => Errno::ETIMEDOUT.code(),
            UserCanceled => Errno::ECANCELED.code(),
            InternalError => Errno::EFAULT.code(),
            UnexpectedMessage | InappropriateFallback | MissingExtension
            | UnsupportedExtension | UnrecognizedName | BadCertificateStatusResponse
            | NoApplicationProtocol => Errno::EPROTO.code(),
        }
    }
}

impl fmt::Display for AlertDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, *self as u8)
    }
}

/// A parsed alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: u8,
    pub desc: AlertDesc,
}

impl Alert {
    pub fn fatal(desc: AlertDesc) -> Alert {
        Alert {
            level: LEVEL_FATAL,
            desc,
        }
    }

    pub fn parse(body: &[u8]) -> Option<Alert> {
        if body.len() != 2 {
            return None;
        }
        Some(Alert {
            level: body[0],
            desc: AlertDesc::from_u8(body[1])?,
        })
    }

    pub fn encode(&self) -> [u8; 2] {
        [self.level, self.desc as u8]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_errno_table() {
        assert_eq!(AlertDesc::CloseNotify.errno(), 0);
        assert_eq!(AlertDesc::BadRecordMac.errno(), Errno::EBADMSG.code());
        assert_eq!(AlertDesc::RecordOverflow.errno(), Errno::EMSGSIZE.code());
        assert_eq!(AlertDesc::DecodeError.errno(), Errno::EBADMSG.code());
        assert_eq!(AlertDesc::IllegalParameter.errno(), Errno::EINVAL.code());
        assert_eq!(
            AlertDesc::ProtocolVersion.errno(),
            Errno::EPROTONOSUPPORT.code()
        );
        assert_eq!(
            AlertDesc::HandshakeFailure.errno(),
            Errno::ECONNABORTED.code()
        );
        assert_eq!(AlertDesc::AccessDenied.errno(), Errno::EACCES.code());
        assert_eq!(AlertDesc::DecryptError.errno(), Errno::EAUTH.code());
        assert_eq!(AlertDesc::InsufficientSecurity.errno(), Errno::EAUTH.code());
        assert_eq!(AlertDesc::UnknownPskIdentity.errno(), Errno::EAUTH.code());
        assert_eq!(AlertDesc::BadCertificate.errno(), Errno::EAUTH.code());
        assert_eq!(AlertDesc::CertificateExpired.errno(), Errno::ETIMEDOUT.code());
        assert_eq!(AlertDesc::UserCanceled.errno(), Errno::ECANCELED.code());
        assert_eq!(AlertDesc::InternalError.errno(), Errno::EFAULT.code());
    }

    #[test]
    fn test_alert_roundtrip() {
        let a = Alert::fatal(AlertDesc::HandshakeFailure);
        assert_eq!(Alert::parse(&a.encode()), Some(a));
    }

    #[test]
    fn test_bad_alert_rejected() {
        assert_eq!(Alert::parse(&[2]), None);
        assert_eq!(Alert::parse(&[2, 200]), None);
    }
}
