//! Self-signed P-256 certificate emission.
//!
//! A deliberately small X.509 v3 DER writer: one subject CN, fixed
//! validity, ecdsa-with-SHA256 self-signature. Enough for the TLS server's
//! certificate message and the vault import flow; anything fancier belongs
//! to a real CA.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use p256::SecretKey;
use rand::rngs::OsRng;

// ── DER helpers ────────────────────────────────────────────────────────

fn tlv(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = body.len();
    if len < 128 {
        out.push(len as u8);
    } else if len < 256 {
        out.push(0x81);
        out.push(len as u8);
    } else {
        out.push(0x82);
        out.push((len >> 8) as u8);
        out.push(len as u8);
    }
    out.extend_from_slice(body);
    out
}

fn seq(parts: &[Vec<u8>]) -> Vec<u8> {
    tlv(0x30, &parts.concat())
}

fn set(parts: &[Vec<u8>]) -> Vec<u8> {
    tlv(0x31, &parts.concat())
}

fn integer(body: &[u8]) -> Vec<u8> {
    // Positive integers need a leading zero when the high bit is set.
    let mut v = body.to_vec();
    if v.first().map_or(true, |b| b & 0x80 != 0) {
        v.insert(0, 0);
    }
    tlv(0x02, &v)
}

fn bit_string(body: &[u8]) -> Vec<u8> {
    let mut v = vec![0u8];
    v.extend_from_slice(body);
    tlv(0x03, &v)
}

fn utc_time(s: &str) -> Vec<u8> {
    tlv(0x17, s.as_bytes())
}

const OID_ECDSA_SHA256: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];
const OID_EC_PUBLIC_KEY: &[u8] = &[0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
const OID_PRIME256V1: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
const OID_COMMON_NAME: &[u8] = &[0x06, 0x03, 0x55, 0x04, 0x03];

fn name(cn: &str) -> Vec<u8> {
    seq(&[set(&[seq(&[
        OID_COMMON_NAME.to_vec(),
        tlv(0x0c, cn.as_bytes()),
    ])])])
}

// ── Certificate ────────────────────────────────────────────────────────

/// Build a self-signed certificate, returning `(cert_der, key)`.
pub fn self_signed(cn: &str) -> (Vec<u8>, SecretKey) {
    let secret = SecretKey::random(&mut OsRng);
    let signing = SigningKey::from(&secret);
    let public = secret
        .public_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();

    let sig_alg = seq(&[OID_ECDSA_SHA256.to_vec()]);
    let spki = seq(&[
        seq(&[OID_EC_PUBLIC_KEY.to_vec(), OID_PRIME256V1.to_vec()]),
        bit_string(&public),
    ]);
    let mut serial = [0u8; 8];
    rand::RngCore::fill_bytes(&mut OsRng, &mut serial);

    let tbs = seq(&[
        // [0] EXPLICIT version v3
        tlv(0xa0, &integer(&[2])),
        integer(&serial),
        sig_alg.clone(),
        name(cn),
        seq(&[
            utc_time("250101000000Z"),
            utc_time("350101000000Z"),
        ]),
        name(cn),
        spki,
    ]);

    let sig: Signature = signing.sign(&tbs);
    let cert = seq(&[tbs, sig_alg, bit_string(sig.to_der().as_bytes())]);
    (cert, secret)
}

pub fn pem(label: &str, der: &[u8]) -> String {
    let encoded = BASE64.encode(der);
    let mut out = format!("-----BEGIN {}-----\n", label);
    for chunk in encoded.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap());
        out.push('\n');
    }
    out.push_str(&format!("-----END {}-----\n", label));
    out
}

/// Write `cert.pem` and `key.pem` (PKCS#8) into `dir`.
pub fn emit(cn: &str, dir: &std::path::Path) -> std::io::Result<()> {
    let (cert, secret) = self_signed(cn);
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join("cert.pem"), pem("CERTIFICATE", &cert))?;
    let key_pem = secret
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    std::fs::write(dir.join("key.pem"), key_pem.as_bytes())?;
    Ok(())
}
