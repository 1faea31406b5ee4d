//! Scenario E: distributed TLS 1.3 handshake against a real client.
//!
//! A hand-built TLS 1.3 client connects over localhost TCP. Its first
//! ClientHello offers only an x25519 key share while listing secp256r1 in
//! supported_groups, forcing a HelloRetryRequest; the second ClientHello
//! carries a P-256 share and the handshake proceeds through the
//! MPC-ECDH ServerHello, the encrypted flight, Finished in both
//! directions, and one application-data round trip.

mod common;

use std::io::Write as _;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use common::*;
use eph_common::{Pid, Role};
use eph_kernel::fd::{Fd, FdKind};
use eph_kernel::kernel::TlsSettings;
use eph_kernel::process::Process;
use eph_kernel::program::load_program;
use eph_kernel::syscall::{record_fields, Sys};
use eph_tls::aead::{RecordCipher, Suite};
use eph_tls::hs::{
    self, GROUP_SECP256R1, GROUP_X25519, HT_MESSAGE_HASH, SIG_ECDSA_SECP256R1_SHA256,
    SUITE_AES_128_GCM_SHA256, TLS13,
};
use eph_tls::keys;
use eph_tls::record::{read_record, write_record, ContentType};
use eph_tls::signer::LocalSigner;
use p256::ecdsa::signature::Verifier;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{AffinePoint, EncodedPoint, NonZeroScalar, ProjectivePoint};
use sha2::{Digest, Sha256};

// ── Client-side helpers ────────────────────────────────────────────────

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_vec16(buf: &mut Vec<u8>, v: &[u8]) {
    put_u16(buf, v.len() as u16);
    buf.extend_from_slice(v);
}

fn put_ext(buf: &mut Vec<u8>, id: u16, body: &[u8]) {
    put_u16(buf, id);
    put_vec16(buf, body);
}

fn client_hello(shares: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    put_u16(&mut body, 0x0303);
    body.extend_from_slice(&[0x13; 32]);
    body.push(0); // empty session id
    let mut suites = Vec::new();
    put_u16(&mut suites, SUITE_AES_128_GCM_SHA256);
    put_vec16(&mut body, &suites);
    body.push(1);
    body.push(0); // null compression

    let mut exts = Vec::new();
    let mut versions = vec![2];
    versions.extend_from_slice(&TLS13.to_be_bytes());
    put_ext(&mut exts, hs::EXT_SUPPORTED_VERSIONS, &versions);

    let mut groups = Vec::new();
    let mut group_list = Vec::new();
    put_u16(&mut group_list, GROUP_SECP256R1);
    put_u16(&mut group_list, GROUP_X25519);
    put_vec16(&mut groups, &group_list);
    put_ext(&mut exts, hs::EXT_SUPPORTED_GROUPS, &groups);

    let mut sigs = Vec::new();
    let mut sig_list = Vec::new();
    put_u16(&mut sig_list, SIG_ECDSA_SECP256R1_SHA256);
    put_vec16(&mut sigs, &sig_list);
    put_ext(&mut exts, hs::EXT_SIGNATURE_ALGORITHMS, &sigs);

    let mut key_share = Vec::new();
    let mut share_list = Vec::new();
    for (group, data) in shares {
        put_u16(&mut share_list, *group);
        put_vec16(&mut share_list, data);
    }
    put_vec16(&mut key_share, &share_list);
    put_ext(&mut exts, hs::EXT_KEY_SHARE, &key_share);

    put_vec16(&mut body, &exts);
    hs::wrap(hs::HT_CLIENT_HELLO, &body)
}

/// Pull the key-share payload out of a ServerHello; for an HRR the
/// extension carries only the selected group.
fn server_hello_key_share(msg: &[u8]) -> Vec<u8> {
    let mut pos = 4 + 2 + 32; // header, version, random
    let sid_len = msg[pos] as usize;
    pos += 1 + sid_len + 2 + 1; // session id, suite, compression
    let ext_len = u16::from_be_bytes([msg[pos], msg[pos + 1]]) as usize;
    pos += 2;
    let end = pos + ext_len;
    while pos < end {
        let id = u16::from_be_bytes([msg[pos], msg[pos + 1]]);
        let len = u16::from_be_bytes([msg[pos + 2], msg[pos + 3]]) as usize;
        pos += 4;
        if id == hs::EXT_KEY_SHARE {
            if len == 2 {
                return msg[pos..pos + 2].to_vec();
            }
            // group(2) ∥ u16 len ∥ key exchange
            return msg[pos + 4..pos + len].to_vec();
        }
        pos += len;
    }
    panic!("server hello without key_share");
}

fn transcript_hash(raw: &[u8]) -> [u8; 32] {
    Sha256::digest(raw).into()
}

struct ClientOutcome {
    saw_retry: bool,
    pong: Vec<u8>,
    cert_verified: bool,
}

/// Drive the client side of the handshake and one app-data round trip.
fn run_client(mut stream: TcpStream, verifier: p256::ecdsa::VerifyingKey) -> ClientOutcome {
    let beta = NonZeroScalar::random(&mut rand::rngs::OsRng);
    let beta_share = (ProjectivePoint::GENERATOR * *beta)
        .to_affine()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();

    let mut transcript: Vec<u8> = Vec::new();

    // First hello: x25519 share only. secp256r1 stays in supported_groups,
    // so the server must retry rather than fail.
    let ch1 = client_hello(&[(GROUP_X25519, vec![0x20; 32])]);
    write_record(&mut stream, ContentType::Handshake, &ch1).unwrap();
    transcript.extend_from_slice(&ch1);

    let (ct, payload) = read_record(&mut stream).unwrap();
    assert_eq!(ct, ContentType::Handshake);
    let saw_retry = hs::is_hello_retry(&payload);
    assert!(saw_retry, "expected HelloRetryRequest");
    assert_eq!(server_hello_key_share(&payload), GROUP_SECP256R1.to_be_bytes());

    // Synthetic-hash substitution, then append the HRR and the second
    // hello carrying the P-256 share.
    let ch1_hash = transcript_hash(&transcript);
    transcript.clear();
    transcript.extend_from_slice(&[HT_MESSAGE_HASH, 0, 0, 32]);
    transcript.extend_from_slice(&ch1_hash);
    transcript.extend_from_slice(&payload);

    let ch2 = client_hello(&[(GROUP_SECP256R1, beta_share)]);
    write_record(&mut stream, ContentType::Handshake, &ch2).unwrap();
    transcript.extend_from_slice(&ch2);

    let (ct, sh) = read_record(&mut stream).unwrap();
    assert_eq!(ct, ContentType::Handshake);
    assert!(!hs::is_hello_retry(&sh));
    transcript.extend_from_slice(&sh);

    // β · (combined server share) is the ECDH secret's X coordinate.
    let server_share = server_hello_key_share(&sh);
    let encoded = EncodedPoint::from_bytes(&server_share).unwrap();
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    let shared_point = ProjectivePoint::from(affine.expect("server share on curve")) * *beta;
    let shared = shared_point.to_affine().to_encoded_point(false);
    let secret = shared.x().unwrap().to_vec();

    let hello_hash = transcript_hash(&transcript);
    let hk = keys::handshake_keys(Suite::Aes128GcmSha256, &secret, &hello_hash);
    let mut server_cipher =
        RecordCipher::new(Suite::Aes128GcmSha256, &hk.server.key, hk.server.iv);
    let mut client_cipher =
        RecordCipher::new(Suite::Aes128GcmSha256, &hk.client.key, hk.client.iv);

    // Encrypted flight: EncryptedExtensions, Certificate,
    // CertificateVerify, Finished.
    let mut cert_verified = false;
    let mut server_finished_hash = [0u8; 32];
    for expected in [
        hs::HT_ENCRYPTED_EXTENSIONS,
        hs::HT_CERTIFICATE,
        hs::HT_CERTIFICATE_VERIFY,
        hs::HT_FINISHED,
    ] {
        let (ct, payload) = read_record(&mut stream).unwrap();
        assert_eq!(ct, ContentType::ApplicationData);
        let (inner, msg) = server_cipher.open(&payload).unwrap();
        assert_eq!(inner, ContentType::Handshake);
        assert_eq!(msg[0], expected, "flight order");

        match expected {
            hs::HT_CERTIFICATE_VERIFY => {
                // Signature covers the §4.4.3 content at the pre-CV
                // transcript point.
                let content = hs::certificate_verify_content(&transcript_hash(&transcript));
                let sig_der = {
                    let body = &msg[4..];
                    let sig_len = u16::from_be_bytes([body[2], body[3]]) as usize;
                    body[4..4 + sig_len].to_vec()
                };
                let sig = p256::ecdsa::Signature::from_der(&sig_der).unwrap();
                verifier.verify(&content, &sig).unwrap();
                cert_verified = true;
            }
            hs::HT_FINISHED => {
                let expect =
                    keys::finished_verify(&hk.server.secret, &transcript_hash(&transcript));
                assert_eq!(&msg[4..], &expect[..], "server Finished verify-data");
            }
            _ => {}
        }
        transcript.extend_from_slice(&msg);
        if expected == hs::HT_FINISHED {
            server_finished_hash = transcript_hash(&transcript);
        }
    }

    // Client Finished over the transcript including the server Finished.
    let verify = keys::finished_verify(&hk.client.secret, &server_finished_hash);
    let fin = hs::finished(&verify);
    let ct_payload = client_cipher.seal(ContentType::Handshake, &fin).unwrap();
    write_record(&mut stream, ContentType::ApplicationData, &ct_payload).unwrap();

    // Application keys bind the transcript at server Finished.
    let ak = keys::app_keys(
        Suite::Aes128GcmSha256,
        &hk.handshake_secret,
        &server_finished_hash,
    );
    let mut server_app = RecordCipher::new(Suite::Aes128GcmSha256, &ak.server.key, ak.server.iv);
    let mut client_app = RecordCipher::new(Suite::Aes128GcmSha256, &ak.client.key, ak.client.iv);

    let (ct, payload) = read_record(&mut stream).unwrap();
    assert_eq!(ct, ContentType::ApplicationData);
    let (inner, pong) = server_app.open(&payload).unwrap();
    assert_eq!(inner, ContentType::ApplicationData);

    let ping = client_app.seal(ContentType::ApplicationData, b"ping").unwrap();
    write_record(&mut stream, ContentType::ApplicationData, &ping).unwrap();
    stream.flush().unwrap();

    ClientOutcome {
        saw_retry,
        pong,
        cert_verified,
    }
}

// ── The scenario ───────────────────────────────────────────────────────

#[test]
fn test_distributed_handshake_with_retry() {
    let tmp = tempfile::tempdir().unwrap();
    write_program(
        tmp.path(),
        "tlssrv",
        &[
            ("init", 0),
            ("hs_ee", 1),
            ("hs_cert", 2),
            ("hs_cv", 3),
            ("hs_fin", 4),
            ("status", 5),
            ("pong", 6),
            ("read_ping", 7),
            ("check", 8),
        ],
    );

    // The program drives the handshake one message at a time; the TLS fd
    // lands at id 3 (after the inherited socket at 0 and stdio at 1, 2).
    let tls_fd = 3;
    let srv_fn = move |role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(&[], 1, Sys::Tlsserver, 0, None, None)),
        "StHsEe" => Ok(record_fields(
            &[],
            2,
            Sys::Tlshs,
            tls_fd,
            Some(&[]),
            Some(hs::HT_ENCRYPTED_EXTENSIONS as i32),
        )),
        "StHsCert" => Ok(record_fields(
            &[],
            3,
            Sys::Tlshs,
            tls_fd,
            Some(&[]),
            Some(hs::HT_CERTIFICATE as i32),
        )),
        "StHsCv" => Ok(record_fields(
            &[],
            4,
            Sys::Tlshs,
            tls_fd,
            Some(&[]),
            Some(hs::HT_CERTIFICATE_VERIFY as i32),
        )),
        "StHsFin" => Ok(record_fields(
            &[],
            5,
            Sys::Tlshs,
            tls_fd,
            Some(&[]),
            Some(hs::HT_FINISHED as i32),
        )),
        "StStatus" => Ok(record_fields(&[], 6, Sys::Tlsstatus, tls_fd, None, None)),
        "StPong" => Ok(record_fields(
            &[],
            7,
            Sys::Write,
            tls_fd,
            Some(b"pong"),
            Some(4),
        )),
        "StReadPing" => Ok(record_fields(
            &[],
            8,
            Sys::Read,
            tls_fd,
            Some(&[]),
            Some(64),
        )),
        "StCheck" => {
            let buf = argbuf_of(role, inputs);
            let ok = match role {
                Role::Garbler => arg0_of(inputs) == 4 && buf == b"ping",
                // The mirror's transport is silent.
                Role::Evaluator => arg0_of(inputs) == 0 && buf.is_empty(),
            };
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    let mut gf = FnFactory::new();
    gf.insert("tlssrv", srv_fn);
    let mut ef = FnFactory::new();
    ef.insert("tlssrv", srv_fn);

    // Both peers share the certificate and the (threshold) signer handle;
    // with one address space that is literally the same object.
    let signer = Arc::new(LocalSigner::generate());
    let verifier = signer.verifying_key().clone();
    let cert_der = vec![0x30, 0x03, 0x02, 0x01, 0x00];
    let tls = |signer: Arc<LocalSigner>| TlsSettings {
        cert_der: cert_der.clone(),
        suite: Suite::Aes128GcmSha256,
        signer,
    };
    let (gk, ek) = paired_kernels(
        tmp.path(),
        tmp.path(),
        gf,
        ef,
        Some((tls(Arc::clone(&signer)), tls(signer))),
    );

    // Real TCP between the client and the garbler-held socket.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = std::thread::spawn(move || {
        let stream = TcpStream::connect(addr).unwrap();
        run_client(stream, verifier)
    });
    let (accepted, _) = listener.accept().unwrap();

    // Hand the accepted socket to the process as an inherited fd 0.
    let template = {
        let prog = load_program(&tmp.path().join("tlssrv")).unwrap();
        let p = Process::new(Role::Garbler, Pid::new(9999, 9999), prog, vec![]);
        p.fds.lock().insert_at(0, Fd::new(FdKind::Socket(accepted)));
        p
    };
    let proc = gk.spawn_program("tlssrv", vec![], Some(&template)).unwrap();

    assert_eq!(proc.wait_zombie(), 0, "garbler-side server completed");
    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 0, "evaluator-side mirror completed");

    let outcome = client.join().unwrap();
    assert!(outcome.saw_retry);
    assert!(outcome.cert_verified);
    assert_eq!(outcome.pong, b"pong");
}
