//! Server handshake state machine.
//!
//! The machine runs **RecvClientHello → (HelloRetryRequest ↔
//! RecvClientHello) → SendServerHello → SendEncryptedExtensions →
//! SendCertificate → SendCertificateVerify → SendFinished →
//! RecvClientFinished → Established**, but it is driven from outside in
//! three stages, matching the kernel's syscall surface:
//!
//! 1. [`ServerConnection::read_client_kex`] consumes ClientHello records
//!    (issuing a HelloRetryRequest exactly when the client offered no
//!    secp256r1 key share) and stops at the key-share decision point.
//! 2. The kernel runs the cross-peer ECDH and calls
//!    [`ServerConnection::send_server_hello`] with the combined share and
//!    the shared secret, which installs the handshake keys.
//! 3. The MPC-space program requests the remaining flight one message at a
//!    time through [`ServerConnection::next_handshake`], then
//!    [`ServerConnection::complete`] consumes the client Finished and
//!    switches to application keys.
//!
//! The evaluator holds a mirror connection over [`NullIo`]: same transcript,
//! same key schedule, no bytes on the wire.

use std::io::{self, Read, Write};

use rand::RngCore;

use crate::aead::{RecordCipher, Suite};
use crate::alert::{Alert, AlertDesc};
use crate::error::TlsError;
use crate::hs::{self, ClientHello};
use crate::keys::{self, HandshakeKeys, Transcript};
use crate::record::{read_record, write_record, ContentType};
use crate::signer::TranscriptSigner;

// ── Null transport ─────────────────────────────────────────────────────

/// The evaluator's transport: writes are swallowed, reads yield EOF.
pub struct NullIo;

impl Read for NullIo {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for NullIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Configuration ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ServerConfig {
    /// DER-encoded server certificate.
    pub cert_der: Vec<u8>,
    pub suite: Suite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for an acceptable ClientHello.
    Start,
    /// ClientHello accepted; the kernel owes us the ECDH result.
    NeedKex,
    /// ServerHello written, handshake keys live.
    HelloSent,
    /// Server Finished written; client Finished outstanding.
    FinishedSent,
    Established,
}

/// What `read_client_kex` hands back to the kernel.
pub struct ClientKex {
    /// The full ClientHello handshake message (sent to the peer kernel).
    pub hello_msg: Vec<u8>,
    /// The client's secp256r1 key-exchange octets.
    pub p256_share: Vec<u8>,
}

// ── Connection ─────────────────────────────────────────────────────────

pub struct ServerConnection<S> {
    transport: S,
    config: ServerConfig,
    transcript: Transcript,
    phase: Phase,
    retried: bool,
    session_id: Vec<u8>,
    hs_keys: Option<HandshakeKeys>,
    write_cipher: Option<RecordCipher>,
    read_cipher: Option<RecordCipher>,
    server_finished_hash: Option<[u8; 32]>,
}

impl ServerConnection<NullIo> {
    /// Evaluator-side mirror: seeded with the garbler's raw transcript
    /// (ClientHello…ServerHello) and the shared secret, it runs the same
    /// key schedule with no live transport.
    pub fn mirror(config: ServerConfig, transcript_raw: Vec<u8>, shared_secret: &[u8]) -> Self {
        let mut conn = ServerConnection {
            transport: NullIo,
            config,
            transcript: Transcript::seed(transcript_raw),
            phase: Phase::HelloSent,
            retried: false,
            session_id: Vec::new(),
            hs_keys: None,
            write_cipher: None,
            read_cipher: None,
            server_finished_hash: None,
        };
        conn.install_handshake_keys(shared_secret);
        conn
    }
}

impl<S: Read + Write> ServerConnection<S> {
    pub fn new(transport: S, config: ServerConfig) -> ServerConnection<S> {
        ServerConnection {
            transport,
            config,
            transcript: Transcript::new(),
            phase: Phase::Start,
            retried: false,
            session_id: Vec::new(),
            hs_keys: None,
            read_cipher: None,
            write_cipher: None,
            server_finished_hash: None,
        }
    }

    pub fn is_established(&self) -> bool {
        self.phase == Phase::Established
    }

    pub fn transcript_raw(&self) -> &[u8] {
        self.transcript.raw()
    }

    pub fn transcript_hash(&self) -> [u8; 32] {
        self.transcript.hash()
    }

    pub fn handshake_keys(&self) -> Option<&HandshakeKeys> {
        self.hs_keys.as_ref()
    }

    /// Emit a fatal alert and return the matching error; a failure to
    /// deliver the alert is chained, the original alert wins.
    pub fn abort(&mut self, desc: AlertDesc) -> TlsError {
        let alert = Alert::fatal(desc);
        let res = if let Some(cipher) = self.write_cipher.as_mut() {
            cipher
                .seal(ContentType::Alert, &alert.encode())
                .and_then(|ct| write_record(&mut self.transport, ContentType::ApplicationData, &ct))
        } else {
            write_record(&mut self.transport, ContentType::Alert, &alert.encode())
        };
        let write_err = match res {
            Ok(()) => None,
            Err(TlsError::Io(e)) => Some(e),
            Err(_) => None,
        };
        TlsError::Alert { desc, write_err }
    }

    // ── Stage 1: ClientHello ───────────────────────────────────────────

    /// Read ClientHello records until one passes policy with a secp256r1
    /// key share, retrying at most once via HelloRetryRequest.
    pub fn read_client_kex(&mut self) -> Result<ClientKex, TlsError> {
        if self.phase != Phase::Start {
            return Err(TlsError::State("client hello already consumed"));
        }
        loop {
            let (ct, payload) = read_record(&mut self.transport)?;
            let msg = match ct {
                ContentType::ChangeCipherSpec if payload == [1] => continue,
                ContentType::ChangeCipherSpec => {
                    return Err(self.abort(AlertDesc::UnexpectedMessage))
                }
                ContentType::Alert => {
                    let alert = Alert::parse(&payload)
                        .ok_or_else(|| TlsError::alert(AlertDesc::DecodeError))?;
                    return Err(TlsError::PeerAlert(alert));
                }
                ContentType::ApplicationData => {
                    return Err(self.abort(AlertDesc::UnexpectedMessage))
                }
                ContentType::Handshake => payload,
            };

            let (ht, full, rest) = hs::split_message(&msg)?;
            if ht != hs::HT_CLIENT_HELLO || !rest.is_empty() {
                return Err(self.abort(AlertDesc::UnexpectedMessage));
            }
            let hello = match hs::parse_client_hello(full) {
                Ok(h) => h,
                Err(_) => return Err(self.abort(AlertDesc::DecodeError)),
            };

            self.check_policy(&hello)?;

            if let Some(share) = hello.key_share_for(hs::GROUP_SECP256R1) {
                self.session_id = hello.session_id.clone();
                self.transcript.push(full);
                self.phase = Phase::NeedKex;
                return Ok(ClientKex {
                    hello_msg: full.to_vec(),
                    p256_share: share.to_vec(),
                });
            }

            // No usable share. Retry exactly once; the group itself passed
            // policy above, so the client can comply.
            if self.retried {
                return Err(self.abort(AlertDesc::IllegalParameter));
            }
            self.transcript.push(full);
            self.transcript.retry();
            let hrr = hs::hello_retry_request(&hello.session_id, self.config.suite.id());
            write_record(&mut self.transport, ContentType::Handshake, &hrr)?;
            self.transcript.push(&hrr);
            self.retried = true;
        }
    }

    fn check_policy(&mut self, hello: &ClientHello) -> Result<(), TlsError> {
        if !hello.versions.contains(&hs::TLS13) {
            return Err(self.abort(AlertDesc::ProtocolVersion));
        }
        if !hello.cipher_suites.contains(&self.config.suite.id()) {
            return Err(self.abort(AlertDesc::HandshakeFailure));
        }
        if !hello.groups.contains(&hs::GROUP_SECP256R1) {
            return Err(self.abort(AlertDesc::HandshakeFailure));
        }
        if !hello.sig_schemes.contains(&hs::SIG_ECDSA_SECP256R1_SHA256) {
            return Err(self.abort(AlertDesc::HandshakeFailure));
        }
        Ok(())
    }

    // ── Stage 2: ServerHello + key schedule ────────────────────────────

    /// Write the ServerHello carrying the combined key share, then derive
    /// the handshake traffic keys from the MPC-produced shared secret.
    pub fn send_server_hello(
        &mut self,
        server_share: &[u8],
        shared_secret: &[u8],
    ) -> Result<(), TlsError> {
        if self.phase != Phase::NeedKex {
            return Err(TlsError::State("no pending key exchange"));
        }
        let mut random = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut random);
        let sh = hs::server_hello(
            &random,
            &self.session_id,
            self.config.suite.id(),
            server_share,
        );
        write_record(&mut self.transport, ContentType::Handshake, &sh)?;
        self.transcript.push(&sh);
        self.install_handshake_keys(shared_secret);
        Ok(())
    }

    fn install_handshake_keys(&mut self, shared_secret: &[u8]) {
        let suite = self.config.suite;
        let hk = keys::handshake_keys(suite, shared_secret, &self.transcript.hash());
        self.write_cipher = Some(RecordCipher::new(suite, &hk.server.key, hk.server.iv));
        self.read_cipher = Some(RecordCipher::new(suite, &hk.client.key, hk.client.iv));
        self.hs_keys = Some(hk);
        self.phase = Phase::HelloSent;
    }

    // ── Stage 3: encrypted flight ──────────────────────────────────────

    /// Produce, encrypt and send the next handshake message. Returns the
    /// plaintext message so the circuit can append it to its transcript.
    ///
    /// For `Finished`, `data` carries the circuit-computed verify-data; an
    /// empty `data` falls back to the locally derived value.
    pub fn next_handshake(
        &mut self,
        ht: u8,
        data: &[u8],
        signer: &dyn TranscriptSigner,
    ) -> Result<Vec<u8>, TlsError> {
        if self.phase != Phase::HelloSent {
            return Err(TlsError::State("handshake flight not open"));
        }
        let msg = match ht {
            hs::HT_ENCRYPTED_EXTENSIONS => hs::encrypted_extensions(),
            hs::HT_CERTIFICATE => hs::certificate(&self.config.cert_der),
            hs::HT_CERTIFICATE_VERIFY => {
                let content = hs::certificate_verify_content(&self.transcript.hash());
                let sig = signer.sign(&content)?;
                hs::certificate_verify(signer.scheme(), &sig)
            }
            hs::HT_FINISHED => {
                let verify_data = if data.is_empty() {
                    let hk = self
                        .hs_keys
                        .as_ref()
                        .ok_or(TlsError::State("no handshake keys"))?;
                    keys::finished_verify(&hk.server.secret, &self.transcript.hash()).to_vec()
                } else {
                    data.to_vec()
                };
                hs::finished(&verify_data)
            }
            _ => return Err(TlsError::State("unsupported handshake request")),
        };

        let cipher = self
            .write_cipher
            .as_mut()
            .ok_or(TlsError::State("no write cipher"))?;
        let ct = cipher.seal(ContentType::Handshake, &msg)?;
        write_record(&mut self.transport, ContentType::ApplicationData, &ct)?;

        self.transcript.push(&msg);
        if ht == hs::HT_FINISHED {
            self.server_finished_hash = Some(self.transcript.hash());
            self.phase = Phase::FinishedSent;
        }
        Ok(msg)
    }

    /// Write a record the circuit already encrypted, appending its trailing
    /// plaintext section to the transcript (the `ht = 0` continuation).
    pub fn write_premade_record(&mut self, record: &[u8], tail: &[u8]) -> Result<(), TlsError> {
        self.transport.write_all(record)?;
        self.transport.flush()?;
        self.transcript.push(tail);
        Ok(())
    }

    /// Consume the client Finished, verify it, and switch to application
    /// traffic keys.
    pub fn complete(&mut self) -> Result<(), TlsError> {
        if self.phase != Phase::FinishedSent {
            return Err(TlsError::State("server finished not yet sent"));
        }
        let finished_hash = self
            .server_finished_hash
            .ok_or(TlsError::State("missing finished hash"))?;

        loop {
            let (ct, payload) = read_record(&mut self.transport)?;
            match ct {
                ContentType::ChangeCipherSpec => continue,
                ContentType::Alert => {
                    let alert = Alert::parse(&payload)
                        .ok_or_else(|| TlsError::alert(AlertDesc::DecodeError))?;
                    return Err(TlsError::PeerAlert(alert));
                }
                ContentType::Handshake => {
                    return Err(self.abort(AlertDesc::UnexpectedMessage));
                }
                ContentType::ApplicationData => {
                    let cipher = self
                        .read_cipher
                        .as_mut()
                        .ok_or(TlsError::State("no read cipher"))?;
                    let (inner, pt) = cipher.open(&payload)?;
                    match inner {
                        ContentType::Handshake => {
                            let (ht, full, _) = hs::split_message(&pt)?;
                            if ht != hs::HT_FINISHED {
                                return Err(self.abort(AlertDesc::UnexpectedMessage));
                            }
                            let hk = self
                                .hs_keys
                                .as_ref()
                                .ok_or(TlsError::State("no handshake keys"))?;
                            let expect =
                                keys::finished_verify(&hk.client.secret, &finished_hash);
                            if full[4..] != expect {
                                return Err(self.abort(AlertDesc::DecryptError));
                            }
                            self.install_app_keys();
                            return Ok(());
                        }
                        ContentType::Alert => {
                            let alert = Alert::parse(&pt)
                                .ok_or_else(|| TlsError::alert(AlertDesc::DecodeError))?;
                            return Err(TlsError::PeerAlert(alert));
                        }
                        _ => return Err(self.abort(AlertDesc::UnexpectedMessage)),
                    }
                }
            }
        }
    }

    /// Mirror-side completion: no client Finished to read, just the key
    /// switch. The application secrets bind the transcript at server
    /// Finished, so both peers derive identical keys.
    pub fn complete_mirror(&mut self) -> Result<(), TlsError> {
        if self.phase != Phase::FinishedSent {
            return Err(TlsError::State("server finished not yet sent"));
        }
        self.install_app_keys();
        Ok(())
    }

    fn install_app_keys(&mut self) {
        let suite = self.config.suite;
        let hk = self.hs_keys.as_ref().expect("handshake keys installed");
        let finished_hash = self.server_finished_hash.expect("finished hash recorded");
        let ak = keys::app_keys(suite, &hk.handshake_secret, &finished_hash);
        self.write_cipher = Some(RecordCipher::new(suite, &ak.server.key, ak.server.iv));
        self.read_cipher = Some(RecordCipher::new(suite, &ak.client.key, ak.client.iv));
        self.phase = Phase::Established;
    }

    // ── Application data ───────────────────────────────────────────────

    /// Read one application-data payload. `Ok(None)` is a clean
    /// `close_notify` EOF.
    pub fn app_read(&mut self) -> Result<Option<Vec<u8>>, TlsError> {
        if self.phase != Phase::Established {
            return Err(TlsError::State("not established"));
        }
        loop {
            let (ct, payload) = read_record(&mut self.transport)?;
            match ct {
                ContentType::ChangeCipherSpec => continue,
                ContentType::Alert => {
                    let alert = Alert::parse(&payload)
                        .ok_or_else(|| TlsError::alert(AlertDesc::DecodeError))?;
                    if alert.desc == AlertDesc::CloseNotify {
                        return Ok(None);
                    }
                    return Err(TlsError::PeerAlert(alert));
                }
                ContentType::Handshake => {
                    // Post-handshake messages (tickets, key updates) are
                    // outside the accepted surface.
                    return Err(self.abort(AlertDesc::UnexpectedMessage));
                }
                ContentType::ApplicationData => {
                    let cipher = self
                        .read_cipher
                        .as_mut()
                        .ok_or(TlsError::State("no read cipher"))?;
                    let (inner, pt) = cipher.open(&payload)?;
                    match inner {
                        ContentType::ApplicationData => return Ok(Some(pt)),
                        ContentType::Alert => {
                            let alert = Alert::parse(&pt)
                                .ok_or_else(|| TlsError::alert(AlertDesc::DecodeError))?;
                            if alert.desc == AlertDesc::CloseNotify {
                                return Ok(None);
                            }
                            return Err(TlsError::PeerAlert(alert));
                        }
                        _ => return Err(self.abort(AlertDesc::UnexpectedMessage)),
                    }
                }
            }
        }
    }

    /// Write application data, fragmenting to the record size limit.
    pub fn app_write(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        if self.phase != Phase::Established {
            return Err(TlsError::State("not established"));
        }
        for chunk in data.chunks(16384) {
            let cipher = self
                .write_cipher
                .as_mut()
                .ok_or(TlsError::State("no write cipher"))?;
            let ct = cipher.seal(ContentType::ApplicationData, chunk)?;
            write_record(&mut self.transport, ContentType::ApplicationData, &ct)?;
        }
        Ok(data.len())
    }
}
