//! L4 — Network Transport. A line-oriented duplex channel over plaintext or
//! TLS (§4.4): bounded write queue, read loop with oversize-line
//! resync, and a terminal `Disconnected` signal emitted exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::{TlsConnector, rustls};

use crate::constants::MAX_LINE_BYTES;
use crate::errors::{IrcClientError, Result};

pub const DEFAULT_WRITE_QUEUE_CAP: usize = 1024;

/// Events the transport's read side surfaces to its owner (normally L8/L9).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Line(String),
    /// Emitted exactly once, whichever side initiated the close.
    Disconnected(String),
}

#[async_trait]
pub trait NetworkTransport: Send + Sync {
    /// Enqueue a line for writing. Fails with `Backpressured` if the queue
    /// cap is exceeded (§4.4).
    async fn send_line(&self, line: String) -> Result<()>;
    async fn close(&self, reason: String);
}

/// Accumulates inbound bytes and splits them into lines on CR, LF, or CRLF.
/// Oversize lines are dropped with a warning and the buffer is resynced to
/// the next terminator, per §4.4.
struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    fn new() -> Self {
        LineSplitter { buf: Vec::new() }
    }

    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();

        loop {
            let Some(nl) = self.buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let mut line_bytes = self.buf.drain(..=nl).collect::<Vec<u8>>();
            line_bytes.pop(); // trailing \n
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.pop();
            }

            if line_bytes.len() > MAX_LINE_BYTES {
                warn!("dropping oversize inbound line ({} bytes)", line_bytes.len());
                continue;
            }

            match String::from_utf8(line_bytes) {
                Ok(line) => lines.push(line),
                Err(e) => warn!("dropping non-UTF-8 inbound line: {e}"),
            }
        }

        // Guard against an unterminated line growing without bound.
        if self.buf.len() > MAX_LINE_BYTES * 2 {
            warn!("inbound buffer exceeded resync threshold; discarding and resyncing");
            self.buf.clear();
        }

        lines
    }
}

/// Writer task shared by both transport kinds: drains a bounded channel and
/// writes each line (CRLF-terminated) to `sink`.
async fn run_writer<W: tokio::io::AsyncWrite + Unpin>(
    mut sink: W,
    mut rx: mpsc::Receiver<String>,
) {
    while let Some(line) = rx.recv().await {
        let mut bytes = line.into_bytes();
        bytes.extend_from_slice(b"\r\n");
        if let Err(e) = sink.write_all(&bytes).await {
            warn!("transport write failed: {e}");
            break;
        }
    }
}

/// Reader task shared by both transport kinds: splits inbound bytes into
/// lines and forwards them, emitting `Disconnected` exactly once on EOF or error.
async fn run_reader<R: tokio::io::AsyncRead + Unpin>(
    mut source: R,
    events_tx: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
) {
    let mut splitter = LineSplitter::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => {
                emit_disconnect_once(&events_tx, &closed, "peer closed connection".to_string()).await;
                return;
            }
            Ok(n) => n,
            Err(e) => {
                emit_disconnect_once(&events_tx, &closed, format!("read error: {e}")).await;
                return;
            }
        };
        for line in splitter.feed(&buf[..n]) {
            if events_tx.send(TransportEvent::Line(line)).await.is_err() {
                return;
            }
        }
    }
}

async fn emit_disconnect_once(
    events_tx: &mpsc::Sender<TransportEvent>,
    closed: &Arc<AtomicBool>,
    reason: String,
) {
    if !closed.swap(true, Ordering::AcqRel) {
        info!("transport disconnected: {reason}");
        let _ = events_tx.send(TransportEvent::Disconnected(reason)).await;
    }
}

pub struct TcpLineTransport {
    write_tx: mpsc::Sender<String>,
    closed: Arc<AtomicBool>,
}

impl TcpLineTransport {
    pub async fn connect(
        host: &str,
        port: u16,
        write_queue_cap: usize,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let stream = TcpStream::connect((host, port)).await?;
        let (read_half, write_half) = tokio::io::split(stream);

        let (write_tx, write_rx) = mpsc::channel(write_queue_cap);
        let (events_tx, events_rx) = mpsc::channel(write_queue_cap);
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_writer(write_half, write_rx));
        tokio::spawn(run_reader(read_half, events_tx, closed.clone()));

        Ok((TcpLineTransport { write_tx, closed }, events_rx))
    }
}

#[async_trait]
impl NetworkTransport for TcpLineTransport {
    async fn send_line(&self, line: String) -> Result<()> {
        self.write_tx
            .try_send(line)
            .map_err(|_| IrcClientError::Backpressured)
    }

    async fn close(&self, reason: String) {
        info!("closing TCP transport: {reason}");
        self.closed.store(true, Ordering::Release);
    }
}

/// Certificate verifier that accepts anything, used only when
/// `ConnectionInfo.verify_ssl_cert` is false. The orchestrator is
/// responsible for emitting the accompanying warning event (§4.4).
#[derive(Debug)]
struct AcceptAllCerts;

impl rustls::client::danger::ServerCertVerifier for AcceptAllCerts {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

fn build_tls_config(verify_ssl_cert: bool) -> Result<rustls::ClientConfig> {
    if !verify_ssl_cert {
        warn!("TLS certificate verification disabled; accepting any server certificate");
        return Ok(rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAllCerts))
            .with_no_client_auth());
    }

    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!("error loading a native root certificate: {err}");
    }
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            warn!("failed to add native root certificate: {e}");
        }
    }

    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

pub struct TlsLineTransport {
    write_tx: mpsc::Sender<String>,
    closed: Arc<AtomicBool>,
}

impl TlsLineTransport {
    pub async fn connect(
        host: &str,
        port: u16,
        verify_ssl_cert: bool,
        write_queue_cap: usize,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let tcp = TcpStream::connect((host, port)).await?;
        let config = build_tls_config(verify_ssl_cert)?;
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| IrcClientError::TlsHandshake(format!("invalid server name: {e}")))?;

        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| IrcClientError::TlsHandshake(e.to_string()))?;

        let (read_half, write_half) = tokio::io::split(tls_stream);

        let (write_tx, write_rx) = mpsc::channel(write_queue_cap);
        let (events_tx, events_rx) = mpsc::channel(write_queue_cap);
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_writer(write_half, write_rx));
        tokio::spawn(run_reader(read_half, events_tx, closed.clone()));

        Ok((TlsLineTransport { write_tx, closed }, events_rx))
    }
}

#[async_trait]
impl NetworkTransport for TlsLineTransport {
    async fn send_line(&self, line: String) -> Result<()> {
        self.write_tx
            .try_send(line)
            .map_err(|_| IrcClientError::Backpressured)
    }

    async fn close(&self, reason: String) {
        info!("closing TLS transport: {reason}");
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_crlf_cr_and_lf_terminated_lines() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.feed(b"PING :a\r\nNOTICE x :b\nQUIT\r\n");
        assert_eq!(lines, vec!["PING :a", "NOTICE x :b", "QUIT"]);
    }

    #[test]
    fn partial_line_is_buffered_until_terminator_arrives() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.feed(b"PRIVMSG #chan :he").is_empty());
        let lines = splitter.feed(b"llo\r\n");
        assert_eq!(lines, vec!["PRIVMSG #chan :hello"]);
    }

    #[test]
    fn oversize_line_is_dropped_and_buffer_resyncs() {
        let mut splitter = LineSplitter::new();
        let huge = "A".repeat(MAX_LINE_BYTES + 10);
        let mut input = huge.into_bytes();
        input.extend_from_slice(b"\r\n");
        input.extend_from_slice(b"PING :ok\r\n");
        let lines = splitter.feed(&input);
        assert_eq!(lines, vec!["PING :ok"]);
    }
}
