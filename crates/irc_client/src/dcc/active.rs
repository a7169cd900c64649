//! Active DCC transfers: the sender opens a listening socket and advertises
//! its address; the receiver dials straight to the advertised endpoint
//! (§4.10 "Active SEND").

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use log::{info, warn};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::errors::{IrcClientError, Result};
use crate::event_bus::EventBus;
use crate::state::StateStore;

use super::ratelimit::TokenBucket;
use super::{emit_status_line, ChecksumAlgorithm, DccRegistry, DccState, DEFAULT_CHUNK_SIZE};

/// Bind a listening socket to the first free port in `[start, end]`
/// (§4.10: "a port in `[port_range_start, port_range_end]`").
pub async fn bind_in_range(start: u16, end: u16) -> Result<(TcpListener, u16)> {
    for port in start..=end {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => return Ok((listener, port)),
            Err(_) => continue,
        }
    }
    Err(IrcClientError::TransportIo(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        format!("no free port in range {start}..={end}"),
    )))
}

/// The IP this client advertises in outbound `DCC SEND` offers: the
/// configured override, or the local address of an already-bound socket.
pub fn advertised_ip(configured: Option<Ipv4Addr>, local_addr: SocketAddr) -> Ipv4Addr {
    configured.unwrap_or_else(|| match local_addr.ip() {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    })
}

/// Accept exactly one peer connection on `listener`, then stream `path`'s
/// contents to it in bounded, rate-limited chunks, updating the transfer
/// record as it goes (§4.10, §5).
pub async fn run_active_send(
    transfer_id: String,
    registry: Arc<DccRegistry>,
    store: Arc<StateStore>,
    events: Arc<EventBus>,
    listener: TcpListener,
    checksum_verify: bool,
) {
    registry.with_transfer(&transfer_id, |t| {
        let now = chrono::Utc::now().timestamp_millis();
        let _ = t.transition(DccState::Connecting, now);
    });

    let (stream, peer_addr) = match listener.accept().await {
        Ok(pair) => pair,
        Err(e) => {
            fail(&registry, &store, &events, &transfer_id, format!("accept failed: {e}"));
            return;
        }
    };
    info!("DCC SEND {transfer_id}: peer connected from {peer_addr}");

    let Some(transfer) = registry.get(&transfer_id) else { return };
    let file = match tokio::fs::File::open(&transfer.local_path).await {
        Ok(f) => f,
        Err(e) => {
            fail(&registry, &store, &events, &transfer_id, format!("cannot open source file: {e}"));
            return;
        }
    };

    stream_to_peer(
        transfer_id,
        registry,
        store,
        events,
        stream,
        file,
        transfer.resume_offset,
        transfer.rate_limit_bytes_per_sec,
        checksum_verify,
    )
    .await;
}

/// Dial out to the peer's advertised `(ip, port)` and receive the file into
/// the already-security-checked `destination` path.
pub async fn run_active_receive(
    transfer_id: String,
    registry: Arc<DccRegistry>,
    store: Arc<StateStore>,
    events: Arc<EventBus>,
    addr: SocketAddr,
    checksum_verify: bool,
) {
    registry.with_transfer(&transfer_id, |t| {
        let now = chrono::Utc::now().timestamp_millis();
        let _ = t.transition(DccState::Connecting, now);
    });

    let stream = match TcpStream::connect(addr).await {
        Ok(s) => s,
        Err(e) => {
            fail(&registry, &store, &events, &transfer_id, format!("connect to {addr} failed: {e}"));
            return;
        }
    };

    let Some(transfer) = registry.get(&transfer_id) else { return };
    let mut open_opts = tokio::fs::OpenOptions::new();
    open_opts.create(true).write(true);
    if transfer.resume_offset > 0 {
        open_opts.append(true);
    } else {
        open_opts.truncate(true);
    }
    let file = match open_opts.open(&transfer.local_path).await {
        Ok(f) => f,
        Err(e) => {
            fail(&registry, &store, &events, &transfer_id, format!("cannot create destination file: {e}"));
            return;
        }
    };

    receive_from_peer(
        transfer_id,
        registry,
        store,
        events,
        stream,
        file,
        checksum_verify,
    )
    .await;
}

/// Shared send-side loop used by both active and passive SEND once a socket
/// is connected.
pub async fn stream_to_peer(
    transfer_id: String,
    registry: Arc<DccRegistry>,
    store: Arc<StateStore>,
    events: Arc<EventBus>,
    mut stream: TcpStream,
    mut file: tokio::fs::File,
    resume_offset: u64,
    rate_limit_bytes_per_sec: u64,
    checksum_verify: bool,
) {
    use tokio::io::AsyncSeekExt;

    registry.with_transfer(&transfer_id, |t| {
        let now = chrono::Utc::now().timestamp_millis();
        let _ = t.transition(DccState::Transferring, now);
    });

    if resume_offset > 0 {
        if let Err(e) = file.seek(std::io::SeekFrom::Start(resume_offset)).await {
            fail(&registry, &store, &events, &transfer_id, format!("seek to resume offset failed: {e}"));
            return;
        }
    }

    let mut bucket = (rate_limit_bytes_per_sec > 0).then(|| TokenBucket::new(rate_limit_bytes_per_sec));
    let mut hasher = checksum_verify.then(Sha256::new);
    let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];

    loop {
        let n = match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                fail(&registry, &store, &events, &transfer_id, format!("read error: {e}"));
                return;
            }
        };

        if let Some(bucket) = bucket.as_mut() {
            bucket.acquire(n).await;
        }
        if let Err(e) = stream.write_all(&buf[..n]).await {
            fail(&registry, &store, &events, &transfer_id, format!("write error: {e}"));
            return;
        }
        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&buf[..n]);
        }

        let now = chrono::Utc::now().timestamp_millis();
        registry.with_transfer(&transfer_id, |t| t.record_progress(n as u64, now));
        tokio::task::yield_now().await;
    }

    if let Some(hasher) = hasher {
        let digest = format!("{:x}", hasher.finalize());
        registry.with_transfer(&transfer_id, |t| {
            t.checksum_algorithm = Some(ChecksumAlgorithm::Sha256);
            t.computed_digest = Some(digest);
        });
    }

    complete(&registry, &store, &events, &transfer_id);
}

/// Shared receive-side loop used by both active and passive GET once a
/// socket is connected and the destination file is open.
pub async fn receive_from_peer(
    transfer_id: String,
    registry: Arc<DccRegistry>,
    store: Arc<StateStore>,
    events: Arc<EventBus>,
    mut stream: TcpStream,
    mut file: tokio::fs::File,
    checksum_verify: bool,
) {
    registry.with_transfer(&transfer_id, |t| {
        let now = chrono::Utc::now().timestamp_millis();
        let _ = t.transition(DccState::Transferring, now);
    });

    let Some(transfer) = registry.get(&transfer_id) else { return };
    let rate_limit = transfer.rate_limit_bytes_per_sec;
    let expected_size = transfer.expected_size;

    let mut bucket = (rate_limit > 0).then(|| TokenBucket::new(rate_limit));
    let mut hasher = checksum_verify.then(Sha256::new);
    let mut buf = vec![0u8; DEFAULT_CHUNK_SIZE];
    let mut received = transfer.bytes_transferred;

    while received < expected_size {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                fail(&registry, &store, &events, &transfer_id, format!("read error: {e}"));
                return;
            }
        };

        if let Some(bucket) = bucket.as_mut() {
            bucket.acquire(n).await;
        }
        if let Err(e) = file.write_all(&buf[..n]).await {
            fail(&registry, &store, &events, &transfer_id, format!("write error: {e}"));
            return;
        }
        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&buf[..n]);
        }

        received += n as u64;
        let now = chrono::Utc::now().timestamp_millis();
        registry.with_transfer(&transfer_id, |t| t.record_progress(n as u64, now));
        tokio::task::yield_now().await;
    }

    if received < expected_size {
        fail(
            &registry,
            &store,
            &events,
            &transfer_id,
            format!("connection closed after {received}/{expected_size} bytes"),
        );
        return;
    }

    if let Some(hasher) = hasher {
        let digest = format!("{:x}", hasher.finalize());
        let expected = registry.get(&transfer_id).and_then(|t| t.expected_digest.clone());
        registry.with_transfer(&transfer_id, |t| {
            t.checksum_algorithm = Some(ChecksumAlgorithm::Sha256);
            t.computed_digest = Some(digest.clone());
        });
        if let Some(expected) = expected {
            if expected != digest {
                registry.with_transfer(&transfer_id, |t| {
                    let now = chrono::Utc::now().timestamp_millis();
                    let _ = t.transition(DccState::Failed, now);
                });
                emit_status_line(
                    &store,
                    &events,
                    "DCC_TRANSFER_FAILED",
                    format!("DCC transfer {transfer_id}: checksum mismatch"),
                    chrono::Utc::now().timestamp_millis(),
                );
                return;
            }
        }
    }

    complete(&registry, &store, &events, &transfer_id);
}

/// Honor a peer's `DCC RESUME <filename> <port> <position>`: record the
/// requested offset and build the `DCC ACCEPT` reply to send back before the
/// peer connects (§4.10).
pub fn handle_resume_request(registry: &DccRegistry, transfer_id: &str, filename: &str, port: u16, position: u64) -> Option<String> {
    registry.with_transfer(transfer_id, |t| {
        t.resume_offset = position;
    })?;
    Some(super::ctcp::encode_accept(filename, port, position))
}

fn fail(registry: &DccRegistry, store: &StateStore, events: &EventBus, transfer_id: &str, reason: String) {
    warn!("DCC transfer {transfer_id} failed: {reason}");
    let now = chrono::Utc::now().timestamp_millis();
    registry.with_transfer(transfer_id, |t| {
        let _ = t.transition(DccState::Failed, now);
    });
    emit_status_line(
        store,
        events,
        "DCC_TRANSFER_FAILED",
        format!("DCC transfer {transfer_id} failed: {reason}"),
        now,
    );
}

fn complete(registry: &DccRegistry, store: &StateStore, events: &EventBus, transfer_id: &str) {
    let now = chrono::Utc::now().timestamp_millis();
    registry.with_transfer(transfer_id, |t| {
        let _ = t.transition(DccState::Completed, now);
    });
    info!("DCC transfer {transfer_id} completed");
    emit_status_line(
        store,
        events,
        "DCC_TRANSFER_COMPLETED",
        format!("DCC transfer {transfer_id} completed"),
        now,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertised_ip_prefers_the_configured_override() {
        let configured = Some(Ipv4Addr::new(203, 0, 113, 9));
        let local = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5000);
        assert_eq!(advertised_ip(configured, local), Ipv4Addr::new(203, 0, 113, 9));
    }

    #[test]
    fn advertised_ip_falls_back_to_the_local_socket_address() {
        let local = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 5000);
        assert_eq!(advertised_ip(None, local), Ipv4Addr::new(10, 0, 0, 1));
    }

    #[tokio::test]
    async fn bind_in_range_finds_a_free_port() {
        let (_, port) = bind_in_range(41000, 41050).await.unwrap();
        assert!((41000..=41050).contains(&port));
    }
}
