//! Passive ("reverse") DCC: the offering side advertises port `0` plus a
//! token instead of an address; whichever side ends up listening replies
//! with its real endpoint and the other side dials out (§4.10).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use log::info;

use crate::errors::Result;
use crate::event_bus::EventBus;
use crate::state::StateStore;

use super::active::{advertised_ip, bind_in_range, receive_from_peer, stream_to_peer};
use super::ctcp;
use super::security;
use super::{random_token, DccConfig, DccDirection, DccMode, DccRegistry, DccState, DccTransfer};

/// Build the `Pending` transfer record and outbound CTCP line for a local
/// `/dcc send -p <nick> <path>`. The caller (the command layer, out of
/// scope here) sends the returned line as a CTCP PRIVMSG to `peer_nick`.
pub fn prepare_passive_send_offer(
    registry: &DccRegistry,
    peer_nick: &str,
    local_path: std::path::PathBuf,
    filename: &str,
    size: u64,
    rate_limit_bytes_per_sec: u64,
    now_millis: i64,
) -> (String, String) {
    let mut transfer = DccTransfer::new(
        peer_nick,
        filename,
        local_path,
        size,
        DccDirection::Send,
        DccMode::Passive,
        rate_limit_bytes_per_sec,
        now_millis,
    );
    let token = random_token(16);
    transfer.passive_token = Some(token.clone());
    let id = registry.insert(transfer);
    let line = ctcp::encode_passive_send(filename, size, &token);
    (id, line)
}

/// Once the peer has replied with its real `DCC SEND … <ip> <port> <size>
/// <token>`, dial out and stream the file.
pub async fn dial_and_send(
    transfer_id: String,
    registry: Arc<DccRegistry>,
    store: Arc<StateStore>,
    events: Arc<EventBus>,
    addr: SocketAddr,
    checksum_verify: bool,
) -> Result<()> {
    registry.with_transfer(&transfer_id, |t| {
        let now = chrono::Utc::now().timestamp_millis();
        let _ = t.transition(DccState::Connecting, now);
    });
    let transfer = registry.get(&transfer_id);
    let Some(transfer) = transfer else {
        return Ok(());
    };

    let stream = tokio::net::TcpStream::connect(addr).await?;
    let file = tokio::fs::File::open(&transfer.local_path).await?;
    info!("DCC passive SEND {transfer_id}: dialing {addr}");

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
    Ok(())
}

/// We received a passive offer (`DCC SEND "<name>" 0 0 <size> <token>`).
/// Run the security checks, create a `Pending` receive transfer, bind our
/// own listening socket, and build the `DCC SEND … <our-ip> <our-port>
/// <size> <token>` reply line the caller should send back.
#[allow(clippy::too_many_arguments)]
pub async fn prepare_passive_receive(
    registry: &DccRegistry,
    config: &DccConfig,
    peer_nick: &str,
    filename: &str,
    size: u64,
    token: &str,
    now_millis: i64,
) -> std::result::Result<(String, String, tokio::net::TcpListener), crate::errors::IrcClientError> {
    let sanitized = security::sanitize_filename(filename)?;
    security::reject_blocked_extension(&sanitized, &config.blocked_extensions)?;
    security::check_size(size, config.max_file_size)?;
    let destination = security::resolve_destination(&config.download_dir, &sanitized)?;

    let (listener, port) = bind_in_range(config.port_range_start, config.port_range_end).await?;
    let local_addr = listener.local_addr().map_err(crate::errors::IrcClientError::TransportIo)?;
    let ip = advertised_ip(config.dcc_advertised_ip, local_addr);

    let mut transfer = DccTransfer::new(
        peer_nick,
        sanitized.clone(),
        destination,
        size,
        DccDirection::Receive,
        DccMode::Passive,
        config.bandwidth_limit_receive_kbps * 1024,
        now_millis,
    );
    transfer.passive_token = Some(token.to_string());
    let id = registry.insert(transfer);

    let reply = ctcp::encode_send(&sanitized, ip, port, size, Some(token));
    Ok((id, reply, listener))
}

/// Accept the one inbound connection on `listener` and receive the file
/// (mirror of [`super::active::run_active_receive`] for the passive path).
pub async fn run_passive_receive(
    transfer_id: String,
    registry: Arc<DccRegistry>,
    store: Arc<StateStore>,
    events: Arc<EventBus>,
    listener: tokio::net::TcpListener,
    checksum_verify: bool,
) {
    registry.with_transfer(&transfer_id, |t| {
        let now = chrono::Utc::now().timestamp_millis();
        let _ = t.transition(DccState::Connecting, now);
    });

    let (stream, peer_addr) = match listener.accept().await {
        Ok(pair) => pair,
        Err(e) => {
            registry.with_transfer(&transfer_id, |t| {
                let now = chrono::Utc::now().timestamp_millis();
                let _ = t.transition(DccState::Failed, now);
            });
            super::emit_status_line(
                &store,
                &events,
                "DCC_TRANSFER_FAILED",
                format!("DCC transfer {transfer_id} failed: accept error: {e}"),
                chrono::Utc::now().timestamp_millis(),
            );
            return;
        }
    };
    info!("DCC passive GET {transfer_id}: peer connected from {peer_addr}");

    let Some(transfer) = registry.get(&transfer_id) else { return };
    let file = match tokio::fs::File::create(&transfer.local_path).await {
        Ok(f) => f,
        Err(e) => {
            registry.with_transfer(&transfer_id, |t| {
                let now = chrono::Utc::now().timestamp_millis();
                let _ = t.transition(DccState::Failed, now);
            });
            super::emit_status_line(
                &store,
                &events,
                "DCC_TRANSFER_FAILED",
                format!("DCC transfer {transfer_id} failed: cannot create destination file: {e}"),
                chrono::Utc::now().timestamp_millis(),
            );
            return;
        }
    };

    receive_from_peer(transfer_id, registry, store, events, stream, file, checksum_verify).await;
}

/// Locate the transfer a peer's passive reply refers to, by matching the
/// token it echoed back.
pub fn resolve_reply(registry: &DccRegistry, token: &str) -> Option<String> {
    registry.find_by_passive_token(token)
}

pub fn endpoint_from_reply(ip: Ipv4Addr, port: u16) -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(ip), port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_passive_send_offer_produces_a_well_formed_ctcp_line() {
        let registry = DccRegistry::new();
        let (id, line) = prepare_passive_send_offer(
            &registry,
            "bob",
            std::path::PathBuf::from("/tmp/file.bin"),
            "file.bin",
            1024,
            0,
            0,
        );
        assert!(!id.is_empty());
        assert!(line.starts_with("DCC SEND \"file.bin\" 0 0 1024 "));
        let transfer = registry.get(&id).unwrap();
        assert_eq!(transfer.mode, DccMode::Passive);
        assert!(transfer.passive_token.is_some());
    }

    #[tokio::test]
    async fn prepare_passive_receive_rejects_a_path_escape_attempt() {
        let registry = DccRegistry::new();
        let config = DccConfig::default();
        let result = prepare_passive_receive(&registry, &config, "bob", "../etc/passwd", 10, "tok", 0).await;
        assert!(result.is_err());
    }

    #[test]
    fn endpoint_from_reply_builds_the_expected_socket_address() {
        let addr = endpoint_from_reply(Ipv4Addr::new(192, 168, 1, 1), 5000);
        assert_eq!(addr.port(), 5000);
    }
}
