//! L10 — DCC Subsystem. Active/passive SEND and GET, bandwidth-capped
//! transfers, resume, checksum verification, and an expiration sweeper
//! (§4.10).
//!
//! The subsystem owns its own live transfer records; the State Store only
//! ever sees a terminal-state summary via [`crate::state::StateStore::record_dcc_history`].

pub mod active;
pub mod ctcp;
pub mod passive;
pub mod ratelimit;
pub mod security;

use std::sync::Arc;

use dashmap::DashMap;
use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::context::{ContextKind, RenderedLine};
use crate::errors::{IrcClientError, Result};
use crate::event_bus::EventBus;
use crate::state::persistence::DccHistoryEntry;
use crate::state::StateStore;

/// Default chunk size for transfer I/O (§5: "bounded chunks, e.g. 16 KiB").
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// The `[DCC]` section of the configuration file (§6), resolved to
/// typed values.
#[derive(Debug, Clone)]
pub struct DccConfig {
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub dcc_advertised_ip: Option<std::net::Ipv4Addr>,
    pub bandwidth_limit_send_kbps: u64,
    pub bandwidth_limit_receive_kbps: u64,
    pub download_dir: std::path::PathBuf,
    pub blocked_extensions: Vec<String>,
    pub max_file_size: u64,
    pub checksum_verify: bool,
    pub auto_accept: bool,
    pub cleanup_interval_seconds: u64,
    pub transfer_max_age_seconds: u64,
    pub passive_token_timeout_seconds: u64,
}

impl Default for DccConfig {
    fn default() -> Self {
        DccConfig {
            port_range_start: 1024,
            port_range_end: 65535,
            dcc_advertised_ip: None,
            bandwidth_limit_send_kbps: 0,
            bandwidth_limit_receive_kbps: 0,
            download_dir: std::path::PathBuf::from("."),
            blocked_extensions: vec!["exe".to_string(), "scr".to_string(), "bat".to_string()],
            max_file_size: 1024 * 1024 * 1024,
            checksum_verify: true,
            auto_accept: false,
            cleanup_interval_seconds: 60,
            transfer_max_age_seconds: 3600,
            passive_token_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DccDirection {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DccMode {
    Active,
    Passive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DccState {
    Pending,
    Queued,
    Negotiating,
    Connecting,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl DccState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DccState::Completed | DccState::Failed | DccState::Cancelled)
    }
}

/// The only digest algorithm this client offers for `checksum_verify` (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    Sha256,
}

/// One DCC transfer record, per §3. Owned by the DCC Subsystem;
/// referenced by `id` from the State Store's terminal-state history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DccTransfer {
    pub id: String,
    pub peer_nick: String,
    pub filename: String,
    pub local_path: std::path::PathBuf,
    pub expected_size: u64,
    pub bytes_transferred: u64,
    pub direction: DccDirection,
    pub mode: DccMode,
    pub state: DccState,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
    pub expected_digest: Option<String>,
    pub computed_digest: Option<String>,
    /// Bytes/sec, 0 = unlimited (§3).
    pub rate_limit_bytes_per_sec: u64,
    pub created_at_millis: i64,
    pub last_progress_millis: i64,
    pub passive_token: Option<String>,
    pub resume_offset: u64,
}

impl DccTransfer {
    pub fn new(
        peer_nick: impl Into<String>,
        filename: impl Into<String>,
        local_path: std::path::PathBuf,
        expected_size: u64,
        direction: DccDirection,
        mode: DccMode,
        rate_limit_bytes_per_sec: u64,
        now_millis: i64,
    ) -> Self {
        DccTransfer {
            id: generate_id(),
            peer_nick: peer_nick.into(),
            filename: filename.into(),
            local_path,
            expected_size,
            bytes_transferred: 0,
            direction,
            mode,
            state: DccState::Pending,
            checksum_algorithm: None,
            expected_digest: None,
            computed_digest: None,
            rate_limit_bytes_per_sec,
            created_at_millis: now_millis,
            last_progress_millis: now_millis,
            passive_token: None,
            resume_offset: 0,
        }
    }

    /// Move into a new state. Once a transfer is terminal its `last_progress`
    /// is frozen and no further transition is accepted (§3 invariant).
    pub fn transition(&mut self, to: DccState, now_millis: i64) -> Result<()> {
        if self.state.is_terminal() {
            return Err(IrcClientError::DccProtocol(format!(
                "transfer {} is already terminal ({:?}); cannot move to {:?}",
                self.id, self.state, to
            )));
        }
        self.state = to;
        if to.is_terminal() {
            self.last_progress_millis = now_millis;
        }
        Ok(())
    }

    /// Record newly transferred bytes. Enforces `bytes_transferred <=
    /// expected_size` at all times (§8 invariant).
    pub fn record_progress(&mut self, delta: u64, now_millis: i64) {
        self.bytes_transferred = (self.bytes_transferred + delta).min(self.expected_size);
        self.last_progress_millis = now_millis;
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.expected_size
    }

    pub fn to_history_entry(&self) -> DccHistoryEntry {
        DccHistoryEntry {
            id: self.id.clone(),
            peer_nick: self.peer_nick.clone(),
            filename: self.filename.clone(),
            direction: match self.direction {
                DccDirection::Send => "send".to_string(),
                DccDirection::Receive => "receive".to_string(),
            },
            final_state: format!("{:?}", self.state),
            bytes_transferred: self.bytes_transferred,
            completed_at_millis: self.last_progress_millis,
        }
    }
}

/// Surface a human-readable line in the status context and publish the
/// matching event, so a terminal state is never silent (§7).
pub fn emit_status_line(store: &StateStore, events: &EventBus, event: &str, text: String, now_millis: i64) {
    store.get_or_create_context("status", ContextKind::Status, crate::context::DEFAULT_INTERACTIVE_CAP);
    store.with_context("status", |ctx| {
        ctx.append(RenderedLine {
            text: format!("* {text}"),
            timestamp_millis: now_millis,
        })
    });
    events.publish(event, serde_json::json!({ "text": text }));
}

fn generate_id() -> String {
    random_token(12)
}

/// Used both for transfer ids and passive-offer tokens (§4.10: "a
/// non-empty token").
pub(crate) fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| char::from(rng.sample(rand::distributions::Alphanumeric))).collect()
}

/// Live registry of in-flight and recently-terminal transfers. One instance
/// is shared across the active/passive transfer tasks.
pub struct DccRegistry {
    transfers: DashMap<String, DccTransfer>,
}

impl Default for DccRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DccRegistry {
    pub fn new() -> Self {
        DccRegistry {
            transfers: DashMap::new(),
        }
    }

    pub fn insert(&self, transfer: DccTransfer) -> String {
        let id = transfer.id.clone();
        self.transfers.insert(id.clone(), transfer);
        id
    }

    pub fn get(&self, id: &str) -> Option<DccTransfer> {
        self.transfers.get(id).map(|t| t.clone())
    }

    pub fn with_transfer<R>(&self, id: &str, f: impl FnOnce(&mut DccTransfer) -> R) -> Option<R> {
        self.transfers.get_mut(id).map(|mut t| f(&mut t))
    }

    /// Find a pending passive offer by its token (§4.10 passive SEND handshake).
    pub fn find_by_passive_token(&self, token: &str) -> Option<String> {
        self.transfers
            .iter()
            .find(|e| e.value().passive_token.as_deref() == Some(token))
            .map(|e| e.key().clone())
    }

    pub fn remove(&self, id: &str) -> Option<DccTransfer> {
        self.transfers.remove(id).map(|(_, t)| t)
    }

    pub fn list(&self) -> Vec<DccTransfer> {
        self.transfers.iter().map(|e| e.value().clone()).collect()
    }

    /// Evict terminal transfers older than `max_age_millis` and fail pending
    /// passive offers older than `passive_token_timeout_millis`, recording
    /// each into the State Store's history and emitting a status-visible
    /// event (§4.10, §7 "user-visible behavior").
    pub fn sweep(
        &self,
        now_millis: i64,
        max_age_millis: i64,
        passive_token_timeout_millis: i64,
        store: &StateStore,
        events: &EventBus,
    ) {
        let mut expired_passive = Vec::new();
        for entry in self.transfers.iter() {
            let t = entry.value();
            if t.mode == DccMode::Passive
                && t.state == DccState::Pending
                && now_millis.saturating_sub(t.created_at_millis) > passive_token_timeout_millis
            {
                expired_passive.push(t.id.clone());
            }
        }
        for id in expired_passive {
            self.with_transfer(&id, |t| {
                let _ = t.transition(DccState::Failed, now_millis);
            });
            warn!("passive DCC offer {id} expired waiting for a peer connection");
            events.publish(
                "DCC_TRANSFER_FAILED",
                serde_json::json!({ "id": id, "reason": "PassiveOfferExpired" }),
            );
        }

        let mut to_evict = Vec::new();
        for entry in self.transfers.iter() {
            let t = entry.value();
            if t.state.is_terminal() && now_millis.saturating_sub(t.last_progress_millis) > max_age_millis {
                to_evict.push(t.id.clone());
            }
        }
        for id in to_evict {
            if let Some(t) = self.remove(&id) {
                store.record_dcc_history(t.to_history_entry());
            }
        }
    }

    /// Spawn the periodic sweeper (§4.10 default `cleanup_interval_seconds`).
    pub fn spawn_sweep_loop(
        self: &Arc<Self>,
        store: Arc<StateStore>,
        events: Arc<EventBus>,
        cleanup_interval: std::time::Duration,
        max_age_millis: i64,
        passive_token_timeout_millis: i64,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                let now_millis = chrono::Utc::now().timestamp_millis();
                registry.sweep(now_millis, max_age_millis, passive_token_timeout_millis, &store, &events);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(now: i64) -> DccTransfer {
        DccTransfer::new(
            "bob",
            "file.bin",
            std::path::PathBuf::from("/tmp/downloads/file.bin"),
            1024,
            DccDirection::Receive,
            DccMode::Active,
            0,
            now,
        )
    }

    #[test]
    fn progress_never_exceeds_expected_size() {
        let mut t = sample(0);
        t.record_progress(2000, 10);
        assert_eq!(t.bytes_transferred, t.expected_size);
    }

    #[test]
    fn terminal_state_rejects_further_transitions() {
        let mut t = sample(0);
        t.transition(DccState::Transferring, 1).unwrap();
        t.transition(DccState::Completed, 2).unwrap();
        assert!(t.transition(DccState::Transferring, 3).is_err());
    }

    #[test]
    fn registry_round_trips_a_transfer() {
        let registry = DccRegistry::new();
        let id = registry.insert(sample(0));
        assert!(registry.get(&id).is_some());
        registry.with_transfer(&id, |t| t.record_progress(100, 5));
        assert_eq!(registry.get(&id).unwrap().bytes_transferred, 100);
    }

    #[test]
    fn finds_pending_offer_by_passive_token() {
        let registry = DccRegistry::new();
        let mut t = sample(0);
        t.passive_token = Some("tok123".to_string());
        let id = registry.insert(t);
        assert_eq!(registry.find_by_passive_token("tok123"), Some(id));
        assert_eq!(registry.find_by_passive_token("nope"), None);
    }
}
