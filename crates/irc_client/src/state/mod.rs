//! L2 — State Store. A typed, validated, observable, persistable bag of
//! client state (§4.2). The store is the only piece of shared mutable
//! data in the system (§5); everything else holds handles into it.

mod cell;
pub mod connection_info;
pub mod persistence;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{info, warn};

pub use cell::{AsyncSubscriber, Cell};
pub use connection_info::{ConnectionInfo, ConnectionState};

use crate::channel::Channel;
use crate::context::{Context, ContextKind, ContextOrder};
use crate::errors::Result;
use crate::isupport::ServerSupport;
use crate::user::User;
use persistence::{DccHistoryEntry, PersistedState};

/// Default interval between automatic persistence flushes (§4.2).
pub const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(30);

/// Default per-context scrollback cap persisted to disk.
pub const DEFAULT_PERSISTED_SCROLLBACK_TAIL: usize = 100;

pub struct StateStore {
    persist_path: PathBuf,
    connection_info: Cell<ConnectionInfo>,
    connection_state: Cell<ConnectionState>,
    last_server_key: Cell<Option<String>>,
    contexts: DashMap<String, Context>,
    context_order: std::sync::RwLock<ContextOrder>,
    dcc_history: std::sync::RwLock<Vec<DccHistoryEntry>>,
    /// Live channel membership. Not persisted (§4.2: "live user lists"
    /// are excluded) — rebuilt from the server after every reconnect.
    channels: DashMap<String, Channel>,
    /// Known users, keyed by folded nick. Also live-only.
    users: DashMap<String, User>,
    server_support: std::sync::RwLock<ServerSupport>,
}

impl StateStore {
    /// Build a fresh store seeded from whatever is on disk at `persist_path`
    /// (or an empty default if nothing is there yet, per §4.2).
    pub fn load(persist_path: PathBuf, now_unix: i64) -> Self {
        let persisted = persistence::load(&persist_path, now_unix);

        let contexts = DashMap::new();
        for ctx in persisted.contexts {
            contexts.insert(ctx.id.clone(), ctx);
        }

        StateStore {
            persist_path,
            connection_info: Cell::with_validator(
                "connection_info",
                persisted.connection_info.unwrap_or_else(default_connection_info),
                |info: &ConnectionInfo| {
                    let errors = info.validate();
                    if errors.is_empty() {
                        Ok(())
                    } else {
                        Err(crate::errors::IrcClientError::ValidationFailed {
                            field: "connection_info",
                            reason: errors.join("; "),
                        })
                    }
                },
            ),
            connection_state: Cell::new("connection_state", ConnectionState::Disconnected),
            last_server_key: Cell::new("last_server_key", persisted.last_server_key),
            contexts,
            context_order: std::sync::RwLock::new(persisted.context_order),
            dcc_history: std::sync::RwLock::new(persisted.dcc_history),
            channels: DashMap::new(),
            users: DashMap::new(),
            server_support: std::sync::RwLock::new(ServerSupport::default()),
        }
    }

    pub fn server_support(&self) -> ServerSupport {
        self.server_support.read().expect("lock poisoned").clone()
    }

    pub fn update_server_support(&self, f: impl FnOnce(&mut ServerSupport)) {
        f(&mut self.server_support.write().expect("lock poisoned"));
    }

    pub fn with_channel<R>(&self, canonical_name: &str, f: impl FnOnce(&mut Channel) -> R) -> Option<R> {
        self.channels.get_mut(canonical_name).map(|mut ch| f(&mut ch))
    }

    pub fn get_or_create_channel(&self, canonical_name: &str, raw_name: &str) {
        self.channels
            .entry(canonical_name.to_string())
            .or_insert_with(|| Channel::new(raw_name, self.server_support().casemapping));
    }

    pub fn remove_channel(&self, canonical_name: &str) {
        self.channels.remove(canonical_name);
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    pub fn with_user<R>(&self, folded_nick: &str, f: impl FnOnce(&mut User) -> R) -> Option<R> {
        self.users.get_mut(folded_nick).map(|mut u| f(&mut u))
    }

    pub fn get_or_create_user(&self, folded_nick: &str, nick: &str) {
        self.users
            .entry(folded_nick.to_string())
            .or_insert_with(|| User::new(nick));
    }

    pub fn rename_user(&self, old_folded: &str, new_folded: &str, new_nick: &str) {
        if let Some((_, mut user)) = self.users.remove(old_folded) {
            user.nick = new_nick.to_string();
            self.users.insert(new_folded.to_string(), user);
        }
    }

    pub fn connection_info(&self) -> &Cell<ConnectionInfo> {
        &self.connection_info
    }

    pub fn connection_state(&self) -> &Cell<ConnectionState> {
        &self.connection_state
    }

    pub fn last_server_key(&self) -> &Cell<Option<String>> {
        &self.last_server_key
    }

    /// Transition `connection_state`, enforcing the forward-only rule. Only
    /// the orchestrator (L8) should call this.
    pub fn transition_connection_state(&self, to: ConnectionState) -> Result<()> {
        let from = self.connection_state.get();
        if !from.can_transition_to(to) {
            warn!("rejected illegal connection state transition {from:?} -> {to:?}");
            return Err(crate::errors::IrcClientError::ValidationFailed {
                field: "connection_state",
                reason: format!("{from:?} cannot transition to {to:?}"),
            });
        }
        self.connection_state.set(to)
    }

    /// Fetch or lazily create a context, recording its place in the
    /// canonical ordering (§4.11).
    pub fn get_or_create_context(&self, id: &str, kind: ContextKind, cap: usize) {
        if !self.contexts.contains_key(id) {
            self.contexts.insert(id.to_string(), Context::new(id, kind, cap));
            self.context_order.write().expect("lock poisoned").record(id, kind);
            info!("created context '{id}' ({kind:?})");
        }
    }

    pub fn with_context<R>(&self, id: &str, f: impl FnOnce(&mut Context) -> R) -> Option<R> {
        self.contexts.get_mut(id).map(|mut ctx| f(&mut ctx))
    }

    pub fn remove_context(&self, id: &str) {
        self.contexts.remove(id);
        self.context_order.write().expect("lock poisoned").remove(id);
    }

    /// Contexts in canonical order: status, then channels (join order), then
    /// queries (first-message order).
    pub fn ordered_context_ids(&self) -> Vec<String> {
        self.context_order.read().expect("lock poisoned").ordered_ids()
    }

    pub fn record_dcc_history(&self, entry: DccHistoryEntry) {
        self.dcc_history.write().expect("lock poisoned").push(entry);
    }

    pub fn dcc_history(&self) -> Vec<DccHistoryEntry> {
        self.dcc_history.read().expect("lock poisoned").clone()
    }

    /// Build the serializable subset of state (§4.2: non-serializable
    /// fields like sockets, in-flight transfers, live user lists are excluded).
    fn snapshot(&self) -> PersistedState {
        let contexts: Vec<Context> = self
            .contexts
            .iter()
            .map(|entry| {
                let mut ctx = entry.value().clone();
                ctx.truncate_to_tail(DEFAULT_PERSISTED_SCROLLBACK_TAIL);
                ctx
            })
            .collect();

        PersistedState {
            schema_version: persistence::SCHEMA_VERSION,
            connection_info: Some(self.connection_info.get().redacted()),
            last_server_key: self.last_server_key.get(),
            context_order: self.context_order.read().expect("lock poisoned").clone(),
            contexts,
            dcc_history: self.dcc_history(),
        }
    }

    /// Flush the current state to disk now.
    pub fn flush(&self) -> Result<()> {
        persistence::save(&self.persist_path, &self.snapshot())
    }

    /// Spawn the periodic background flush loop (§4.2 default 30s).
    /// The returned handle may be aborted on shutdown.
    pub fn spawn_persist_loop(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = store.flush() {
                    warn!("periodic state flush failed: {e}");
                }
            }
        })
    }
}

fn default_connection_info() -> ConnectionInfo {
    ConnectionInfo {
        host: String::new(),
        port: 0,
        tls: true,
        verify_ssl_cert: true,
        nick: String::new(),
        username: String::new(),
        real_name: String::new(),
        server_password: None,
        nickserv_password: None,
        sasl_username: None,
        sasl_password: None,
        auto_join_channels: Vec::new(),
        requested_capabilities: Vec::new(),
        config_errors: vec!["connection_info not yet configured".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> StateStore {
        let dir = tempdir().unwrap();
        StateStore::load(dir.path().join("state.json"), 0)
    }

    #[test]
    fn rejects_invalid_connection_info() {
        let store = store();
        let mut info = default_connection_info();
        info.host = "".into();
        assert!(store.connection_info.set(info).is_err());
    }

    #[test]
    fn accepts_valid_connection_info_and_notifies() {
        let store = store();
        let mut info = default_connection_info();
        info.host = "irc.example.com".into();
        info.nick = "nick".into();
        info.username = "user".into();
        assert!(store.connection_info.set(info.clone()).is_ok());
        assert_eq!(store.connection_info.get().host, info.host);
    }

    #[test]
    fn connection_state_transitions_follow_forward_only_rule() {
        let store = store();
        assert!(store
            .transition_connection_state(ConnectionState::Connecting)
            .is_ok());
        assert!(store
            .transition_connection_state(ConnectionState::Registered)
            .is_err());
    }

    #[test]
    fn contexts_enumerate_in_canonical_order() {
        let store = store();
        store.get_or_create_context("#b", ContextKind::Channel, 10);
        store.get_or_create_context("status", ContextKind::Status, 10);
        store.get_or_create_context("alice", ContextKind::Query, 10);
        store.get_or_create_context("#a", ContextKind::Channel, 10);
        assert_eq!(
            store.ordered_context_ids(),
            vec!["status", "#b", "#a", "alice"]
        );
    }

    #[test]
    fn flush_then_reload_preserves_last_server_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::load(path.clone(), 0);
        store
            .last_server_key
            .set(Some("irc.example.com:6697".to_string()))
            .unwrap();
        store.flush().unwrap();

        let reloaded = StateStore::load(path, 1);
        assert_eq!(
            reloaded.last_server_key.get(),
            Some("irc.example.com:6697".to_string())
        );
    }
}
