//! L2 persistence: the serializable subset of state, written atomically via
//! write-temp + rename (§4.2, §6 "Persisted state").

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::context::{Context, ContextOrder};
use crate::errors::{IrcClientError, Result};

use super::connection_info::ConnectionInfo;

/// Bumped whenever the on-disk shape changes. A file whose version is newer
/// than this binary understands is left alone rather than quarantined.
pub const SCHEMA_VERSION: u32 = 1;

/// Terminal-state summary of one DCC transfer, kept for history after the
/// live record is evicted by the expiration sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DccHistoryEntry {
    pub id: String,
    pub peer_nick: String,
    pub filename: String,
    pub direction: String,
    pub final_state: String,
    pub bytes_transferred: u64,
    pub completed_at_millis: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u32,
    pub connection_info: Option<ConnectionInfo>,
    pub last_server_key: Option<String>,
    pub context_order: ContextOrder,
    pub contexts: Vec<Context>,
    pub dcc_history: Vec<DccHistoryEntry>,
}

impl Default for PersistedState {
    fn default() -> Self {
        PersistedState {
            schema_version: SCHEMA_VERSION,
            connection_info: None,
            last_server_key: None,
            context_order: ContextOrder::default(),
            contexts: Vec::new(),
            dcc_history: Vec::new(),
        }
    }
}

/// Load the persisted document at `path`. A missing file yields a fresh
/// default. A file that fails to parse, or whose schema is from the future,
/// is quarantined (renamed with a `.corrupt.<unix_ts>` suffix) and a fresh
/// default is used instead, per §4.2.
pub fn load(path: &Path, now_unix: i64) -> PersistedState {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return PersistedState::default(),
        Err(e) => {
            warn!("failed to read persisted state {}: {e}", path.display());
            return PersistedState::default();
        }
    };

    match serde_json::from_str::<PersistedState>(&raw) {
        Ok(state) if state.schema_version <= SCHEMA_VERSION => state,
        Ok(state) => {
            warn!(
                "persisted state schema_version {} is newer than supported {}; quarantining",
                state.schema_version, SCHEMA_VERSION
            );
            quarantine(path, now_unix);
            PersistedState::default()
        }
        Err(e) => {
            error!("persisted state at {} is corrupt: {e}", path.display());
            quarantine(path, now_unix);
            PersistedState::default()
        }
    }
}

fn quarantine(path: &Path, now_unix: i64) {
    let quarantined: PathBuf = {
        let mut name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_string());
        name.push_str(&format!(".corrupt.{now_unix}"));
        path.with_file_name(name)
    };
    if let Err(e) = std::fs::rename(path, &quarantined) {
        error!(
            "failed to quarantine corrupt state file {} -> {}: {e}",
            path.display(),
            quarantined.display()
        );
    }
}

/// Atomically write `state` to `path`: serialize to a sibling temp file,
/// then rename over the destination.
pub fn save(path: &Path, state: &PersistedState) -> Result<()> {
    let json = serde_json::to_vec_pretty(state)
        .map_err(|e| IrcClientError::StateCorrupted(format!("serialize failed: {e}")))?;

    let tmp_path = {
        let mut name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_string());
        name.push_str(".tmp");
        path.with_file_name(name)
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(IrcClientError::TransportIo)?;
    }

    let mut file = std::fs::File::create(&tmp_path).map_err(IrcClientError::TransportIo)?;
    file.write_all(&json).map_err(IrcClientError::TransportIo)?;
    file.sync_all().map_err(IrcClientError::TransportIo)?;
    std::fs::rename(&tmp_path, path).map_err(IrcClientError::TransportIo)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = PersistedState::default();
        state.last_server_key = Some("irc.example.com:6697".to_string());
        save(&path, &state).unwrap();

        let loaded = load(&path, 1_000);
        assert_eq!(loaded.last_server_key, state.last_server_key);
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded = load(&path, 1_000);
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
        assert!(loaded.contexts.is_empty());
    }

    #[test]
    fn corrupt_file_is_quarantined_and_default_is_returned() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"not json at all").unwrap();

        let loaded = load(&path, 42);
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
        assert!(!path.exists());
        assert!(dir.path().join("state.json.corrupt.42").exists());
    }

    #[test]
    fn future_schema_version_is_quarantined() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut future = PersistedState::default();
        future.schema_version = SCHEMA_VERSION + 1;
        std::fs::write(&path, serde_json::to_vec(&future).unwrap()).unwrap();

        let loaded = load(&path, 7);
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
        assert!(dir.path().join("state.json.corrupt.7").exists());
    }
}
