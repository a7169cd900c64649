//! Typed configuration shapes (§6 "Configuration file"). The INI file
//! itself, CLI-flag overlay, and section merging are the out-of-scope
//! "configuration file reader" collaborator's job; this module owns only
//! the shape it populates, plus a TOML convenience loader for tests and
//! headless/demo use.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::dcc::DccConfig;
use crate::state::ConnectionInfo;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub connection: ConnectionInfo,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub dcc: DccFileConfig,
    #[serde(default = "default_persist_path")]
    pub persist_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        FeaturesConfig {
            auto_reconnect: true,
            persist_interval_secs: default_persist_interval_secs(),
        }
    }
}

/// Mirrors [`DccConfig`] field-for-field so the TOML `[DCC]` section can be
/// deserialized directly, then converted once into the typed runtime shape.
#[derive(Debug, Clone, Deserialize)]
pub struct DccFileConfig {
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    #[serde(default)]
    pub dcc_advertised_ip: Option<std::net::Ipv4Addr>,
    #[serde(default)]
    pub bandwidth_limit_send_kbps: u64,
    #[serde(default)]
    pub bandwidth_limit_receive_kbps: u64,
    #[serde(default = "default_download_dir")]
    pub download_dir: std::path::PathBuf,
    #[serde(default = "default_blocked_extensions")]
    pub blocked_extensions: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_true")]
    pub checksum_verify: bool,
    #[serde(default)]
    pub auto_accept: bool,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    #[serde(default = "default_transfer_max_age")]
    pub transfer_max_age_seconds: u64,
    #[serde(default = "default_passive_token_timeout")]
    pub passive_token_timeout_seconds: u64,
}

impl Default for DccFileConfig {
    fn default() -> Self {
        let d = DccConfig::default();
        DccFileConfig {
            port_range_start: d.port_range_start,
            port_range_end: d.port_range_end,
            dcc_advertised_ip: d.dcc_advertised_ip,
            bandwidth_limit_send_kbps: d.bandwidth_limit_send_kbps,
            bandwidth_limit_receive_kbps: d.bandwidth_limit_receive_kbps,
            download_dir: d.download_dir,
            blocked_extensions: d.blocked_extensions,
            max_file_size: d.max_file_size,
            checksum_verify: d.checksum_verify,
            auto_accept: d.auto_accept,
            cleanup_interval_seconds: d.cleanup_interval_seconds,
            transfer_max_age_seconds: d.transfer_max_age_seconds,
            passive_token_timeout_seconds: d.passive_token_timeout_seconds,
        }
    }
}

impl From<DccFileConfig> for DccConfig {
    fn from(f: DccFileConfig) -> Self {
        DccConfig {
            port_range_start: f.port_range_start,
            port_range_end: f.port_range_end,
            dcc_advertised_ip: f.dcc_advertised_ip,
            bandwidth_limit_send_kbps: f.bandwidth_limit_send_kbps,
            bandwidth_limit_receive_kbps: f.bandwidth_limit_receive_kbps,
            download_dir: f.download_dir,
            blocked_extensions: f.blocked_extensions,
            max_file_size: f.max_file_size,
            checksum_verify: f.checksum_verify,
            auto_accept: f.auto_accept,
            cleanup_interval_seconds: f.cleanup_interval_seconds,
            transfer_max_age_seconds: f.transfer_max_age_seconds,
            passive_token_timeout_seconds: f.passive_token_timeout_seconds,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_persist_interval_secs() -> u64 {
    30
}
fn default_persist_path() -> String {
    "irc_client_state.json".to_string()
}
fn default_port_range_start() -> u16 {
    1024
}
fn default_port_range_end() -> u16 {
    65535
}
fn default_download_dir() -> std::path::PathBuf {
    std::path::PathBuf::from(".")
}
fn default_blocked_extensions() -> Vec<String> {
    vec!["exe".to_string(), "scr".to_string(), "bat".to_string()]
}
fn default_max_file_size() -> u64 {
    1024 * 1024 * 1024
}
fn default_cleanup_interval() -> u64 {
    60
}
fn default_transfer_max_age() -> u64 {
    3600
}
fn default_passive_token_timeout() -> u64 {
    120
}

impl ClientConfig {
    /// Loads a TOML-shaped configuration — convenient for tests and the
    /// headless binary. Reading the user-facing INI config file and
    /// merging it with CLI flags is the job of a separate reader; this
    /// only deserializes the typed shape that reader would populate.
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_toml_fills_in_defaults_for_omitted_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [connection]
            host = "irc.example.com"
            port = 6697
            tls = true
            verify_ssl_cert = true
            nick = "nick"
            username = "user"
            real_name = "Real Name"
            "#
        )
        .unwrap();

        let config = ClientConfig::load_toml(file.path()).unwrap();
        assert_eq!(config.connection.host, "irc.example.com");
        assert!(config.features.auto_reconnect);
        assert_eq!(config.dcc.port_range_start, 1024);
        assert_eq!(config.persist_path, "irc_client_state.json");
    }
}
