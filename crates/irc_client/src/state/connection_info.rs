//! §3 `ConnectionInfo` / `ConnectionState` data model.

use serde::{Deserialize, Serialize};

/// Everything needed to dial and register against one server.
///
/// Password fields are write-only at use: [`ConnectionInfo::redacted`]
/// produces the shape persisted to disk (§6, "minus write-only
/// passwords unless explicitly enabled").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub verify_ssl_cert: bool,
    pub nick: String,
    pub username: String,
    pub real_name: String,
    #[serde(default)]
    pub server_password: Option<String>,
    #[serde(default)]
    pub nickserv_password: Option<String>,
    #[serde(default)]
    pub sasl_username: Option<String>,
    #[serde(default)]
    pub sasl_password: Option<String>,
    #[serde(default)]
    pub auto_join_channels: Vec<String>,
    #[serde(default)]
    pub requested_capabilities: Vec<String>,
    #[serde(default, skip_serializing)]
    pub config_errors: Vec<String>,
}

impl ConnectionInfo {
    /// Validate a candidate `ConnectionInfo` the way the state store's
    /// connection-info validator does before assignment (§3 invariant:
    /// `config_errors` must be empty before leaving `Disconnected`/`ConfigError`).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.host.trim().is_empty() {
            errors.push("host must not be empty".to_string());
        }
        if self.port == 0 {
            errors.push("port must be nonzero".to_string());
        }
        if self.nick.trim().is_empty() {
            errors.push("nick must not be empty".to_string());
        }
        if self.username.trim().is_empty() {
            errors.push("username must not be empty".to_string());
        }
        if self.sasl_username.is_some() != self.sasl_password.is_some() {
            errors.push("sasl_username and sasl_password must be set together".to_string());
        }
        errors
    }

    /// The shape written to the persisted state document: write-only secrets dropped.
    pub fn redacted(&self) -> Self {
        ConnectionInfo {
            server_password: None,
            nickserv_password: None,
            sasl_password: None,
            config_errors: Vec::new(),
            ..self.clone()
        }
    }
}

/// §3 `ConnectionState`. Transitions are strictly forward within one
/// connection attempt; any state may transition to `Disconnected` or `Error`.
/// The orchestrator (L8) is the only component that mutates this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    ConfigError,
    Connecting,
    CapNegotiating,
    Authenticating,
    Registering,
    Registered,
    Ready,
    Disconnecting,
    Error,
}

impl ConnectionState {
    /// Whether `to` is a legal successor of `self` per the forward-only rule.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        if matches!(to, Disconnected | Error) {
            return true;
        }
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (ConfigError, Connecting)
                | (Connecting, CapNegotiating)
                | (CapNegotiating, Authenticating)
                | (CapNegotiating, Registering)
                | (Authenticating, Registering)
                | (Registering, Registered)
                | (Registered, Ready)
                | (Ready, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_info() -> ConnectionInfo {
        ConnectionInfo {
            host: "irc.example.com".into(),
            port: 6697,
            tls: true,
            verify_ssl_cert: true,
            nick: "nick".into(),
            username: "user".into(),
            real_name: "Real Name".into(),
            server_password: None,
            nickserv_password: None,
            sasl_username: None,
            sasl_password: None,
            auto_join_channels: vec!["#chan".into()],
            requested_capabilities: vec!["sasl".into()],
            config_errors: Vec::new(),
        }
    }

    #[test]
    fn validate_accepts_well_formed_info() {
        assert!(valid_info().validate().is_empty());
    }

    #[test]
    fn validate_rejects_empty_host_and_zero_port() {
        let mut info = valid_info();
        info.host = "".into();
        info.port = 0;
        let errors = info.validate();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn validate_rejects_half_set_sasl_credentials() {
        let mut info = valid_info();
        info.sasl_username = Some("alice".into());
        assert!(info.validate().iter().any(|e| e.contains("sasl")));
    }

    #[test]
    fn redacted_strips_write_only_secrets() {
        let mut info = valid_info();
        info.server_password = Some("hunter2".into());
        info.sasl_password = Some("secret".into());
        let redacted = info.redacted();
        assert!(redacted.server_password.is_none());
        assert!(redacted.sasl_password.is_none());
        assert_eq!(redacted.nick, info.nick);
    }

    #[test]
    fn connection_state_rejects_backward_transitions() {
        assert!(!ConnectionState::Ready.can_transition_to(ConnectionState::Connecting));
        assert!(ConnectionState::Ready.can_transition_to(ConnectionState::Disconnecting));
        assert!(ConnectionState::CapNegotiating.can_transition_to(ConnectionState::Error));
    }
}
