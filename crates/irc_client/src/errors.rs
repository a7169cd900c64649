use thiserror::Error;

/// SASL PLAIN failure reasons, one per numeric the server can send back.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslError {
    #[error("SASL authentication mechanism message malformed (902)")]
    Authenticate,
    #[error("SASL authentication failed (904)")]
    Denied,
    #[error("SASL authentication timed out")]
    Timeout,
    #[error("SASL mechanism not supported by server (905)")]
    UnsupportedMechanism,
    #[error("SASL already authenticated (906)")]
    AlreadyAuthenticated,
    #[error("SASL aborted (907)")]
    Aborted,
}

/// DCC transfers are rejected for one of these reasons before a socket is ever opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DccSecurityError {
    #[error("file extension '{0}' is blocked")]
    BlockedExtension(String),
    #[error("resolved destination escapes the download directory")]
    PathEscape,
    #[error("file size {size} exceeds the configured maximum {max}")]
    OversizeFile { size: u64, max: u64 },
    #[error("filename '{0}' is not acceptable")]
    BadFilename(String),
}

/// Top-level error type for the core. Each variant maps 1:1 to a kind named in §7.
#[derive(Error, Debug)]
pub enum IrcClientError {
    #[error("malformed IRC line: {reason} (offset {offset})")]
    MalformedLine { reason: &'static str, offset: usize },

    #[error("transport I/O error: {0}")]
    TransportIo(#[from] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("certificate rejected: {0}")]
    CertificateRejected(String),

    #[error("capability negotiation timed out")]
    CapTimeout,

    #[error("SASL error: {0}")]
    Sasl(#[from] SaslError),

    #[error("registration timed out")]
    RegistrationTimeout,

    #[error("nickname unavailable after retries")]
    NickUnavailable,

    #[error("write queue is backpressured")]
    Backpressured,

    #[error("validation failed for field '{field}': {reason}")]
    ValidationFailed { field: &'static str, reason: String },

    #[error("DCC protocol error: {0}")]
    DccProtocol(String),

    #[error("DCC security check failed: {0}")]
    DccSecurity(#[from] DccSecurityError),

    #[error("DCC transfer timed out")]
    DccTimeout,

    #[error("DCC checksum mismatch: expected {expected}, computed {computed}")]
    DccChecksumMismatch { expected: String, computed: String },

    #[error("state store corrupted: {0}")]
    StateCorrupted(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl IrcClientError {
    /// §7 propagation rule: whether the orchestrator should schedule a reconnect
    /// backoff (`true`) or terminate the connection attempt outright (`false`).
    pub fn is_retryable(&self) -> bool {
        match self {
            IrcClientError::TransportIo(_)
            | IrcClientError::CapTimeout
            | IrcClientError::RegistrationTimeout
            | IrcClientError::NickUnavailable => true,
            IrcClientError::CertificateRejected(_)
            | IrcClientError::Sasl(SaslError::Denied)
            | IrcClientError::ConfigError(_)
            | IrcClientError::DccSecurity(_)
            | IrcClientError::ValidationFailed { .. } => false,
            // Everything else is scoped to its own subsystem (DCC transfer,
            // one malformed line) and never reaches the orchestrator at all.
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IrcClientError>;
