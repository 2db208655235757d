//! Error types for the vpnkit connection core
//!
//! Every subsystem has its own error enum. `CoreError` aggregates them for
//! callers (the CLI, composition roots) that only need a single type.

use std::time::Duration;
use thiserror::Error;

use crate::models::credentials::AccountPlan;
use crate::models::protocol::VpnProtocol;

/// Main error type for the vpnkit core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors related to keyring operations
    #[error("Keyring error: {0}")]
    Keyring(#[from] KeyringError),

    /// Errors related to VPN connection operations
    #[error("VPN error: {0}")]
    Vpn(#[from] VpnError),

    /// Errors returned by the remote API
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Errors from the certificate subsystem
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    /// Errors from availability probing
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Errors reported by the LocalAgent control channel
    #[error("LocalAgent error: {0}")]
    LocalAgent(#[from] LocalAgentError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Failed to save configuration file: {path}")]
    SaveFailed { path: String },

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ConfigValidationError),

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Field-level validation failures for `CoreConfig`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("attempt_timeout_secs must be between 5 and 300, got {0}")]
    InvalidAttemptTimeout(u64),

    #[error("attempt_leeway_secs must not exceed attempt_timeout_secs ({0} > {1})")]
    LeewayExceedsTimeout(u64, u64),

    #[error("quick_reconnect_ms must be between 100 and 10000, got {0}")]
    InvalidQuickReconnect(u64),

    #[error("probe timeout_ms must be between 100 and 30000, got {0}")]
    InvalidProbeTimeout(u64),

    #[error("{protocol} default port list must not be empty")]
    EmptyPortList { protocol: String },

    #[error("OpenVPN static key must be at least 64 bytes of hex: {0}")]
    InvalidStaticKey(String),

    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Client label must be a short alphanumeric tag, got {0:?}")]
    InvalidClientLabel(String),
}

/// OS keyring operation errors
#[derive(Error, Debug)]
pub enum KeyringError {
    #[error("Keyring service unavailable")]
    ServiceUnavailable,

    #[error("Failed to store credential in keyring")]
    StoreFailed,

    #[error("Failed to retrieve credential from keyring")]
    RetrieveFailed,

    #[error("Credential not found in keyring")]
    NotFound,

    #[error("Invalid credential format")]
    InvalidFormat,
}

/// VPN connection operation errors
///
/// Carried inside `AppState::Error` and `VpnState::Error`, hence `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VpnError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Failed to save tunnel configuration: {reason}")]
    TunnelSaveFailed { reason: String },

    #[error("Failed to start tunnel: {reason}")]
    TunnelStartFailed { reason: String },

    #[error("Failed to remove tunnel configuration")]
    RemoveConfigurationFailed,

    #[error("Tunnel provider unavailable")]
    TunnelProviderUnavailable,

    #[error("TLS server verification failed")]
    TlsServerVerification,

    #[error("TLS initialisation failed")]
    TlsInitialisation,

    #[error("No reachable ports for {protocol}")]
    NoReachablePorts { protocol: String },

    #[error("Connection configuration has no ports")]
    EmptyPortList,

    #[error("Server IP {ip} does not support {protocol}")]
    UnsupportedProtocol { ip: String, protocol: String },

    #[error("Missing authentication data for certificate-based protocol")]
    MissingAuthenticationData,

    #[error("Network unreachable")]
    NetworkUnreachable,

    #[error("Connection attempt timed out after {seconds} seconds")]
    ConnectionTimeout { seconds: u64 },
}

/// Remote API errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Server certificate verification failed")]
    TlsVerification,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("API error code {code}: {message}")]
    Code { code: i64, message: String },

    #[error("Unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether this failure suggests a monitored network
    pub fn is_tls_verification(&self) -> bool {
        matches!(self, ApiError::TlsVerification)
    }
}

/// Certificate and key management errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("Certificate authority requires new keys")]
    NeedNewKeys,

    #[error("Too many certificate requests")]
    TooManyRequests { retry_after: Option<Duration> },

    #[error("Certificate request failed: {0}")]
    Api(String),

    #[error("Certificate storage failed: {0}")]
    Storage(String),
}

/// Availability probing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("No available ports for {protocol} after retry")]
    NoPortsAvailable { protocol: VpnProtocol },

    #[error("No protocol reachable on {ip}")]
    NoProtocolAvailable { ip: String },
}

/// Errors reported by the LocalAgent, decoded from the agent's numeric codes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocalAgentError {
    #[error("Guest session")]
    GuestSession,

    #[error("Certificate expired")]
    CertificateExpired,

    #[error("Certificate revoked")]
    CertificateRevoked,

    #[error("Key used multiple times")]
    KeyUsedMultipleTimes,

    #[error("Restricted server")]
    RestrictedServer,

    #[error("Bad certificate signature")]
    BadCertificateSignature,

    #[error("Certificate not provided")]
    CertificateNotProvided,

    #[error("Maximum sessions reached ({0} plan)")]
    MaxSessions(AccountPlan),

    #[error("Server error")]
    ServerError,

    #[error("Policy violation: plan too low")]
    PolicyViolationLowPlan,

    #[error("Policy violation: delinquent account")]
    PolicyViolationDelinquent,

    #[error("Torrenting is not allowed on this server")]
    UserTorrentNotAllowed,

    #[error("Policy violation: bad behaviour")]
    UserBadBehavior,

    #[error("Server session does not match")]
    ServerSessionDoesNotMatch,

    #[error("System error: {0}")]
    SystemError(String),

    #[error("Could not open the LocalAgent channel: {0}")]
    ChannelUnavailable(String),
}

impl LocalAgentError {
    /// Decodes an agent error code; unknown codes yield `None`
    pub fn from_code(code: i64) -> Option<Self> {
        let error = match code {
            86100 => LocalAgentError::GuestSession,
            86101 => LocalAgentError::CertificateExpired,
            86102 => LocalAgentError::CertificateRevoked,
            86103 => LocalAgentError::KeyUsedMultipleTimes,
            86104 => LocalAgentError::RestrictedServer,
            86105 => LocalAgentError::BadCertificateSignature,
            86106 => LocalAgentError::CertificateNotProvided,
            86110 => LocalAgentError::MaxSessions(AccountPlan::Unknown),
            86111 => LocalAgentError::MaxSessions(AccountPlan::Free),
            86112 => LocalAgentError::MaxSessions(AccountPlan::Basic),
            86113 => LocalAgentError::MaxSessions(AccountPlan::Plus),
            86114 => LocalAgentError::MaxSessions(AccountPlan::Visionary),
            86115 => LocalAgentError::MaxSessions(AccountPlan::Pro),
            86150 => LocalAgentError::ServerError,
            86151 => LocalAgentError::PolicyViolationLowPlan,
            86152 => LocalAgentError::PolicyViolationDelinquent,
            86153 => LocalAgentError::UserTorrentNotAllowed,
            86154 => LocalAgentError::UserBadBehavior,
            86202 => LocalAgentError::ServerSessionDoesNotMatch,
            _ => return None,
        };
        Some(error)
    }
}

/// Result type alias for vpnkit operations
pub type Result<T> = std::result::Result<T, CoreError>;
