use std::fmt;
use std::str::FromStr;

/// Channel state as reported by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAgentState {
    Connecting,
    Connected,
    SoftJailed,
    HardJailed,
    ConnectionError,
    ServerUnreachable,
    WaitingForNetwork,
    ServerCertificateError,
    ClientCertificateError,
    Disconnected,
}

impl LocalAgentState {
    const ALL: [LocalAgentState; 10] = [
        LocalAgentState::Connecting,
        LocalAgentState::Connected,
        LocalAgentState::SoftJailed,
        LocalAgentState::HardJailed,
        LocalAgentState::ConnectionError,
        LocalAgentState::ServerUnreachable,
        LocalAgentState::WaitingForNetwork,
        LocalAgentState::ServerCertificateError,
        LocalAgentState::ClientCertificateError,
        LocalAgentState::Disconnected,
    ];

    /// Name used on the wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            LocalAgentState::Connecting => "Connecting",
            LocalAgentState::Connected => "Connected",
            LocalAgentState::SoftJailed => "SoftJailed",
            LocalAgentState::HardJailed => "HardJailed",
            LocalAgentState::ConnectionError => "ConnectionError",
            LocalAgentState::ServerUnreachable => "ServerUnreachable",
            LocalAgentState::WaitingForNetwork => "WaitingForNetwork",
            LocalAgentState::ServerCertificateError => "ServerCertificateError",
            LocalAgentState::ClientCertificateError => "ClientCertificateError",
            LocalAgentState::Disconnected => "Disconnected",
        }
    }
}

impl FromStr for LocalAgentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.wire_name() == s)
            .ok_or_else(|| format!("unknown LocalAgent state '{}'", s))
    }
}

impl fmt::Display for LocalAgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}
