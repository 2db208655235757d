//! Connection state types
//!
//! `VpnState` is what the tunnel reports, `AppState` is what the rest of the
//! application sees, and `ConnectionAttempt` tracks the attempt in flight.

use std::fmt;
use tokio::task::AbortHandle;

use crate::error::VpnError;

/// Identifies the tunnel a state refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub username: String,
    pub address: String,
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Raw status of the OS tunnel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VpnState {
    #[default]
    Invalid,
    Disconnected,
    Connecting(ServerDescriptor),
    Connected(ServerDescriptor),
    Reasserting(ServerDescriptor),
    Disconnecting(ServerDescriptor),
    Error(VpnError),
}

impl VpnState {
    /// No tunnel is up or coming up
    pub fn is_settled(&self) -> bool {
        matches!(self, VpnState::Invalid | VpnState::Disconnected | VpnState::Error(_))
    }

    pub fn is_disconnecting(&self) -> bool {
        matches!(self, VpnState::Disconnecting(_))
    }
}

impl fmt::Display for VpnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnState::Invalid => write!(f, "invalid"),
            VpnState::Disconnected => write!(f, "disconnected"),
            VpnState::Connecting(d) => write!(f, "connecting to {}", d),
            VpnState::Connected(d) => write!(f, "connected to {}", d),
            VpnState::Reasserting(d) => write!(f, "reasserting {}", d),
            VpnState::Disconnecting(d) => write!(f, "disconnecting from {}", d),
            VpnState::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Application-level connection state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    Disconnected,
    PreparingConnection,
    Connecting(ServerDescriptor),
    Connected(ServerDescriptor),
    Disconnecting(ServerDescriptor),
    Error(VpnError),
    Aborted { user_initiated: bool },
}

impl AppState {
    pub fn is_connected(&self) -> bool {
        matches!(self, AppState::Connected(_))
    }

    /// True for every state in which no usable tunnel exists
    ///
    /// Connecting counts as disconnected; disconnecting does not.
    pub fn is_disconnected(&self) -> bool {
        !matches!(self, AppState::Connected(_) | AppState::Disconnecting(_))
    }

    pub fn descriptor(&self) -> Option<&ServerDescriptor> {
        match self {
            AppState::Connecting(d) | AppState::Connected(d) | AppState::Disconnecting(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppState::Disconnected => write!(f, "disconnected"),
            AppState::PreparingConnection => write!(f, "preparing connection"),
            AppState::Connecting(d) => write!(f, "connecting to {}", d),
            AppState::Connected(d) => write!(f, "connected to {}", d),
            AppState::Disconnecting(d) => write!(f, "disconnecting from {}", d),
            AppState::Error(e) => write!(f, "error: {}", e),
            AppState::Aborted { user_initiated: true } => write!(f, "cancelled"),
            AppState::Aborted { user_initiated: false } => write!(f, "timed out"),
        }
    }
}

/// What a user interface shows for an `AppState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppDisplayState {
    #[default]
    Disconnected,
    Connecting,
    /// Tunnel is up but the LocalAgent has not confirmed the session yet
    LoadingConnectionInfo,
    Connected,
    Disconnecting,
}

impl AppDisplayState {
    /// `local_agent_connected` is `None` when the protocol has no LocalAgent
    pub fn derive(state: &AppState, local_agent_connected: Option<bool>) -> Self {
        match state {
            AppState::Disconnected | AppState::Error(_) | AppState::Aborted { .. } => {
                AppDisplayState::Disconnected
            }
            AppState::PreparingConnection | AppState::Connecting(_) => AppDisplayState::Connecting,
            AppState::Connected(_) => match local_agent_connected {
                Some(false) => AppDisplayState::LoadingConnectionInfo,
                _ => AppDisplayState::Connected,
            },
            AppState::Disconnecting(_) => AppDisplayState::Disconnecting,
        }
    }
}

impl fmt::Display for AppDisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppDisplayState::Disconnected => "disconnected",
            AppDisplayState::Connecting => "connecting",
            AppDisplayState::LoadingConnectionInfo => "loading connection info",
            AppDisplayState::Connected => "connected",
            AppDisplayState::Disconnecting => "disconnecting",
        };
        write!(f, "{}", name)
    }
}

/// Attempt bookkeeping, replacing an "attempting" flag next to the state
#[derive(Debug, Default)]
pub enum ConnectionAttempt {
    #[default]
    Idle,
    Attempting {
        id: u64,
        timeout: Option<AbortHandle>,
    },
    Established,
}

impl ConnectionAttempt {
    pub fn is_attempting(&self) -> bool {
        matches!(self, ConnectionAttempt::Attempting { .. })
    }

    /// Leave the attempt, cancelling its countdown
    pub fn finish(&mut self, established: bool) {
        if let ConnectionAttempt::Attempting {
            timeout: Some(handle), ..
        } = self
        {
            handle.abort();
        }
        *self = if established {
            ConnectionAttempt::Established
        } else {
            ConnectionAttempt::Idle
        };
    }
}

/// Progress of the stuck-disconnecting recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StuckDisconnect {
    #[default]
    NotStuck,
    /// An attempt started while the old tunnel was still disconnecting
    Suspected,
    /// Configurations were removed and the last attempt retried
    Retried,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ServerDescriptor {
        ServerDescriptor {
            username: "user".to_string(),
            address: "192.0.2.1".to_string(),
        }
    }

    #[test]
    fn test_connecting_counts_as_disconnected() {
        assert!(AppState::Connecting(descriptor()).is_disconnected());
        assert!(AppState::Aborted { user_initiated: false }.is_disconnected());
        assert!(!AppState::Disconnecting(descriptor()).is_disconnected());
        assert!(!AppState::Connected(descriptor()).is_disconnected());
    }

    #[test]
    fn test_display_waits_for_local_agent() {
        let connected = AppState::Connected(descriptor());

        assert_eq!(
            AppDisplayState::derive(&connected, Some(false)),
            AppDisplayState::LoadingConnectionInfo
        );
        assert_eq!(AppDisplayState::derive(&connected, Some(true)), AppDisplayState::Connected);
        assert_eq!(AppDisplayState::derive(&connected, None), AppDisplayState::Connected);
    }

    #[test]
    fn test_settled_states() {
        assert!(VpnState::Invalid.is_settled());
        assert!(VpnState::Error(VpnError::NetworkUnreachable).is_settled());
        assert!(!VpnState::Disconnecting(descriptor()).is_settled());
    }

    #[tokio::test]
    async fn test_finish_cancels_countdown() {
        let task = tokio::spawn(std::future::pending::<()>());
        let mut attempt = ConnectionAttempt::Attempting {
            id: 1,
            timeout: Some(task.abort_handle()),
        };

        attempt.finish(true);

        assert!(matches!(attempt, ConnectionAttempt::Established));
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
