//! One LocalAgent session
//!
//! Raw wire callbacks arrive as `AgentMessage`s on a channel owned by the
//! session. A pump task decodes them and forwards `LocalAgentEvent`s to the
//! VpnManager. Dropping the session closes the wire connection.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::state::LocalAgentState;
use crate::auth::certificate::VpnAuthenticationData;
use crate::error::LocalAgentError;
use crate::models::features::{FeatureChanges, VpnConnectionFeatures};

/// Agent endpoint inside every tunnel
pub const LOCAL_AGENT_HOST: &str = "10.2.0.1:65432";

/// Raw callback from the wire client
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    /// State string plus the features of the current status report
    State {
        state: String,
        features: Option<VpnConnectionFeatures>,
    },
    Error(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalAgentEvent {
    StateChanged(LocalAgentState),
    Error(LocalAgentError),
    /// Server-side feature values, to reconcile with the local ones
    Features(VpnConnectionFeatures),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalAgentConfiguration {
    pub host: String,
    /// Server name the agent certificate is checked against
    pub hostname: String,
    pub features: VpnConnectionFeatures,
}

impl LocalAgentConfiguration {
    pub fn new(hostname: impl Into<String>, features: VpnConnectionFeatures) -> Self {
        Self {
            host: LOCAL_AGENT_HOST.to_string(),
            hostname: hostname.into(),
            features,
        }
    }
}

/// Live wire connection
pub trait LocalAgentConnection: Send + Sync {
    /// Push only the features present in `changes`
    fn set_features(&self, changes: &FeatureChanges);

    fn close(&self);
}

pub trait LocalAgentConnectionFactory: Send + Sync {
    /// Open a connection that reports through `messages`
    fn make_connection(
        &self,
        data: &VpnAuthenticationData,
        configuration: &LocalAgentConfiguration,
        messages: mpsc::UnboundedSender<AgentMessage>,
    ) -> Result<Box<dyn LocalAgentConnection>, LocalAgentError>;
}

/// Turns raw messages into events
///
/// State changes are forwarded only when they differ from the previous
/// state. Feature reports count only in `Connected`, and not on the
/// transition out of `Connecting`.
#[derive(Debug, Default)]
struct MessageDecoder {
    previous: Option<LocalAgentState>,
}

impl MessageDecoder {
    fn decode(&mut self, message: AgentMessage) -> Vec<LocalAgentEvent> {
        match message {
            AgentMessage::Error(code) => match LocalAgentError::from_code(code) {
                Some(error) => vec![LocalAgentEvent::Error(error)],
                None => {
                    warn!(code = code, "Ignoring unknown LocalAgent error");
                    Vec::new()
                }
            },
            AgentMessage::State { state, features } => {
                let state = match state.parse::<LocalAgentState>() {
                    Ok(state) => state,
                    Err(e) => {
                        warn!("{}", e);
                        return Vec::new();
                    }
                };
                let previous = self.previous.replace(state);

                let mut events = Vec::new();
                if previous != Some(state) {
                    events.push(LocalAgentEvent::StateChanged(state));
                }
                if state != LocalAgentState::Connected {
                    return events;
                }
                if previous == Some(LocalAgentState::Connecting) {
                    debug!("Not checking features right after connecting");
                    return events;
                }
                if let Some(features) = features {
                    events.push(LocalAgentEvent::Features(features));
                }
                events
            }
        }
    }
}

pub struct LocalAgent {
    connection: Box<dyn LocalAgentConnection>,
    pump: JoinHandle<()>,
}

impl LocalAgent {
    /// Open a session; decoded events go to `events` until the session drops
    pub fn connect(
        factory: &dyn LocalAgentConnectionFactory,
        data: &VpnAuthenticationData,
        configuration: &LocalAgentConfiguration,
        events: mpsc::UnboundedSender<LocalAgentEvent>,
    ) -> Result<Self, LocalAgentError> {
        debug!(hostname = %configuration.hostname, "LocalAgent connecting");
        let (messages, mut incoming) = mpsc::unbounded_channel();
        let connection = factory.make_connection(data, configuration, messages)?;

        let pump = tokio::spawn(async move {
            let mut decoder = MessageDecoder::default();
            while let Some(message) = incoming.recv().await {
                for event in decoder.decode(message) {
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Self { connection, pump })
    }

    pub fn update(&self, changes: &FeatureChanges) {
        if !changes.is_empty() {
            self.connection.set_features(changes);
        }
    }
}

impl Drop for LocalAgent {
    fn drop(&mut self) {
        self.connection.close();
        self.pump.abort();
    }
}
