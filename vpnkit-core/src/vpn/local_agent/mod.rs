//! LocalAgent: the authenticated control channel over a running tunnel
//!
//! The wire client is injected through `LocalAgentConnectionFactory`. This
//! module decodes its raw callbacks into `LocalAgentEvent`s.

pub mod session;
pub mod state;

pub use session::{
    AgentMessage, LocalAgent, LocalAgentConfiguration, LocalAgentConnection,
    LocalAgentConnectionFactory, LocalAgentEvent, LOCAL_AGENT_HOST,
};
pub use state::LocalAgentState;
