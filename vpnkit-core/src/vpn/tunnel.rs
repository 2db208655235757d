//! OS tunnel provider contract
//!
//! One tunnel configuration exists per protocol family. Status changes are
//! announced on a broadcast channel; the current status is always read back
//! from the provider rather than taken from the announcement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::VpnError;
use crate::models::connection::VpnManagerConfiguration;
use crate::models::protocol::ProtocolFamily;

/// Everything saved to the OS for one tunnel start
#[derive(Debug, Clone)]
pub struct TunnelConfiguration {
    pub manager: VpnManagerConfiguration,
    /// Reconnect automatically; only after a first successful connection
    pub on_demand: bool,
    pub kill_switch: bool,
    pub exclude_local_networks: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    Reasserting,
    Disconnecting,
}

/// Opaque messages to the running tunnel extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderMessage {
    CertificateRefreshed,
}

#[async_trait]
pub trait TunnelProvider: Send + Sync {
    async fn save(
        &self,
        family: ProtocolFamily,
        configuration: &TunnelConfiguration,
    ) -> Result<(), VpnError>;

    async fn set_on_demand(&self, family: ProtocolFamily, enabled: bool) -> Result<(), VpnError>;

    fn is_on_demand_enabled(&self, family: ProtocolFamily) -> bool;

    async fn start(&self, family: ProtocolFamily) -> Result<(), VpnError>;

    async fn stop(&self, family: ProtocolFamily);

    /// Delete the saved configuration for `family`
    async fn remove(&self, family: ProtocolFamily) -> Result<(), VpnError>;

    fn status(&self, family: ProtocolFamily) -> TunnelStatus;

    /// Error that ended the last session, if the tunnel stopped on one
    fn last_disconnect_error(&self, family: ProtocolFamily) -> Option<VpnError>;

    fn connected_since(&self, family: ProtocolFamily) -> Option<DateTime<Utc>>;

    async fn send_message(
        &self,
        family: ProtocolFamily,
        message: ProviderMessage,
    ) -> Result<(), VpnError>;

    /// Announces the family whose status changed
    fn status_changes(&self) -> broadcast::Receiver<ProtocolFamily>;
}
