//! Network reachability via NetworkManager
//!
//! `connect` refuses to start a tunnel while the machine has no network.

use async_trait::async_trait;
use tracing::warn;
use zbus::Connection;

/// NM_STATE_CONNECTED_SITE; anything below has no usable route
const NM_STATE_CONNECTED_SITE: u32 = 60;

#[async_trait]
pub trait NetworkReachability: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Reachability read from the NetworkManager `State` property
pub struct NetworkManagerReachability {
    connection: Connection,
}

impl NetworkManagerReachability {
    /// Connects to the system bus and checks NetworkManager is running
    ///
    /// # Errors
    ///
    /// Returns `ReachabilityError` if D-Bus connection fails or NetworkManager is unavailable
    #[tracing::instrument]
    pub async fn new() -> Result<Self, ReachabilityError> {
        let connection = Connection::system().await?;

        let proxy = zbus::fdo::DBusProxy::new(&connection).await?;
        let bus_name = zbus::names::BusName::try_from("org.freedesktop.NetworkManager")
            .map_err(|e| ReachabilityError::QueryFailed(e.to_string()))?;
        let name_has_owner = proxy
            .name_has_owner(bus_name)
            .await
            .map_err(|e| ReachabilityError::QueryFailed(e.to_string()))?;

        if !name_has_owner {
            return Err(ReachabilityError::NetworkManagerUnavailable);
        }

        Ok(Self { connection })
    }

    async fn network_state(&self) -> Result<u32, ReachabilityError> {
        let proxy = zbus::Proxy::new(
            &self.connection,
            "org.freedesktop.NetworkManager",
            "/org/freedesktop/NetworkManager",
            "org.freedesktop.NetworkManager",
        )
        .await?;

        proxy
            .get_property("State")
            .await
            .map_err(|e| ReachabilityError::QueryFailed(e.to_string()))
    }
}

#[async_trait]
impl NetworkReachability for NetworkManagerReachability {
    /// A failed query counts as reachable so a D-Bus hiccup never blocks connecting
    async fn is_reachable(&self) -> bool {
        match self.network_state().await {
            Ok(state) => state >= NM_STATE_CONNECTED_SITE,
            Err(e) => {
                warn!("Could not read network state: {}", e);
                true
            }
        }
    }
}

/// Used where no NetworkManager is available
pub struct AlwaysReachable;

#[async_trait]
impl NetworkReachability for AlwaysReachable {
    async fn is_reachable(&self) -> bool {
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReachabilityError {
    #[error("D-Bus connection failed: {0}")]
    DBusConnectionFailed(#[from] zbus::Error),

    #[error("NetworkManager not available")]
    NetworkManagerUnavailable,

    #[error("Failed to query network state: {0}")]
    QueryFailed(String),
}
