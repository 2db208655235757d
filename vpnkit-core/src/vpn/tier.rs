//! Tier gate and resolution failure alerts

use std::sync::Arc;
use tracing::{info, warn};

use crate::alerts::{Alert, AlertService};
use crate::auth::store::VpnKeychain;
use crate::models::features::tier;
use crate::models::server::{ServerModel, ServerType};

/// Why a request could not be resolved to a server or server IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionUnavailableReason {
    ProtocolNotSupported,
    /// Every candidate needs at least this tier
    Upgrade(u8),
    Maintenance,
    /// No IP of the chosen server fits the connection constraints
    ExistingConnection,
    /// Nothing matched the request at all, usually a stale server list
    NoServers,
}

pub struct ServerTierChecker {
    alerts: Arc<dyn AlertService>,
    keychain: Arc<dyn VpnKeychain>,
}

impl ServerTierChecker {
    pub fn new(alerts: Arc<dyn AlertService>, keychain: Arc<dyn VpnKeychain>) -> Self {
        Self { alerts, keychain }
    }

    /// Tier of the signed-in account, free when credentials are unreadable
    pub fn user_tier(&self) -> u8 {
        match self.keychain.fetch_cached() {
            Ok(credentials) => credentials.max_tier,
            Err(e) => {
                warn!("Cannot read credentials, assuming free tier: {}", e);
                tier::FREE
            }
        }
    }

    /// Whether `server` is above the account tier; alerts when it is
    pub fn server_requires_upgrade(&self, server: &ServerModel) -> bool {
        let user_tier = self.user_tier();
        if server.tier > user_tier {
            info!(server = %server.name, server_tier = server.tier, user_tier = user_tier, "Server requires upgrade");
            self.alerts.push(Alert::UpgradeRequired);
            return true;
        }
        false
    }

    pub fn notify_resolution_unavailable(
        &self,
        for_specific_country: bool,
        server_type: ServerType,
        reason: ResolutionUnavailableReason,
    ) {
        warn!(
            specific_country = for_specific_country,
            server_type = ?server_type,
            reason = ?reason,
            "Connection request cannot be resolved"
        );
        let alert = match reason {
            ResolutionUnavailableReason::ProtocolNotSupported => Alert::ProtocolNotSupported,
            ResolutionUnavailableReason::Upgrade(_) => Alert::UpgradeRequired,
            ResolutionUnavailableReason::Maintenance => Alert::Maintenance,
            ResolutionUnavailableReason::ExistingConnection => Alert::ExistingConnection,
            ResolutionUnavailableReason::NoServers => return,
        };
        self.alerts.push(alert);
    }
}
