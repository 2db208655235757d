//! Port negotiation for an explicitly chosen protocol

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::checker::check_availability;
use super::resolver::AvailabilityCheckerResolver;
use crate::error::ProbeError;
use crate::models::protocol::VpnProtocol;
use crate::models::server::ServerIp;

pub struct SmartPortSelector {
    resolver: Arc<AvailabilityCheckerResolver>,
}

impl SmartPortSelector {
    pub fn new(resolver: Arc<AvailabilityCheckerResolver>) -> Self {
        Self { resolver }
    }

    /// Non-empty list of ports for `protocol` on `server_ip`
    ///
    /// Published override ports and unprobeable protocols skip probing. A
    /// round where nothing answers is repeated once before giving up.
    #[tracing::instrument(skip(self, server_ip), fields(server = %server_ip.domain))]
    pub async fn determine_ports(
        &self,
        protocol: VpnProtocol,
        server_ip: &ServerIp,
    ) -> Result<Vec<u16>, ProbeError> {
        if let Some(ports) = server_ip.override_ports(protocol) {
            debug!(?ports, "Using ports published for this server IP");
            return Ok(ports.to_vec());
        }

        let candidates = self.resolver.default_ports(protocol);
        let Some(checker) = self.resolver.checker(protocol) else {
            debug!(ports = ?candidates, "No checker for protocol, using default ports");
            return Ok(candidates);
        };

        let server_ip = Arc::new(server_ip.clone());
        for round in 1..=2 {
            let availability = check_availability(checker.clone(), server_ip.clone(), &candidates).await;
            if availability.is_available() {
                info!(ports = ?availability.ports(), round = round, "Found reachable ports");
                return Ok(availability.ports().to_vec());
            }
            warn!(round = round, "No port answered");
        }

        Err(ProbeError::NoPortsAvailable { protocol })
    }
}
