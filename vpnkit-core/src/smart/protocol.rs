//! Smart protocol: pick the most preferred protocol that is reachable

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::checker::{check_availability, Availability};
use super::resolver::AvailabilityCheckerResolver;
use crate::config::SmartProtocolConfig;
use crate::error::ProbeError;
use crate::models::protocol::{VpnProtocol, IKEV2_PORTS};
use crate::models::server::ServerIp;

/// Negotiated protocol and its reachable ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolSelection {
    pub protocol: VpnProtocol,
    pub ports: Vec<u16>,
}

pub struct SmartProtocol {
    resolver: Arc<AvailabilityCheckerResolver>,
}

impl SmartProtocol {
    pub fn new(resolver: Arc<AvailabilityCheckerResolver>) -> Self {
        Self { resolver }
    }

    /// Probes every enabled, probeable candidate concurrently and keeps the
    /// one with the best smart priority
    ///
    /// IKEv2 is never probed: it is the fallback when two rounds find
    /// nothing.
    #[tracing::instrument(skip(self, server_ip, config), fields(server = %server_ip.domain))]
    pub async fn determine_best_protocol(
        &self,
        server_ip: &ServerIp,
        config: &SmartProtocolConfig,
    ) -> Result<ProtocolSelection, ProbeError> {
        let candidates: Vec<VpnProtocol> = config
            .enabled_protocols()
            .into_iter()
            .filter(|protocol| *protocol != VpnProtocol::Ike && server_ip.supports(*protocol))
            .collect();

        let server_ip = Arc::new(server_ip.clone());
        for round in 1..=2 {
            let available = self.probe_round(&candidates, &server_ip).await;
            if let Some(selection) = best(available) {
                info!(protocol = %selection.protocol, ports = ?selection.ports, round = round, "Smart protocol selected");
                return Ok(selection);
            }
            warn!(round = round, "No smart protocol candidate answered");
        }

        if config.ikev2 && server_ip.supports(VpnProtocol::Ike) {
            info!("Falling back to IKEv2");
            return Ok(ProtocolSelection {
                protocol: VpnProtocol::Ike,
                ports: IKEV2_PORTS.to_vec(),
            });
        }
        Err(ProbeError::NoProtocolAvailable {
            ip: server_ip.entry_ip.clone().unwrap_or_else(|| server_ip.id.clone()),
        })
    }

    async fn probe_round(
        &self,
        candidates: &[VpnProtocol],
        server_ip: &Arc<ServerIp>,
    ) -> HashMap<VpnProtocol, Vec<u16>> {
        let mut available = HashMap::new();
        let mut rounds = JoinSet::new();

        for protocol in candidates.iter().copied() {
            if let Some(ports) = server_ip.override_ports(protocol) {
                available.insert(protocol, ports.to_vec());
                continue;
            }
            let Some(checker) = self.resolver.checker(protocol) else {
                debug!(protocol = %protocol, "No checker, not a smart candidate");
                continue;
            };
            let ports = self.resolver.default_ports(protocol);
            let server_ip = server_ip.clone();
            rounds.spawn(async move {
                (protocol, check_availability(checker, server_ip, &ports).await)
            });
        }

        while let Some(result) = rounds.join_next().await {
            match result {
                Ok((protocol, Availability::Available { ports })) => {
                    available.insert(protocol, ports);
                }
                Ok((protocol, Availability::Unavailable)) => {
                    debug!(protocol = %protocol, "Protocol unreachable");
                }
                Err(e) => warn!("Probe task failed: {}", e),
            }
        }
        available
    }
}

fn best(available: HashMap<VpnProtocol, Vec<u16>>) -> Option<ProtocolSelection> {
    available
        .into_iter()
        .min_by_key(|(protocol, _)| protocol.smart_priority())
        .map(|(protocol, ports)| ProtocolSelection { protocol, ports })
}
