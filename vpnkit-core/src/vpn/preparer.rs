//! Turns a selected server into a `ConnectionConfiguration`
//!
//! Server IP selection, protocol and port negotiation and the tier check run
//! in that order. Every failure has already been reported to the user when
//! `prepare` returns `None`.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, error, warn};

use super::app_state::AppStateManager;
use super::tier::{ResolutionUnavailableReason, ServerTierChecker};
use crate::alerts::{Alert, AlertService};
use crate::config::SmartProtocolConfig;
use crate::error::VpnError;
use crate::models::connection::ConnectionConfiguration;
use crate::models::protocol::ConnectionProtocol;
use crate::models::request::ConnectionRequest;
use crate::models::server::{ServerIp, ServerModel};
use crate::smart::{AvailabilityCheckerResolver, ProtocolSelection, SmartPortSelector, SmartProtocol};

pub struct VpnConnectionPreparer {
    app_state: Arc<AppStateManager>,
    tier_checker: Arc<ServerTierChecker>,
    alerts: Arc<dyn AlertService>,
    port_selector: SmartPortSelector,
    smart_protocol: SmartProtocol,
}

impl VpnConnectionPreparer {
    pub fn new(
        app_state: Arc<AppStateManager>,
        tier_checker: Arc<ServerTierChecker>,
        resolver: Arc<AvailabilityCheckerResolver>,
        alerts: Arc<dyn AlertService>,
    ) -> Self {
        Self {
            app_state,
            tier_checker,
            alerts,
            port_selector: SmartPortSelector::new(resolver.clone()),
            smart_protocol: SmartProtocol::new(resolver),
        }
    }

    /// Prepare a configuration for `server` and hand it to the state machine
    pub async fn connect(
        &self,
        server: &ServerModel,
        request: &ConnectionRequest,
        smart_config: &SmartProtocolConfig,
    ) {
        if let Some(configuration) = self.prepare(server, request, smart_config).await {
            self.app_state.connect(configuration).await;
        }
    }

    #[tracing::instrument(skip_all, fields(server = %server.name, protocol = %request.connection_protocol))]
    pub async fn prepare(
        &self,
        server: &ServerModel,
        request: &ConnectionRequest,
        smart_config: &SmartProtocolConfig,
    ) -> Option<ConnectionConfiguration> {
        let Some(server_ip) = select_server_ip(server, &request.connection_protocol, smart_config) else {
            self.tier_checker.notify_resolution_unavailable(
                request.connection_type.is_specific_country(),
                server.server_type(),
                ResolutionUnavailableReason::ExistingConnection,
            );
            self.app_state.fail_attempt(VpnError::ConnectionFailed {
                reason: format!("no IP of {} fits the connection settings", server.name),
            });
            return None;
        };
        debug!(ip = %server_ip.id, "Selected server IP");

        let selection = match request.connection_protocol {
            ConnectionProtocol::Smart => {
                self.smart_protocol
                    .determine_best_protocol(&server_ip, smart_config)
                    .await
            }
            ConnectionProtocol::Vpn(protocol) => self
                .port_selector
                .determine_ports(protocol, &server_ip)
                .await
                .map(|ports| ProtocolSelection { protocol, ports }),
        };
        let selection = match selection {
            Ok(selection) => selection,
            Err(e) => {
                error!("Protocol negotiation failed: {}", e);
                self.alerts.push(Alert::NoReachablePorts);
                self.app_state.fail_attempt(VpnError::NoReachablePorts {
                    protocol: request.connection_protocol.to_string(),
                });
                return None;
            }
        };

        // Last, so a plan change during probing still blocks the server
        if self.tier_checker.server_requires_upgrade(server) {
            self.app_state.fail_attempt(VpnError::ConnectionFailed {
                reason: format!("{} requires a higher plan", server.name),
            });
            return None;
        }

        match ConnectionConfiguration::new(
            server.clone(),
            server_ip,
            selection.protocol,
            request.netshield,
            request.nat_type,
            request.safe_mode,
            selection.ports,
            Some(request.connection_type.clone()),
        ) {
            Ok(configuration) => Some(configuration),
            Err(e) => {
                warn!("Invalid connection configuration: {}", e);
                self.app_state.fail_attempt(e);
                None
            }
        }
    }
}

/// Random IP among those online that can serve `protocol`
fn select_server_ip(
    server: &ServerModel,
    protocol: &ConnectionProtocol,
    smart_config: &SmartProtocolConfig,
) -> Option<ServerIp> {
    eligible_ips(server, protocol, smart_config)
        .choose(&mut rand::thread_rng())
        .map(|ip| (*ip).clone())
}

fn eligible_ips<'a>(
    server: &'a ServerModel,
    protocol: &ConnectionProtocol,
    smart_config: &SmartProtocolConfig,
) -> Vec<&'a ServerIp> {
    server
        .ips
        .iter()
        .filter(|ip| !ip.under_maintenance() && ip.supports_connection(protocol, smart_config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::features::tier;
    use crate::models::protocol::{OpenVpnTransport, VpnProtocol};
    use crate::models::server::{ProtocolEntry, ServerFeatures};
    use std::collections::HashMap;

    fn ip(id: &str, status: u8) -> ServerIp {
        ServerIp {
            id: id.to_string(),
            entry_ip: Some("192.0.2.1".to_string()),
            exit_ip: "192.0.2.2".to_string(),
            domain: "node.example.net".to_string(),
            status,
            x25519_public_key: None,
            label: None,
            entry_per_protocol: None,
        }
    }

    fn server(ips: Vec<ServerIp>) -> ServerModel {
        ServerModel {
            id: "s1".to_string(),
            name: "CH#1".to_string(),
            domain: "ch-01.example.net".to_string(),
            load: 10,
            entry_country: "CH".to_string(),
            exit_country: "CH".to_string(),
            city: None,
            tier: tier::FREE,
            features: ServerFeatures::default(),
            score: 1.0,
            status: 1,
            ips,
            restricted: false,
        }
    }

    #[test]
    fn test_maintenance_ips_are_never_eligible() {
        let server = server(vec![ip("down", 0), ip("up", 1)]);

        let eligible = eligible_ips(&server, &ConnectionProtocol::Smart, &SmartProtocolConfig::default());

        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "up");
    }

    #[test]
    fn test_protocol_entries_restrict_eligible_ips() {
        // Given one IP publishing only WireGuard entries
        let mut wireguard_only = ip("wg", 1);
        wireguard_only.entry_per_protocol = Some(HashMap::from([(
            "WireGuardUDP".to_string(),
            Some(ProtocolEntry {
                ipv4: None,
                ports: None,
            }),
        )]));
        let server = server(vec![wireguard_only, ip("any", 1)]);
        let openvpn = ConnectionProtocol::Vpn(VpnProtocol::OpenVpn(OpenVpnTransport::Udp));

        // When asking for OpenVPN
        let eligible = eligible_ips(&server, &openvpn, &SmartProtocolConfig::default());

        // Then only the unrestricted IP remains
        assert_eq!(eligible.iter().map(|ip| ip.id.as_str()).collect::<Vec<_>>(), vec!["any"]);
    }

    #[test]
    fn test_no_eligible_ip_selects_nothing() {
        let server = server(vec![ip("down", 0)]);

        assert!(select_server_ip(&server, &ConnectionProtocol::Smart, &SmartProtocolConfig::default()).is_none());
    }
}
