//! Server selection for a connection request
//!
//! A selector is built from one snapshot of the server list and the user's
//! tier, answers a single request and is then dropped.

use rand::seq::SliceRandom;
use tracing::debug;

use super::tier::ResolutionUnavailableReason;
use crate::config::SmartProtocolConfig;
use crate::models::protocol::ConnectionProtocol;
use crate::models::request::{ConnectionRequest, ConnectionRequestType, CountryRequestType};
use crate::models::server::{CountryGroup, ServerFeatures, ServerModel, ServerType};

/// Chosen server and the server type the request resolved to
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSelection {
    pub server: ServerModel,
    pub server_type: ServerType,
}

/// Why selection produced nothing, with the context the alert needs
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionUnavailable {
    pub for_specific_country: bool,
    pub server_type: ServerType,
    pub reason: ResolutionUnavailableReason,
}

pub struct VpnServerSelector {
    server_type_toggle: ServerType,
    user_tier: u8,
    groups: Vec<CountryGroup>,
    smart_config: SmartProtocolConfig,
}

impl VpnServerSelector {
    pub fn new(
        server_type_toggle: ServerType,
        user_tier: u8,
        groups: Vec<CountryGroup>,
        smart_config: SmartProtocolConfig,
    ) -> Self {
        Self {
            server_type_toggle,
            user_tier,
            groups,
            smart_config,
        }
    }

    /// Best server for `request`
    ///
    /// Candidates are ranked by ascending score. Filters run in order
    /// (restricted, Tor, protocol, tier, maintenance) and the first one that
    /// empties the list names the failure.
    pub fn select_server(
        &self,
        request: &ConnectionRequest,
    ) -> Result<ServerSelection, ResolutionUnavailable> {
        let server_type = match request.server_type {
            ServerType::Unspecified => self.server_type_toggle,
            server_type => server_type,
        };
        let for_specific_country = request.connection_type.is_specific_country();
        let unavailable = |reason| ResolutionUnavailable {
            for_specific_country,
            server_type,
            reason,
        };

        let mut candidates: Vec<&ServerModel> = match &request.connection_type {
            ConnectionRequestType::Country { code, .. } => self
                .groups
                .iter()
                .filter(|group| group.country_code.eq_ignore_ascii_case(code))
                .flat_map(|group| group.servers.iter())
                .collect(),
            ConnectionRequestType::City { country, city } => self
                .groups
                .iter()
                .filter(|group| group.country_code.eq_ignore_ascii_case(country))
                .flat_map(|group| group.servers.iter())
                .filter(|server| server.city.as_deref() == Some(city.as_str()))
                .collect(),
            ConnectionRequestType::Fastest | ConnectionRequestType::Random => {
                self.groups.iter().flat_map(|group| group.servers.iter()).collect()
            }
        };
        candidates.retain(|server| matches_type(server, server_type) && !server.restricted);
        if server_type != ServerType::Tor {
            candidates.retain(|server| !server.is_tor());
        }
        if candidates.is_empty() {
            return Err(unavailable(ResolutionUnavailableReason::NoServers));
        }

        let mut candidates = self
            .filter(candidates, &request.connection_protocol)
            .map_err(unavailable)?;
        candidates.sort_by(|a, b| a.score.total_cmp(&b.score));

        let server = pick(&candidates, &request.connection_type)
            .ok_or_else(|| unavailable(ResolutionUnavailableReason::NoServers))?;
        debug!(server = %server.name, score = server.score, server_type = ?server_type, "Selected server");
        Ok(ServerSelection {
            server,
            server_type,
        })
    }

    fn filter<'a>(
        &self,
        candidates: Vec<&'a ServerModel>,
        protocol: &ConnectionProtocol,
    ) -> Result<Vec<&'a ServerModel>, ResolutionUnavailableReason> {
        let supported: Vec<&ServerModel> = candidates
            .into_iter()
            .filter(|server| server.supports(protocol, &self.smart_config))
            .collect();
        if supported.is_empty() {
            return Err(ResolutionUnavailableReason::ProtocolNotSupported);
        }

        let min_tier = supported.iter().map(|server| server.tier).min().unwrap_or_default();
        let accessible: Vec<&ServerModel> = supported
            .into_iter()
            .filter(|server| server.tier <= self.user_tier)
            .collect();
        if accessible.is_empty() {
            return Err(ResolutionUnavailableReason::Upgrade(min_tier));
        }

        let online: Vec<&ServerModel> = accessible
            .into_iter()
            .filter(|server| !server.under_maintenance())
            .collect();
        if online.is_empty() {
            return Err(ResolutionUnavailableReason::Maintenance);
        }
        Ok(online)
    }
}

fn matches_type(server: &ServerModel, server_type: ServerType) -> bool {
    match server_type {
        ServerType::SecureCore => server.is_secure_core(),
        ServerType::Tor => server.is_tor(),
        ServerType::P2p => {
            !server.is_secure_core() && server.features.contains(ServerFeatures::P2P)
        }
        ServerType::Standard | ServerType::Unspecified => !server.is_secure_core(),
    }
}

/// `candidates` is sorted fastest first
fn pick(candidates: &[&ServerModel], connection_type: &ConnectionRequestType) -> Option<ServerModel> {
    let random = || {
        candidates
            .choose(&mut rand::thread_rng())
            .map(|server| (*server).clone())
    };
    let fastest = || candidates.first().map(|server| (*server).clone());

    match connection_type {
        ConnectionRequestType::Random
        | ConnectionRequestType::Country {
            kind: CountryRequestType::Random,
            ..
        } => random(),
        ConnectionRequestType::Country {
            kind: CountryRequestType::Server(server),
            ..
        } => Some((**server).clone()),
        ConnectionRequestType::Fastest
        | ConnectionRequestType::City { .. }
        | ConnectionRequestType::Country {
            kind: CountryRequestType::Fastest,
            ..
        } => fastest(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::features::{tier, NatType, NetShieldType};
    use crate::models::server::ServerIp;

    fn ip() -> ServerIp {
        ServerIp {
            id: "ip".to_string(),
            entry_ip: Some("192.0.2.1".to_string()),
            exit_ip: "192.0.2.2".to_string(),
            domain: "node.example.net".to_string(),
            status: 1,
            x25519_public_key: None,
            label: None,
            entry_per_protocol: None,
        }
    }

    fn server(name: &str, country: &str, tier: u8, score: f64) -> ServerModel {
        ServerModel {
            id: name.to_string(),
            name: name.to_string(),
            domain: format!("{}.example.net", name.to_lowercase()),
            load: 20,
            entry_country: country.to_string(),
            exit_country: country.to_string(),
            city: None,
            tier,
            features: ServerFeatures::default(),
            score,
            status: 1,
            ips: vec![ip()],
            restricted: false,
        }
    }

    fn request(connection_type: ConnectionRequestType) -> ConnectionRequest {
        ConnectionRequest {
            server_type: ServerType::Unspecified,
            connection_type,
            connection_protocol: ConnectionProtocol::Smart,
            netshield: NetShieldType::Off,
            nat_type: NatType::Strict,
            safe_mode: None,
            profile_id: None,
        }
    }

    fn selector(servers: &[ServerModel], user_tier: u8) -> VpnServerSelector {
        VpnServerSelector::new(
            ServerType::Standard,
            user_tier,
            CountryGroup::group(servers),
            SmartProtocolConfig::default(),
        )
    }

    fn country(code: &str) -> ConnectionRequestType {
        ConnectionRequestType::Country {
            code: code.to_string(),
            kind: CountryRequestType::Fastest,
        }
    }

    #[test]
    fn test_fastest_in_country_has_lowest_score() {
        // Given two eligible servers in the same country
        let servers = [server("A", "CH", tier::FREE, 50.0), server("B", "CH", tier::FREE, 15.0)];

        // When asking for the fastest one
        let selection = selector(&servers, tier::FREE)
            .select_server(&request(country("CH")))
            .unwrap();

        // Then the lower score wins
        assert_eq!(selection.server.name, "B");
        assert_eq!(selection.server_type, ServerType::Standard);
    }

    #[test]
    fn test_tier_filter_reports_minimum_tier() {
        let servers = [server("P1", "CH", tier::PLUS, 1.0), server("B1", "CH", tier::BASIC, 2.0)];

        let result = selector(&servers, tier::FREE).select_server(&request(country("CH")));

        assert_eq!(
            result.unwrap_err(),
            ResolutionUnavailable {
                for_specific_country: true,
                server_type: ServerType::Standard,
                reason: ResolutionUnavailableReason::Upgrade(tier::BASIC),
            }
        );
    }

    #[test]
    fn test_inaccessible_servers_are_skipped_for_fastest() {
        let servers = [server("P1", "CH", tier::PLUS, 1.0), server("F1", "DE", tier::FREE, 80.0)];

        let selection = selector(&servers, tier::FREE)
            .select_server(&request(ConnectionRequestType::Fastest))
            .unwrap();

        assert_eq!(selection.server.name, "F1");
    }

    #[test]
    fn test_maintenance_after_tier() {
        let mut down = server("F1", "CH", tier::FREE, 1.0);
        down.status = 0;

        let result = selector(&[down], tier::FREE).select_server(&request(country("CH")));

        assert_eq!(result.unwrap_err().reason, ResolutionUnavailableReason::Maintenance);
    }

    #[test]
    fn test_restricted_and_tor_servers_excluded() {
        let mut restricted = server("R1", "CH", tier::FREE, 1.0);
        restricted.restricted = true;
        let mut tor = server("T1", "CH", tier::FREE, 2.0);
        tor.features = ServerFeatures::TOR;
        let servers = [restricted, tor, server("F1", "CH", tier::FREE, 9.0)];

        let selection = selector(&servers, tier::FREE)
            .select_server(&request(country("CH")))
            .unwrap();

        assert_eq!(selection.server.name, "F1");
    }

    #[test]
    fn test_city_request_filters_by_city() {
        let mut zurich = server("Z1", "CH", tier::FREE, 30.0);
        zurich.city = Some("Zurich".to_string());
        let mut geneva = server("G1", "CH", tier::FREE, 5.0);
        geneva.city = Some("Geneva".to_string());

        let selection = selector(&[zurich, geneva], tier::FREE)
            .select_server(&request(ConnectionRequestType::City {
                country: "CH".to_string(),
                city: "Zurich".to_string(),
            }))
            .unwrap();

        assert_eq!(selection.server.name, "Z1");
    }

    #[test]
    fn test_secure_core_toggle_applies_to_unspecified_type() {
        let mut secure = server("SC1", "CH", tier::PLUS, 10.0);
        secure.features = ServerFeatures::SECURE_CORE;
        let servers = [secure, server("F1", "CH", tier::FREE, 1.0)];
        let selector = VpnServerSelector::new(
            ServerType::SecureCore,
            tier::PLUS,
            CountryGroup::group(&servers),
            SmartProtocolConfig::default(),
        );

        let selection = selector.select_server(&request(country("CH"))).unwrap();

        assert_eq!(selection.server.name, "SC1");
        assert_eq!(selection.server_type, ServerType::SecureCore);
    }

    #[test]
    fn test_unknown_country_has_no_servers() {
        let servers = [server("F1", "CH", tier::FREE, 1.0)];

        let result = selector(&servers, tier::FREE).select_server(&request(country("SE")));

        assert_eq!(result.unwrap_err().reason, ResolutionUnavailableReason::NoServers);
    }
}
