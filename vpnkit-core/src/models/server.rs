//! Logical servers and their physical entry IPs
//!
//! Field names follow the remote API's PascalCase JSON so a server list can
//! be deserialized directly from `/vpn/logicals`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::SmartProtocolConfig;
use crate::models::protocol::{ConnectionProtocol, VpnProtocol};

/// Feature bit flags carried by a logical server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerFeatures(pub u32);

impl ServerFeatures {
    pub const SECURE_CORE: ServerFeatures = ServerFeatures(1);
    pub const TOR: ServerFeatures = ServerFeatures(1 << 1);
    pub const P2P: ServerFeatures = ServerFeatures(1 << 2);
    pub const STREAMING: ServerFeatures = ServerFeatures(1 << 3);
    pub const IPV6: ServerFeatures = ServerFeatures(1 << 4);

    pub fn contains(&self, other: ServerFeatures) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Server grouping a user can toggle between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    #[default]
    Standard,
    SecureCore,
    P2p,
    Tor,
    /// Use whatever the secure-core toggle currently says
    Unspecified,
}

/// Optional per-protocol override of a server IP's entry point
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProtocolEntry {
    #[serde(rename = "IPv4", default)]
    pub ipv4: Option<String>,
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
}

/// A physical server behind a logical server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerIp {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "EntryIP", default)]
    pub entry_ip: Option<String>,
    #[serde(rename = "ExitIP")]
    pub exit_ip: String,
    pub domain: String,
    /// 0 means the IP is under maintenance
    pub status: u8,
    #[serde(rename = "X25519PublicKey", default)]
    pub x25519_public_key: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// Keys are API protocol names; a `null` value keeps the default entry IP
    #[serde(default)]
    pub entry_per_protocol: Option<HashMap<String, Option<ProtocolEntry>>>,
}

impl ServerIp {
    pub fn under_maintenance(&self) -> bool {
        self.status == 0
    }

    fn protocol_entry(&self, protocol: VpnProtocol) -> Option<Option<&ProtocolEntry>> {
        let entries = self.entry_per_protocol.as_ref()?;
        entries.get(protocol.api_name()).map(Option::as_ref)
    }

    /// Entry IP to use for `protocol`
    ///
    /// When the server publishes per-protocol entries, protocols missing from
    /// the map are not supported at all.
    pub fn entry_ip(&self, protocol: VpnProtocol) -> Option<&str> {
        match &self.entry_per_protocol {
            None => self.entry_ip.as_deref(),
            Some(_) => match self.protocol_entry(protocol)? {
                None => self.entry_ip.as_deref(),
                Some(entry) => entry.ipv4.as_deref().or(self.entry_ip.as_deref()),
            },
        }
    }

    /// Ports published for `protocol`, used as-is without probing
    pub fn override_ports(&self, protocol: VpnProtocol) -> Option<&[u16]> {
        self.protocol_entry(protocol)
            .flatten()
            .and_then(|entry| entry.ports.as_deref())
            .filter(|ports| !ports.is_empty())
    }

    pub fn supports(&self, protocol: VpnProtocol) -> bool {
        self.entry_ip(protocol).is_some()
    }

    /// Whether this IP can serve `protocol`; smart protocol needs at least one
    /// of its enabled candidates
    pub fn supports_connection(
        &self,
        protocol: &ConnectionProtocol,
        smart: &SmartProtocolConfig,
    ) -> bool {
        match protocol {
            ConnectionProtocol::Vpn(protocol) => self.supports(*protocol),
            ConnectionProtocol::Smart => {
                self.entry_per_protocol.is_none()
                    || smart
                        .enabled_protocols()
                        .into_iter()
                        .any(|protocol| self.supports(protocol))
            }
        }
    }
}

/// A connectable logical server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerModel {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub domain: String,
    pub load: u8,
    pub entry_country: String,
    pub exit_country: String,
    #[serde(default)]
    pub city: Option<String>,
    pub tier: u8,
    #[serde(default)]
    pub features: ServerFeatures,
    /// Lower is faster
    pub score: f64,
    /// 0 means the whole server is under maintenance
    pub status: u8,
    #[serde(rename = "Servers")]
    pub ips: Vec<ServerIp>,
    #[serde(default)]
    pub restricted: bool,
}

impl ServerModel {
    pub fn country_code(&self) -> &str {
        &self.exit_country
    }

    pub fn server_type(&self) -> ServerType {
        if self.features.contains(ServerFeatures::SECURE_CORE) {
            ServerType::SecureCore
        } else if self.features.contains(ServerFeatures::TOR) {
            ServerType::Tor
        } else if self.features.contains(ServerFeatures::P2P) {
            ServerType::P2p
        } else {
            ServerType::Standard
        }
    }

    pub fn is_secure_core(&self) -> bool {
        self.features.contains(ServerFeatures::SECURE_CORE)
    }

    pub fn is_tor(&self) -> bool {
        self.features.contains(ServerFeatures::TOR)
    }

    pub fn under_maintenance(&self) -> bool {
        self.status == 0 || self.ips.iter().all(ServerIp::under_maintenance)
    }

    pub fn supports(&self, protocol: &ConnectionProtocol, smart: &SmartProtocolConfig) -> bool {
        self.ips
            .iter()
            .any(|ip| ip.supports_connection(protocol, smart))
    }
}

/// Servers sharing an exit country
#[derive(Debug, Clone, PartialEq)]
pub struct CountryGroup {
    pub country_code: String,
    pub servers: Vec<ServerModel>,
}

impl CountryGroup {
    /// Groups `servers` by exit country, in order of first appearance
    pub fn group(servers: &[ServerModel]) -> Vec<CountryGroup> {
        let mut groups: Vec<CountryGroup> = Vec::new();
        for server in servers {
            match groups
                .iter_mut()
                .find(|group| group.country_code == server.country_code())
            {
                Some(group) => group.servers.push(server.clone()),
                None => groups.push(CountryGroup {
                    country_code: server.country_code().to_string(),
                    servers: vec![server.clone()],
                }),
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::protocol::{OpenVpnTransport, WireGuardTransport};

    fn server_ip(entries: Option<HashMap<String, Option<ProtocolEntry>>>) -> ServerIp {
        ServerIp {
            id: "ip-1".to_string(),
            entry_ip: Some("10.0.0.1".to_string()),
            exit_ip: "10.0.0.2".to_string(),
            domain: "node-ch-01.example.net".to_string(),
            status: 1,
            x25519_public_key: None,
            label: None,
            entry_per_protocol: entries,
        }
    }

    #[test]
    fn test_default_entry_ip_without_overrides() {
        let ip = server_ip(None);
        let wg = VpnProtocol::WireGuard(WireGuardTransport::Udp);
        assert_eq!(ip.entry_ip(wg), Some("10.0.0.1"));
        assert!(ip.supports(VpnProtocol::Ike));
        assert_eq!(ip.override_ports(wg), None);
    }

    #[test]
    fn test_override_replaces_entry_ip_and_restricts_protocols() {
        let mut entries = HashMap::new();
        entries.insert(
            "WireGuardUDP".to_string(),
            Some(ProtocolEntry {
                ipv4: Some("192.0.2.7".to_string()),
                ports: Some(vec![51820]),
            }),
        );
        entries.insert("OpenVPNTCP".to_string(), None);
        let ip = server_ip(Some(entries));

        let wg = VpnProtocol::WireGuard(WireGuardTransport::Udp);
        let ovpn_tcp = VpnProtocol::OpenVpn(OpenVpnTransport::Tcp);
        let ovpn_udp = VpnProtocol::OpenVpn(OpenVpnTransport::Udp);

        assert_eq!(ip.entry_ip(wg), Some("192.0.2.7"));
        assert_eq!(ip.override_ports(wg), Some(&[51820u16][..]));
        assert_eq!(ip.entry_ip(ovpn_tcp), Some("10.0.0.1"));
        assert!(!ip.supports(ovpn_udp));
    }

    #[test]
    fn test_deserialize_api_shape() {
        let json = r#"{
            "ID": "srv-1", "Name": "CH#1", "Domain": "ch-01.example.net",
            "Load": 12, "EntryCountry": "CH", "ExitCountry": "CH", "City": "Zurich",
            "Tier": 2, "Features": 4, "Score": 1.5, "Status": 1,
            "Servers": [{"ID": "ip", "EntryIP": "1.1.1.1", "ExitIP": "1.1.1.2",
                         "Domain": "ch-01.example.net", "Status": 1}]
        }"#;
        let server: ServerModel = serde_json::from_str(json).unwrap();
        assert_eq!(server.server_type(), ServerType::P2p);
        assert_eq!(server.ips.len(), 1);
        assert!(!server.under_maintenance());
    }
}
