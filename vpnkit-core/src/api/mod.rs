//! Remote API contract
//!
//! The connection core only sees the `VpnApi` trait; `HttpVpnApi` is the
//! production implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CoreConfig;
use crate::error::ApiError;
use crate::models::credentials::VpnCredentials;
use crate::models::server::ServerModel;
use crate::properties::PropertiesManager;

pub mod http;

pub use http::HttpVpnApi;

/// Public IP as seen by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserLocation {
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(rename = "ISP", default)]
    pub isp: Option<String>,
}

/// One active session on the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActiveSession {
    #[serde(rename = "SessionID")]
    pub session_id: String,
    #[serde(rename = "ExitIP", default)]
    pub exit_ip: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OpenVpnPorts {
    #[serde(rename = "UDP", default)]
    pub udp: Vec<u16>,
    #[serde(rename = "TCP", default)]
    pub tcp: Vec<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireGuardPorts {
    #[serde(rename = "UDP", default)]
    pub udp: Vec<u16>,
    #[serde(rename = "TCP", default)]
    pub tcp: Vec<u16>,
    #[serde(rename = "TLS", default)]
    pub tls: Vec<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPorts {
    #[serde(rename = "OpenVPN", default)]
    pub openvpn: OpenVpnPorts,
    #[serde(rename = "WireGuard", default)]
    pub wireguard: WireGuardPorts,
}

/// Globally enabled features
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeatureFlags {
    #[serde(default)]
    pub net_shield: bool,
    #[serde(rename = "ModerateNAT", default)]
    pub moderate_nat: bool,
    #[serde(default)]
    pub safe_mode: bool,
    #[serde(default)]
    pub vpn_accelerator: bool,
}

/// Protocols the API allows smart selection to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartProtocolFlags {
    #[serde(rename = "IKEv2", default = "allowed")]
    pub ikev2: bool,
    #[serde(rename = "OpenVPN", default = "allowed")]
    pub openvpn: bool,
    #[serde(rename = "WireGuard", default = "allowed")]
    pub wireguard: bool,
    #[serde(rename = "WireGuardTCP", default = "allowed")]
    pub wireguard_tcp: bool,
    #[serde(rename = "WireGuardTLS", default = "allowed")]
    pub wireguard_tls: bool,
}

fn allowed() -> bool {
    true
}

impl Default for SmartProtocolFlags {
    fn default() -> Self {
        Self {
            ikev2: true,
            openvpn: true,
            wireguard: true,
            wireguard_tcp: true,
            wireguard_tls: true,
        }
    }
}

/// Response of `/vpn/clientconfig`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientFeatureConfig {
    #[serde(default)]
    pub default_ports: DefaultPorts,
    #[serde(default)]
    pub feature_flags: FeatureFlags,
    #[serde(default)]
    pub smart_protocol: SmartProtocolFlags,
}

impl ClientFeatureConfig {
    /// Overlay server-provided ports and smart protocol restrictions
    ///
    /// Empty port lists from the API leave the local defaults untouched, and
    /// a protocol disabled locally stays disabled.
    pub fn apply_to(&self, config: &mut CoreConfig) {
        fn overlay(target: &mut Vec<u16>, ports: &[u16]) {
            if !ports.is_empty() {
                *target = ports.to_vec();
            }
        }

        let ports = &self.default_ports;
        overlay(&mut config.openvpn.default_udp_ports, &ports.openvpn.udp);
        overlay(&mut config.openvpn.default_tcp_ports, &ports.openvpn.tcp);
        overlay(&mut config.wireguard.default_udp_ports, &ports.wireguard.udp);
        overlay(&mut config.wireguard.default_tcp_ports, &ports.wireguard.tcp);
        overlay(&mut config.wireguard.default_tls_ports, &ports.wireguard.tls);

        let smart = &mut config.smart_protocol;
        smart.ikev2 &= self.smart_protocol.ikev2;
        smart.openvpn_udp &= self.smart_protocol.openvpn;
        smart.openvpn_tcp &= self.smart_protocol.openvpn;
        smart.wireguard_udp &= self.smart_protocol.wireguard;
        smart.wireguard_tcp &= self.smart_protocol.wireguard_tcp;
        smart.wireguard_tls &= self.smart_protocol.wireguard_tls;
    }
}

#[async_trait]
pub trait VpnApi: Send + Sync {
    async fn servers(&self) -> Result<Vec<ServerModel>, ApiError>;

    /// Fresh credentials, always from the network
    async fn client_credentials(&self) -> Result<VpnCredentials, ApiError>;

    async fn sessions(&self) -> Result<Vec<ActiveSession>, ApiError>;

    async fn location(&self) -> Result<UserLocation, ApiError>;

    async fn client_config(&self) -> Result<ClientFeatureConfig, ApiError>;

    /// Store a new location and server list when the public IP changed
    ///
    /// Returns whether anything was refreshed.
    async fn refresh_server_info_if_ip_changed(
        &self,
        properties: &PropertiesManager,
    ) -> Result<bool, ApiError> {
        let location = self.location().await?;
        let previous = properties.user_location();
        if previous.as_ref().map(|l| l.ip.as_str()) == Some(location.ip.as_str()) {
            debug!("Public IP unchanged, keeping cached server list");
            return Ok(false);
        }

        let servers = self.servers().await?;
        info!(ip = %location.ip, servers = servers.len(), "Public IP changed, refreshed server list");
        properties.set_user_location(Some(&location));
        properties.set_servers(&servers);
        Ok(true)
    }
}
