//! Resolved connection plans
//!
//! `ConnectionConfiguration` is what selection and probing produce.
//! `VpnManagerConfiguration` is derived from it for a single tunnel start and
//! never read back.

use serde::{Deserialize, Serialize};

use crate::auth::certificate::VpnAuthenticationData;
use crate::error::VpnError;
use crate::models::credentials::VpnCredentials;
use crate::models::features::{NatType, NetShieldType, VpnConnectionFeatures};
use crate::models::protocol::VpnProtocol;
use crate::models::request::ConnectionRequestType;
use crate::models::server::{ServerIp, ServerModel};
use crate::types::VpnPassword;

/// A validated connection plan
///
/// The port list is never empty and the server IP always has an entry for
/// the chosen protocol; `new` rejects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfiguration {
    server: ServerModel,
    server_ip: ServerIp,
    vpn_protocol: VpnProtocol,
    netshield: NetShieldType,
    nat_type: NatType,
    safe_mode: Option<bool>,
    ports: Vec<u16>,
    intent: Option<ConnectionRequestType>,
}

impl ConnectionConfiguration {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server: ServerModel,
        server_ip: ServerIp,
        vpn_protocol: VpnProtocol,
        netshield: NetShieldType,
        nat_type: NatType,
        safe_mode: Option<bool>,
        ports: Vec<u16>,
        intent: Option<ConnectionRequestType>,
    ) -> Result<Self, VpnError> {
        if ports.is_empty() {
            return Err(VpnError::EmptyPortList);
        }
        if !server_ip.supports(vpn_protocol) {
            return Err(VpnError::UnsupportedProtocol {
                ip: server_ip.id.clone(),
                protocol: vpn_protocol.to_string(),
            });
        }
        Ok(Self {
            server,
            server_ip,
            vpn_protocol,
            netshield,
            nat_type,
            safe_mode,
            ports,
            intent,
        })
    }

    pub fn server(&self) -> &ServerModel {
        &self.server
    }

    pub fn server_ip(&self) -> &ServerIp {
        &self.server_ip
    }

    pub fn vpn_protocol(&self) -> VpnProtocol {
        self.vpn_protocol
    }

    pub fn netshield(&self) -> NetShieldType {
        self.netshield
    }

    pub fn nat_type(&self) -> NatType {
        self.nat_type
    }

    pub fn safe_mode(&self) -> Option<bool> {
        self.safe_mode
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn intent(&self) -> Option<&ConnectionRequestType> {
        self.intent.as_ref()
    }

    /// Entry address for the chosen protocol
    pub fn entry_ip(&self) -> Option<&str> {
        self.server_ip.entry_ip(self.vpn_protocol)
    }

    pub fn with_changed_netshield(&self, netshield: NetShieldType) -> Self {
        Self {
            netshield,
            ..self.clone()
        }
    }

    pub fn with_changed_nat_type(&self, nat_type: NatType) -> Self {
        Self {
            nat_type,
            ..self.clone()
        }
    }

    pub fn with_changed_safe_mode(&self, safe_mode: Option<bool>) -> Self {
        Self {
            safe_mode,
            ..self.clone()
        }
    }

    /// Applies a server-pushed feature set, keeping the rest of the plan
    pub fn with_features(&self, features: &VpnConnectionFeatures) -> Self {
        Self {
            netshield: features.netshield,
            nat_type: features.nat_type,
            safe_mode: features.safe_mode,
            ..self.clone()
        }
    }

    /// Substitutes the server IP when it still supports the chosen protocol
    pub fn with_changed_server_ip(&self, server_ip: ServerIp) -> Result<Self, VpnError> {
        Self::new(
            self.server.clone(),
            server_ip,
            self.vpn_protocol,
            self.netshield,
            self.nat_type,
            self.safe_mode,
            self.ports.clone(),
            self.intent.clone(),
        )
    }

    /// Substitutes the server and IP, keeping protocol, ports and features
    pub fn with_changed_server(&self, server: ServerModel, server_ip: ServerIp) -> Result<Self, VpnError> {
        Self::new(
            server,
            server_ip,
            self.vpn_protocol,
            self.netshield,
            self.nat_type,
            self.safe_mode,
            self.ports.clone(),
            self.intent.clone(),
        )
    }
}

const CONFIG_CONCAT_CHAR: char = '+';

/// Tunnel-level configuration for one tunnel start
#[derive(Debug, Clone)]
pub struct VpnManagerConfiguration {
    pub hostname: String,
    pub server_id: String,
    pub entry_server_address: String,
    pub exit_server_address: String,
    pub username: String,
    pub password: VpnPassword,
    pub password_reference: String,
    pub auth_data: Option<VpnAuthenticationData>,
    pub server_public_key: Option<String>,
    pub vpn_protocol: VpnProtocol,
    pub netshield: NetShieldType,
    pub vpn_accelerator: bool,
    pub bouncing: Option<String>,
    pub ports: Vec<u16>,
}

impl VpnManagerConfiguration {
    /// Builds the tunnel configuration from a plan plus live secrets
    pub fn derive(
        connection: &ConnectionConfiguration,
        credentials: &VpnCredentials,
        password_reference: &str,
        auth_data: Option<VpnAuthenticationData>,
        client_label: &str,
        vpn_accelerator: bool,
    ) -> Result<Self, VpnError> {
        let server_ip = connection.server_ip();
        let entry = connection
            .entry_ip()
            .ok_or_else(|| VpnError::UnsupportedProtocol {
                ip: server_ip.id.clone(),
                protocol: connection.vpn_protocol().to_string(),
            })?;

        Ok(Self {
            hostname: server_ip.domain.clone(),
            server_id: connection.server().id.clone(),
            entry_server_address: entry.to_string(),
            exit_server_address: server_ip.exit_ip.clone(),
            username: format!(
                "{}{}",
                credentials.name,
                username_suffix(client_label, connection, vpn_accelerator)
            ),
            password: credentials.password.clone(),
            password_reference: password_reference.to_string(),
            auth_data,
            server_public_key: server_ip.x25519_public_key.clone(),
            vpn_protocol: connection.vpn_protocol(),
            netshield: connection.netshield(),
            vpn_accelerator,
            bouncing: server_ip.label.clone(),
            ports: connection.ports().to_vec(),
        })
    }

    /// Feature set handed to the LocalAgent for certificate protocols
    pub fn features(&self, nat_type: NatType, safe_mode: Option<bool>) -> VpnConnectionFeatures {
        VpnConnectionFeatures {
            netshield: self.netshield,
            vpn_accelerator: self.vpn_accelerator,
            bouncing: self.bouncing.clone(),
            nat_type,
            safe_mode,
        }
    }
}

/// `+label[+f1|+f2][+nst][+b:bouncing]`
fn username_suffix(
    client_label: &str,
    connection: &ConnectionConfiguration,
    vpn_accelerator: bool,
) -> String {
    let mut parts = vec![client_label.to_string()];
    match connection.netshield() {
        NetShieldType::Off => {}
        NetShieldType::Level1 => parts.push("f1".to_string()),
        NetShieldType::Level2 => parts.push("f2".to_string()),
    }
    // the server expects the flag when acceleration is turned off
    if !vpn_accelerator {
        parts.push("nst".to_string());
    }
    if let Some(label) = connection.server_ip().label.as_deref().filter(|l| !l.is_empty()) {
        parts.push(format!("b:{}", label));
    }
    parts
        .into_iter()
        .map(|part| format!("{}{}", CONFIG_CONCAT_CHAR, part))
        .collect()
}
