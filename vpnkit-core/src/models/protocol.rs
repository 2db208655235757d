//! VPN protocols, transports, and the "smart" connection protocol

use serde::{Deserialize, Serialize};
use std::fmt;

/// OpenVPN transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenVpnTransport {
    Tcp,
    Udp,
}

/// WireGuard transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireGuardTransport {
    Udp,
    Tcp,
    Tls,
}

/// A concrete tunnel protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VpnProtocol {
    Ike,
    OpenVpn(OpenVpnTransport),
    WireGuard(WireGuardTransport),
}

/// How a tunnel authenticates against the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    /// Username and password from the credential store
    Credentials,
    /// Short-lived client certificate, with a LocalAgent session on top
    Certificate,
}

/// One OS tunnel configuration slot exists per family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    Ike,
    OpenVpn,
    WireGuard,
}

impl ProtocolFamily {
    pub const ALL: [ProtocolFamily; 3] = [
        ProtocolFamily::Ike,
        ProtocolFamily::OpenVpn,
        ProtocolFamily::WireGuard,
    ];
}

/// Fixed IKEv2 ports; IKEv2 is handled natively by the OS and never probed
pub const IKEV2_PORTS: [u16; 2] = [500, 4500];

impl VpnProtocol {
    /// Smart-protocol candidates in the order they are preferred
    pub const SMART_ORDER: [VpnProtocol; 6] = [
        VpnProtocol::WireGuard(WireGuardTransport::Udp),
        VpnProtocol::WireGuard(WireGuardTransport::Tcp),
        VpnProtocol::OpenVpn(OpenVpnTransport::Udp),
        VpnProtocol::OpenVpn(OpenVpnTransport::Tcp),
        VpnProtocol::WireGuard(WireGuardTransport::Tls),
        VpnProtocol::Ike,
    ];

    pub fn authentication_type(&self) -> AuthenticationType {
        match self {
            VpnProtocol::WireGuard(_) => AuthenticationType::Certificate,
            VpnProtocol::Ike | VpnProtocol::OpenVpn(_) => AuthenticationType::Credentials,
        }
    }

    pub fn family(&self) -> ProtocolFamily {
        match self {
            VpnProtocol::Ike => ProtocolFamily::Ike,
            VpnProtocol::OpenVpn(_) => ProtocolFamily::OpenVpn,
            VpnProtocol::WireGuard(_) => ProtocolFamily::WireGuard,
        }
    }

    /// Lower is preferred
    pub fn smart_priority(&self) -> usize {
        Self::SMART_ORDER
            .iter()
            .position(|p| p == self)
            .unwrap_or(Self::SMART_ORDER.len())
    }

    /// Name used by the remote API in per-protocol entry maps
    pub fn api_name(&self) -> &'static str {
        match self {
            VpnProtocol::Ike => "IKEv2",
            VpnProtocol::OpenVpn(OpenVpnTransport::Udp) => "OpenVPNUDP",
            VpnProtocol::OpenVpn(OpenVpnTransport::Tcp) => "OpenVPNTCP",
            VpnProtocol::WireGuard(WireGuardTransport::Udp) => "WireGuardUDP",
            VpnProtocol::WireGuard(WireGuardTransport::Tcp) => "WireGuardTCP",
            VpnProtocol::WireGuard(WireGuardTransport::Tls) => "WireGuardTLS",
        }
    }

    pub fn from_api_name(name: &str) -> Option<Self> {
        Self::SMART_ORDER
            .iter()
            .copied()
            .find(|p| p.api_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for VpnProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnProtocol::Ike => write!(f, "IKEv2"),
            VpnProtocol::OpenVpn(OpenVpnTransport::Udp) => write!(f, "OpenVPN (UDP)"),
            VpnProtocol::OpenVpn(OpenVpnTransport::Tcp) => write!(f, "OpenVPN (TCP)"),
            VpnProtocol::WireGuard(WireGuardTransport::Udp) => write!(f, "WireGuard (UDP)"),
            VpnProtocol::WireGuard(WireGuardTransport::Tcp) => write!(f, "WireGuard (TCP)"),
            VpnProtocol::WireGuard(WireGuardTransport::Tls) => write!(f, "WireGuard (TLS)"),
        }
    }
}

/// Protocol requested by the user: either explicit, or negotiated by probing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionProtocol {
    Smart,
    Vpn(VpnProtocol),
}

impl Default for ConnectionProtocol {
    fn default() -> Self {
        ConnectionProtocol::Smart
    }
}

impl fmt::Display for ConnectionProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionProtocol::Smart => write!(f, "Smart"),
            ConnectionProtocol::Vpn(protocol) => protocol.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smart_priority_order() {
        let wg_udp = VpnProtocol::WireGuard(WireGuardTransport::Udp);
        let ovpn_udp = VpnProtocol::OpenVpn(OpenVpnTransport::Udp);
        let ovpn_tcp = VpnProtocol::OpenVpn(OpenVpnTransport::Tcp);

        assert!(wg_udp.smart_priority() < ovpn_udp.smart_priority());
        assert!(ovpn_udp.smart_priority() < ovpn_tcp.smart_priority());
        assert_eq!(VpnProtocol::Ike.smart_priority(), 5);
    }

    #[test]
    fn test_api_names_roundtrip() {
        for protocol in VpnProtocol::SMART_ORDER {
            assert_eq!(VpnProtocol::from_api_name(protocol.api_name()), Some(protocol));
        }
        assert_eq!(VpnProtocol::from_api_name("Shadowsocks"), None);
    }

    #[test]
    fn test_only_wireguard_uses_certificates() {
        assert_eq!(
            VpnProtocol::WireGuard(WireGuardTransport::Tls).authentication_type(),
            AuthenticationType::Certificate
        );
        assert_eq!(
            VpnProtocol::OpenVpn(OpenVpnTransport::Udp).authentication_type(),
            AuthenticationType::Credentials
        );
        assert_eq!(VpnProtocol::Ike.authentication_type(), AuthenticationType::Credentials);
    }
}
