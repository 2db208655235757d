//! CLI command implementations
//!
//! This module contains the implementation of all CLI subcommands.

pub mod config;
pub mod keygen;
pub mod probe;
pub mod select;

use clap::ValueEnum;
use vpnkit_core::config::toml_config;
use vpnkit_core::config::CoreConfig;
use vpnkit_core::error::CoreError;
use vpnkit_core::models::protocol::{ConnectionProtocol, OpenVpnTransport, VpnProtocol, WireGuardTransport};

/// Protocol names accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProtocolArg {
    Smart,
    WireguardUdp,
    WireguardTcp,
    WireguardTls,
    OpenvpnUdp,
    OpenvpnTcp,
    Ikev2,
}

impl From<ProtocolArg> for ConnectionProtocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Smart => ConnectionProtocol::Smart,
            ProtocolArg::WireguardUdp => ConnectionProtocol::Vpn(VpnProtocol::WireGuard(WireGuardTransport::Udp)),
            ProtocolArg::WireguardTcp => ConnectionProtocol::Vpn(VpnProtocol::WireGuard(WireGuardTransport::Tcp)),
            ProtocolArg::WireguardTls => ConnectionProtocol::Vpn(VpnProtocol::WireGuard(WireGuardTransport::Tls)),
            ProtocolArg::OpenvpnUdp => ConnectionProtocol::Vpn(VpnProtocol::OpenVpn(OpenVpnTransport::Udp)),
            ProtocolArg::OpenvpnTcp => ConnectionProtocol::Vpn(VpnProtocol::OpenVpn(OpenVpnTransport::Tcp)),
            ProtocolArg::Ikev2 => ConnectionProtocol::Vpn(VpnProtocol::Ike),
        }
    }
}

/// Configuration on disk, or the defaults when none was written yet
pub fn effective_config() -> Result<CoreConfig, CoreError> {
    if toml_config::config_exists()? {
        toml_config::load_config()
    } else {
        Ok(CoreConfig::default())
    }
}
