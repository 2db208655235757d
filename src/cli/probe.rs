//! Smart protocol and port negotiation against a single server IP

use colored::Colorize;
use std::sync::Arc;
use tracing::info;
use vpnkit_core::config::SmartProtocolConfig;
use vpnkit_core::error::CoreError;
use vpnkit_core::models::protocol::{ConnectionProtocol, VpnProtocol};
use vpnkit_core::models::server::ServerIp;
use vpnkit_core::smart::{AvailabilityCheckerResolver, SmartPortSelector, SmartProtocol};

use super::{effective_config, ProtocolArg};

pub fn run_probe(ip: &str, protocol: ProtocolArg) -> Result<(), CoreError> {
    let config = effective_config()?;
    let resolver = Arc::new(
        AvailabilityCheckerResolver::native(&config, None)
            .map_err(|e| CoreError::Config(e.into()))?,
    );
    let server_ip = probe_target(ip);

    println!("Probing {} ({})", ip.bold(), ConnectionProtocol::from(protocol));
    let runtime = tokio::runtime::Runtime::new()?;
    let (protocol, ports) = runtime.block_on(negotiate(
        resolver,
        &server_ip,
        protocol.into(),
        &config.smart_protocol,
    ))?;

    info!(protocol = %protocol, ports = ?ports, "Probe finished");
    let ports: Vec<String> = ports.iter().map(u16::to_string).collect();
    println!("{} {}", "✓".green(), protocol.to_string().green().bold());
    println!("  ports: {}", ports.join(", "));
    Ok(())
}

async fn negotiate(
    resolver: Arc<AvailabilityCheckerResolver>,
    server_ip: &ServerIp,
    protocol: ConnectionProtocol,
    smart_config: &SmartProtocolConfig,
) -> Result<(VpnProtocol, Vec<u16>), CoreError> {
    match protocol {
        ConnectionProtocol::Smart => {
            let selection = SmartProtocol::new(resolver)
                .determine_best_protocol(server_ip, smart_config)
                .await?;
            Ok((selection.protocol, selection.ports))
        }
        ConnectionProtocol::Vpn(protocol) => {
            let ports = SmartPortSelector::new(resolver)
                .determine_ports(protocol, server_ip)
                .await?;
            Ok((protocol, ports))
        }
    }
}

/// A bare server IP with no per-protocol overrides, so every protocol is
/// probed on its default ports
fn probe_target(ip: &str) -> ServerIp {
    ServerIp {
        id: ip.to_string(),
        entry_ip: Some(ip.to_string()),
        exit_ip: ip.to_string(),
        domain: ip.to_string(),
        status: 1,
        x25519_public_key: None,
        label: None,
        entry_per_protocol: None,
    }
}
