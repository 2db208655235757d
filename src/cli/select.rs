//! Server selection over a server list read from disk

use colored::Colorize;
use serde::Deserialize;
use std::path::PathBuf;
use vpnkit_core::error::CoreError;
use vpnkit_core::models::features::{NatType, NetShieldType};
use vpnkit_core::models::request::{ConnectionRequest, ConnectionRequestType, CountryRequestType};
use vpnkit_core::models::server::{CountryGroup, ServerModel, ServerType};
use vpnkit_core::vpn::VpnServerSelector;

use super::{effective_config, ProtocolArg};

pub struct SelectArgs {
    pub servers: PathBuf,
    pub tier: u8,
    pub country: Option<String>,
    pub random: bool,
    pub protocol: ProtocolArg,
}

/// Same shape as the API's logicals response
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerList {
    logical_servers: Vec<ServerModel>,
}

pub fn run_select(args: &SelectArgs) -> Result<(), CoreError> {
    let config = effective_config()?;
    let contents = std::fs::read_to_string(&args.servers)?;
    let list: ServerList = serde_json::from_str(&contents)?;

    let selector = VpnServerSelector::new(
        ServerType::Standard,
        args.tier,
        CountryGroup::group(&list.logical_servers),
        config.smart_protocol.clone(),
    );
    match selector.select_server(&request(args)) {
        Ok(selection) => {
            let server = selection.server;
            println!(
                "{} {} ({}{})",
                "✓".green(),
                server.name.bold(),
                server.exit_country,
                server.city.map(|city| format!(", {}", city)).unwrap_or_default()
            );
            println!("  domain: {}", server.domain);
            println!("  tier:   {}", server.tier);
            println!("  score:  {}", server.score);
            println!("  load:   {}%", server.load);
        }
        Err(unavailable) => {
            println!("{} No server matches: {:?}", "✗".red(), unavailable.reason);
        }
    }
    Ok(())
}

fn request(args: &SelectArgs) -> ConnectionRequest {
    let connection_type = match (&args.country, args.random) {
        (Some(code), random) => ConnectionRequestType::Country {
            code: code.clone(),
            kind: if random {
                CountryRequestType::Random
            } else {
                CountryRequestType::Fastest
            },
        },
        (None, true) => ConnectionRequestType::Random,
        (None, false) => ConnectionRequestType::Fastest,
    };
    ConnectionRequest {
        server_type: ServerType::Unspecified,
        connection_type,
        connection_protocol: args.protocol.into(),
        netshield: NetShieldType::default(),
        nat_type: NatType::default(),
        safe_mode: None,
        profile_id: None,
    }
}
