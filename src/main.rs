//! vpnkit - connection tooling for consumer VPN clients
//!
//! A command-line front end over `vpnkit-core`: probe a server IP with the
//! smart protocol, run server selection over a server list, and manage the
//! TOML configuration.

use clap::{Parser, Subcommand};
use vpnkit_core::{error::CoreError, init_logging};

mod cli;

use cli::ProtocolArg;

#[derive(Parser)]
#[command(name = "vpnkit")]
#[command(about = "Smart protocol negotiation and server selection for VPN clients")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Negotiate a protocol and reachable ports against one server IP
    Probe {
        /// Entry IP of the server to probe
        #[arg(long)]
        ip: String,
        /// Protocol to negotiate; `smart` probes every enabled protocol
        #[arg(long, value_enum, default_value_t = ProtocolArg::Smart)]
        protocol: ProtocolArg,
    },
    /// Pick a server from a server-list JSON file
    Select {
        /// File holding a `LogicalServers` response
        #[arg(long)]
        servers: std::path::PathBuf,
        /// Account tier of the user
        #[arg(long, default_value_t = 0)]
        tier: u8,
        /// Restrict selection to one exit country
        #[arg(long)]
        country: Option<String>,
        /// Pick a random server instead of the fastest
        #[arg(long)]
        random: bool,
        #[arg(long, value_enum, default_value_t = ProtocolArg::Smart)]
        protocol: ProtocolArg,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// Generate an X25519 key pair and print its public half
    Keygen,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default configuration
    Init {
        /// Replace an existing configuration file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Load and validate the configuration file
    Validate,
}

fn main() {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Probe { ip, protocol } => cli::probe::run_probe(&ip, protocol),
        Commands::Select {
            servers,
            tier,
            country,
            random,
            protocol,
        } => cli::select::run_select(&cli::select::SelectArgs {
            servers,
            tier,
            country,
            random,
            protocol,
        }),
        Commands::Config { action } => match action {
            ConfigCommands::Init { force } => cli::config::run_config_init(force),
            ConfigCommands::Show => cli::config::run_config_show(),
            ConfigCommands::Validate => cli::config::run_config_validate(),
        },
        Commands::Keygen => cli::keygen::run_keygen(),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

/// 2 for configuration problems, 1 for everything that failed at runtime
fn exit_code(error: &CoreError) -> i32 {
    match error {
        CoreError::Config(_) | CoreError::Toml(_) | CoreError::TomlSerialize(_) => 2,
        CoreError::Keyring(_) => 2,
        CoreError::Json(_) => 2,
        CoreError::Vpn(_)
        | CoreError::Api(_)
        | CoreError::Certificate(_)
        | CoreError::Probe(_)
        | CoreError::LocalAgent(_)
        | CoreError::Io(_) => 1,
    }
}
