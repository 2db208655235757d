//! Core library for the vpnkit connection engine
//!
//! Turns a connection request into a running tunnel: server selection,
//! smart protocol and port negotiation, the connection state machine, and
//! the local agent session that keeps certificates and features in sync.

pub mod error;
pub mod types;

pub mod alerts;
pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod observers;
pub mod properties;
pub mod smart;
pub mod vpn;

/// Initialize logging infrastructure
///
/// Sends events to the systemd journal when running as a unit, otherwise to
/// stderr. `RUST_LOG` overrides the default `info` level.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            let journal_layer = tracing_journald::layer()?;
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(filter)
                .try_init()?;
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
        .with(filter)
        .try_init()?;

    Ok(())
}
