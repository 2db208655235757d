//! User-facing alerts
//!
//! Every terminal failure is reported through exactly one `Alert`; raw error
//! codes never cross this boundary.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::models::credentials::AccountPlan;
use crate::models::server::ServerModel;

/// Old and new server when the core had to move the user
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectInfo {
    pub from_server: ServerModel,
    pub to_server: ServerModel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// Selected server requires a higher tier
    UpgradeRequired,
    /// Every candidate server is under maintenance
    Maintenance,
    /// No candidate server supports the requested protocol
    ProtocolNotSupported,
    /// No IP of the chosen server fits the current connection constraints
    ExistingConnection,
    MaxSessions {
        plan: AccountPlan,
    },
    TooManyCertificateRequests {
        retry_after: Option<Duration>,
    },
    CertificateRefreshError,
    VpnServerError,
    UserDelinquent {
        reconnect_info: Option<ReconnectInfo>,
    },
    SubscriptionError,
    LocalAgentSystemError {
        message: String,
    },
    /// The tunnel cannot be released; a device restart is recommended
    VpnStuck,
    NetworkUnreachable,
    /// TLS verification failed, the network may be monitored
    InsecureConnection,
    CannotAccessVpnCredentials,
    PlanDowngraded {
        reconnect_info: Option<ReconnectInfo>,
    },
    FirstTimeConnecting,
    NoReachablePorts,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::UpgradeRequired => write!(f, "Upgrade your plan to use this server"),
            Alert::Maintenance => write!(f, "Server under maintenance"),
            Alert::ProtocolNotSupported => write!(f, "Protocol not supported by any matching server"),
            Alert::ExistingConnection => write!(f, "No server IP matches the connection settings"),
            Alert::MaxSessions { plan } => {
                write!(f, "Maximum number of devices reached for your {} plan", plan)
            }
            Alert::TooManyCertificateRequests { retry_after } => match retry_after {
                Some(delay) => write!(
                    f,
                    "Too many certificate requests, retry in {} seconds",
                    delay.as_secs()
                ),
                None => write!(f, "Too many certificate requests, retry later"),
            },
            Alert::CertificateRefreshError => write!(f, "Could not refresh the connection certificate"),
            Alert::VpnServerError => write!(f, "The VPN server reported an error"),
            Alert::UserDelinquent { reconnect_info } => {
                write!(f, "Your account has an unpaid invoice")?;
                write_reconnect(f, reconnect_info)
            }
            Alert::SubscriptionError => write!(f, "Your plan does not allow this server"),
            Alert::LocalAgentSystemError { message } => write!(f, "Connection error: {}", message),
            Alert::VpnStuck => write!(f, "The VPN is stuck disconnecting, restart your device"),
            Alert::NetworkUnreachable => write!(f, "No network connection"),
            Alert::InsecureConnection => write!(f, "Insecure connection, your network may be monitored"),
            Alert::CannotAccessVpnCredentials => write!(f, "Cannot access VPN credentials"),
            Alert::PlanDowngraded { reconnect_info } => {
                write!(f, "Your plan was downgraded")?;
                write_reconnect(f, reconnect_info)
            }
            Alert::FirstTimeConnecting => write!(f, "Connecting for the first time"),
            Alert::NoReachablePorts => write!(f, "No reachable ports on the selected server"),
        }
    }
}

fn write_reconnect(f: &mut fmt::Formatter<'_>, info: &Option<ReconnectInfo>) -> fmt::Result {
    match info {
        Some(info) => write!(
            f,
            ", reconnected from {} to {}",
            info.from_server.name, info.to_server.name
        ),
        None => Ok(()),
    }
}

/// Answer to the kill switch and WireGuard prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSwitchChoice {
    DisableKillSwitch,
    UseOpenVpn,
    Cancel,
}

/// Sink for alerts, implemented by whatever front end hosts the core
#[async_trait]
pub trait AlertService: Send + Sync {
    fn push(&self, alert: Alert);

    /// Ask how to proceed when WireGuard is unstable with the kill switch on
    async fn prompt_kill_switch(&self) -> KillSwitchChoice;
}

/// Alert sink that only logs; used by the command-line front end
pub struct LoggingAlertService {
    kill_switch_choice: KillSwitchChoice,
}

impl LoggingAlertService {
    pub fn new(kill_switch_choice: KillSwitchChoice) -> Self {
        Self { kill_switch_choice }
    }
}

#[async_trait]
impl AlertService for LoggingAlertService {
    fn push(&self, alert: Alert) {
        tracing::warn!(alert = ?alert, "{}", alert);
    }

    async fn prompt_kill_switch(&self) -> KillSwitchChoice {
        self.kill_switch_choice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_sessions_names_plan() {
        let alert = Alert::MaxSessions {
            plan: AccountPlan::Basic,
        };
        assert!(alert.to_string().contains("Basic"));
    }

    #[test]
    fn test_retry_after_in_message() {
        let alert = Alert::TooManyCertificateRequests {
            retry_after: Some(Duration::from_secs(90)),
        };
        assert!(alert.to_string().contains("90 seconds"));
    }
}
