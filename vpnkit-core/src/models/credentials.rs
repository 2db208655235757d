//! Account-level credentials and short-lived certificates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::features::VpnConnectionFeatures;
use crate::types::VpnPassword;

/// Subscription plan, used to word max-session alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountPlan {
    Free,
    Basic,
    Plus,
    Visionary,
    Pro,
    Unknown,
}

impl AccountPlan {
    pub fn from_plan_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "free" | "" => AccountPlan::Free,
            "vpnbasic" | "basic" => AccountPlan::Basic,
            "vpnplus" | "plus" | "vpn2022" | "bundle2022" => AccountPlan::Plus,
            "visionary" | "visionary2022" => AccountPlan::Visionary,
            "vpnpro" | "pro" => AccountPlan::Pro,
            _ => AccountPlan::Unknown,
        }
    }
}

impl fmt::Display for AccountPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccountPlan::Free => "Free",
            AccountPlan::Basic => "Basic",
            AccountPlan::Plus => "Plus",
            AccountPlan::Visionary => "Visionary",
            AccountPlan::Pro => "Pro",
            AccountPlan::Unknown => "current",
        };
        write!(f, "{}", name)
    }
}

/// VPN credentials for the signed-in account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnCredentials {
    pub name: String,
    pub password: VpnPassword,
    pub plan: AccountPlan,
    pub max_tier: u8,
    pub max_connect: u32,
    pub delinquent: bool,
}

/// Published when freshly stored credentials lower the tier or flag the
/// account delinquent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DowngradeInfo {
    pub from: VpnCredentials,
    pub to: VpnCredentials,
}

/// Account change observed by the credential store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountEvent {
    PlanDowngraded(DowngradeInfo),
    UserDelinquent(DowngradeInfo),
}

impl AccountEvent {
    /// Classifies a credentials replacement, if it is one the gateway reacts to
    pub fn classify(previous: &VpnCredentials, current: &VpnCredentials) -> Option<Self> {
        let info = || DowngradeInfo {
            from: previous.clone(),
            to: current.clone(),
        };
        if current.delinquent && !previous.delinquent {
            Some(AccountEvent::UserDelinquent(info()))
        } else if current.max_tier < previous.max_tier {
            Some(AccountEvent::PlanDowngraded(info()))
        } else {
            None
        }
    }
}

/// Short-lived client certificate issued for a client public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnCertificate {
    /// PEM encoded certificate
    pub certificate: String,
    pub valid_until: DateTime<Utc>,
    /// Point after which the certificate should be proactively renewed
    pub refresh_time: DateTime<Utc>,
    /// Features embedded in the certificate when it was requested
    #[serde(default)]
    pub features: Option<VpnConnectionFeatures>,
}

impl VpnCertificate {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_until
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_time || self.is_expired(now)
    }

    /// Whether a certificate carrying `features` must be requested instead
    pub fn features_differ(&self, features: Option<&VpnConnectionFeatures>) -> bool {
        match features {
            Some(features) => self.features.as_ref() != Some(features),
            None => false,
        }
    }
}
