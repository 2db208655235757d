//! Session features negotiated over the LocalAgent channel

use serde::{Deserialize, Serialize};

/// Account tiers as reported by the API
pub mod tier {
    pub const FREE: u8 = 0;
    pub const BASIC: u8 = 1;
    pub const PLUS: u8 = 2;
    pub const VISIONARY: u8 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetShieldType {
    #[default]
    Off,
    Level1,
    Level2,
}

impl NetShieldType {
    /// Minimum tier allowed to enable any blocking level
    pub const REQUIRED_TIER: u8 = tier::BASIC;

    pub fn level(&self) -> u8 {
        match self {
            NetShieldType::Off => 0,
            NetShieldType::Level1 => 1,
            NetShieldType::Level2 => 2,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(NetShieldType::Off),
            1 => Some(NetShieldType::Level1),
            2 => Some(NetShieldType::Level2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatType {
    #[default]
    Strict,
    Moderate,
}

impl NatType {
    /// Minimum tier allowed to pick a non-default NAT type
    pub const REQUIRED_TIER: u8 = tier::BASIC;
}

/// Feature set exchanged with the LocalAgent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnConnectionFeatures {
    pub netshield: NetShieldType,
    pub vpn_accelerator: bool,
    #[serde(default)]
    pub bouncing: Option<String>,
    pub nat_type: NatType,
    #[serde(default)]
    pub safe_mode: Option<bool>,
}

impl Default for VpnConnectionFeatures {
    fn default() -> Self {
        Self {
            netshield: NetShieldType::Off,
            vpn_accelerator: true,
            bouncing: None,
            nat_type: NatType::Strict,
            safe_mode: None,
        }
    }
}

/// Difference between two feature sets, ignoring the bouncing label
/// which is chosen per server IP and never pushed by the agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureChanges {
    pub netshield: Option<NetShieldType>,
    pub vpn_accelerator: Option<bool>,
    pub nat_type: Option<NatType>,
    pub safe_mode: Option<Option<bool>>,
}

impl FeatureChanges {
    pub fn between(cached: &VpnConnectionFeatures, reported: &VpnConnectionFeatures) -> Self {
        Self {
            netshield: (cached.netshield != reported.netshield).then_some(reported.netshield),
            vpn_accelerator: (cached.vpn_accelerator != reported.vpn_accelerator)
                .then_some(reported.vpn_accelerator),
            nat_type: (cached.nat_type != reported.nat_type).then_some(reported.nat_type),
            safe_mode: (cached.safe_mode != reported.safe_mode).then_some(reported.safe_mode),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.netshield.is_none()
            && self.vpn_accelerator.is_none()
            && self.nat_type.is_none()
            && self.safe_mode.is_none()
    }
}
