//! User intent: connection requests and saved profiles

use serde::{Deserialize, Serialize};

use crate::models::features::{NatType, NetShieldType};
use crate::models::protocol::ConnectionProtocol;
use crate::models::server::{ServerModel, ServerType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountryRequestType {
    Fastest,
    Random,
    Server(Box<ServerModel>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRequestType {
    Fastest,
    Random,
    Country {
        code: String,
        kind: CountryRequestType,
    },
    City {
        country: String,
        city: String,
    },
}

impl ConnectionRequestType {
    /// Whether the request names a country, which changes alert wording
    pub fn is_specific_country(&self) -> bool {
        matches!(
            self,
            ConnectionRequestType::Country { .. } | ConnectionRequestType::City { .. }
        )
    }
}

/// A single connection attempt's intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub server_type: ServerType,
    pub connection_type: ConnectionRequestType,
    pub connection_protocol: ConnectionProtocol,
    pub netshield: NetShieldType,
    pub nat_type: NatType,
    pub safe_mode: Option<bool>,
    pub profile_id: Option<String>,
}

impl ConnectionRequest {
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

    pub fn with_changed_protocol(&self, connection_protocol: ConnectionProtocol) -> Self {
        Self {
            connection_protocol,
            ..self.clone()
        }
    }
}

/// A saved connection preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub server_type: ServerType,
    pub connection_type: ConnectionRequestType,
    pub connection_protocol: ConnectionProtocol,
    #[serde(default)]
    pub netshield: Option<NetShieldType>,
    #[serde(default)]
    pub nat_type: Option<NatType>,
    #[serde(default)]
    pub safe_mode: Option<bool>,
}

impl Profile {
    /// Builds a request, filling unset features from the current defaults
    pub fn connection_request(
        &self,
        default_netshield: NetShieldType,
        default_nat_type: NatType,
        default_safe_mode: Option<bool>,
    ) -> ConnectionRequest {
        ConnectionRequest {
            server_type: self.server_type,
            connection_type: self.connection_type.clone(),
            connection_protocol: self.connection_protocol,
            netshield: self.netshield.unwrap_or(default_netshield),
            nat_type: self.nat_type.unwrap_or(default_nat_type),
            safe_mode: self.safe_mode.or(default_safe_mode),
            profile_id: Some(self.id.clone()),
        }
    }
}
