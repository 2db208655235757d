//! Persisted non-secret state
//!
//! `PropertiesManager` is the single owner of the key-value state: last
//! connection per protocol family, toggles, feature providers, profiles and
//! cached server information. Secrets never go through here.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::api::UserLocation;
use crate::config::SmartProtocolConfig;
use crate::error::CoreError;
use crate::models::connection::ConnectionConfiguration;
use crate::models::features::{NatType, NetShieldType};
use crate::models::protocol::{ConnectionProtocol, ProtocolFamily};
use crate::models::request::{ConnectionRequest, Profile};
use crate::models::server::ServerModel;

/// Opaque storage behind `PropertiesManager`
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<(), CoreError>;
    fn remove(&self, key: &str) -> Result<(), CoreError>;
}

#[derive(Default)]
pub struct InMemoryKeyValueStore {
    values: Mutex<HashMap<String, Value>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// JSON document on disk, rewritten on every change
pub struct FileKeyValueStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl FileKeyValueStore {
    /// Open the store, starting empty when the file is missing or unreadable
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(values) => {
                    info!("Loaded properties from {:?}", path);
                    values
                }
                Err(e) => {
                    warn!("Failed to parse properties file: {}", e);
                    Map::new()
                }
            },
            Err(_) => {
                debug!("Properties file does not exist, starting empty");
                Map::new()
            }
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

mod keys {
    pub const LAST_CONNECTION_REQUEST: &str = "last_connection_request";
    pub const HAS_CONNECTED: &str = "has_connected";
    pub const INTENTIONALLY_DISCONNECTED: &str = "intentionally_disconnected";
    pub const KILL_SWITCH: &str = "kill_switch";
    pub const EXCLUDE_LOCAL_NETWORKS: &str = "exclude_local_networks";
    pub const SECURE_CORE: &str = "secure_core";
    pub const SMART_PROTOCOL: &str = "smart_protocol";
    pub const CONNECTION_PROTOCOL: &str = "connection_protocol";
    pub const NETSHIELD: &str = "netshield";
    pub const NAT_TYPE: &str = "nat_type";
    pub const SAFE_MODE: &str = "safe_mode";
    pub const VPN_ACCELERATOR: &str = "vpn_accelerator";
    pub const USER_LOCATION: &str = "user_location";
    pub const SERVERS: &str = "servers";
    pub const LAST_PREPARED_SERVER: &str = "last_prepared_server";
    pub const PROFILES: &str = "profiles";
    pub const QUICK_CONNECT_PROFILE: &str = "quick_connect_profile";
    pub const LAST_CONNECTED_AT: &str = "last_connected_at";

    pub fn last_connection(family: crate::models::protocol::ProtocolFamily) -> String {
        format!("last_connection_{:?}", family).to_lowercase()
    }
}

/// Typed access to persisted properties
///
/// Writes are best effort: a failing store is logged and the in-process
/// caller carries on.
#[derive(Clone)]
pub struct PropertiesManager {
    store: Arc<dyn KeyValueStore>,
}

impl PropertiesManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryKeyValueStore::new()))
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.store.get(key)?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, "Discarding unreadable property: {}", e);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_value(value)
            .map_err(CoreError::from)
            .and_then(|value| self.store.set(key, value));
        if let Err(e) = result {
            warn!(key, "Failed to persist property: {}", e);
        }
    }

    fn write_optional<T: Serialize>(&self, key: &str, value: Option<&T>) {
        match value {
            Some(value) => self.write(key, value),
            None => {
                if let Err(e) = self.store.remove(key) {
                    warn!(key, "Failed to remove property: {}", e);
                }
            }
        }
    }

    pub fn last_connection(&self, family: ProtocolFamily) -> Option<ConnectionConfiguration> {
        self.read(&keys::last_connection(family))
    }

    pub fn set_last_connection(&self, family: ProtocolFamily, configuration: Option<&ConnectionConfiguration>) {
        self.write_optional(&keys::last_connection(family), configuration)
    }

    pub fn last_connection_request(&self) -> Option<ConnectionRequest> {
        self.read(keys::LAST_CONNECTION_REQUEST)
    }

    pub fn set_last_connection_request(&self, request: Option<&ConnectionRequest>) {
        self.write_optional(keys::LAST_CONNECTION_REQUEST, request)
    }

    pub fn has_connected(&self) -> bool {
        self.read(keys::HAS_CONNECTED).unwrap_or(false)
    }

    pub fn set_has_connected(&self, value: bool) {
        self.write(keys::HAS_CONNECTED, &value)
    }

    pub fn intentionally_disconnected(&self) -> bool {
        self.read(keys::INTENTIONALLY_DISCONNECTED).unwrap_or(false)
    }

    pub fn set_intentionally_disconnected(&self, value: bool) {
        self.write(keys::INTENTIONALLY_DISCONNECTED, &value)
    }

    pub fn kill_switch(&self) -> bool {
        self.read(keys::KILL_SWITCH).unwrap_or(false)
    }

    pub fn set_kill_switch(&self, value: bool) {
        self.write(keys::KILL_SWITCH, &value)
    }

    pub fn exclude_local_networks(&self) -> bool {
        self.read(keys::EXCLUDE_LOCAL_NETWORKS).unwrap_or(false)
    }

    pub fn set_exclude_local_networks(&self, value: bool) {
        self.write(keys::EXCLUDE_LOCAL_NETWORKS, &value)
    }

    pub fn secure_core(&self) -> bool {
        self.read(keys::SECURE_CORE).unwrap_or(false)
    }

    pub fn set_secure_core(&self, value: bool) {
        self.write(keys::SECURE_CORE, &value)
    }

    pub fn smart_protocol_config(&self) -> SmartProtocolConfig {
        self.read(keys::SMART_PROTOCOL).unwrap_or_default()
    }

    pub fn set_smart_protocol_config(&self, config: &SmartProtocolConfig) {
        self.write(keys::SMART_PROTOCOL, config)
    }

    /// Globally toggled protocol used when a request does not name one
    pub fn connection_protocol(&self) -> ConnectionProtocol {
        self.read(keys::CONNECTION_PROTOCOL).unwrap_or_default()
    }

    pub fn set_connection_protocol(&self, protocol: ConnectionProtocol) {
        self.write(keys::CONNECTION_PROTOCOL, &protocol)
    }

    pub fn netshield(&self) -> NetShieldType {
        self.read(keys::NETSHIELD).unwrap_or_default()
    }

    pub fn set_netshield(&self, value: NetShieldType) {
        self.write(keys::NETSHIELD, &value)
    }

    pub fn nat_type(&self) -> NatType {
        self.read(keys::NAT_TYPE).unwrap_or_default()
    }

    pub fn set_nat_type(&self, value: NatType) {
        self.write(keys::NAT_TYPE, &value)
    }

    pub fn safe_mode(&self) -> Option<bool> {
        self.read::<Option<bool>>(keys::SAFE_MODE).flatten()
    }

    pub fn set_safe_mode(&self, value: Option<bool>) {
        self.write_optional(keys::SAFE_MODE, value.as_ref())
    }

    pub fn vpn_accelerator(&self) -> bool {
        self.read(keys::VPN_ACCELERATOR).unwrap_or(true)
    }

    pub fn set_vpn_accelerator(&self, value: bool) {
        self.write(keys::VPN_ACCELERATOR, &value)
    }

    pub fn user_location(&self) -> Option<UserLocation> {
        self.read(keys::USER_LOCATION)
    }

    pub fn set_user_location(&self, location: Option<&UserLocation>) {
        self.write_optional(keys::USER_LOCATION, location)
    }

    /// Cached server list from the last refresh
    pub fn servers(&self) -> Vec<ServerModel> {
        self.read(keys::SERVERS).unwrap_or_default()
    }

    pub fn set_servers(&self, servers: &[ServerModel]) {
        self.write(keys::SERVERS, &servers)
    }

    pub fn last_prepared_server(&self) -> Option<ServerModel> {
        self.read(keys::LAST_PREPARED_SERVER)
    }

    pub fn set_last_prepared_server(&self, server: Option<&ServerModel>) {
        self.write_optional(keys::LAST_PREPARED_SERVER, server)
    }

    pub fn profiles(&self) -> Vec<Profile> {
        self.read(keys::PROFILES).unwrap_or_default()
    }

    pub fn set_profiles(&self, profiles: &[Profile]) {
        self.write(keys::PROFILES, &profiles)
    }

    pub fn profile(&self, id: &str) -> Option<Profile> {
        self.profiles().into_iter().find(|profile| profile.id == id)
    }

    pub fn quick_connect_profile(&self) -> Option<String> {
        self.read(keys::QUICK_CONNECT_PROFILE)
    }

    pub fn set_quick_connect_profile(&self, id: Option<&str>) {
        self.write_optional(keys::QUICK_CONNECT_PROFILE, id.as_ref())
    }

    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.read(keys::LAST_CONNECTED_AT)
    }

    pub fn set_last_connected_at(&self, date: Option<DateTime<Utc>>) {
        self.write_optional(keys::LAST_CONNECTED_AT, date.as_ref())
    }
}
