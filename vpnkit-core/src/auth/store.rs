//! Credential store
//!
//! Owns the VPN credentials, the client key pair and the current
//! certificate. Nothing else reads or writes those keyring entries.

use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use crate::auth::keyring;
use crate::auth::keys::ClientKeyPair;
use crate::error::{CoreError, KeyringError};
use crate::models::credentials::{AccountEvent, VpnCertificate, VpnCredentials};
use crate::observers::Observers;
use crate::types::{KEYRING_SERVICE_CERTIFICATE, KEYRING_SERVICE_CREDENTIALS, KEYRING_SERVICE_KEYS};

pub trait VpnKeychain: Send + Sync {
    /// Credentials from secure storage, refreshing the in-memory copy
    fn fetch(&self) -> Result<VpnCredentials, CoreError>;

    /// In-memory copy when present, otherwise secure storage
    fn fetch_cached(&self) -> Result<VpnCredentials, CoreError>;

    /// Replace the stored credentials, publishing an `AccountEvent` when the
    /// change is a downgrade or a newly delinquent account
    fn store(&self, credentials: &VpnCredentials) -> Result<(), CoreError>;

    fn store_keys(&self, keys: &ClientKeyPair) -> Result<(), CoreError>;
    fn fetch_keys(&self) -> Result<Option<ClientKeyPair>, CoreError>;
    fn delete_keys(&self) -> Result<(), CoreError>;

    fn store_certificate(&self, certificate: &VpnCertificate) -> Result<(), CoreError>;
    fn fetch_certificate(&self) -> Result<Option<VpnCertificate>, CoreError>;
    fn delete_certificate(&self) -> Result<(), CoreError>;

    fn account_events(&self) -> &Observers<AccountEvent>;
}

/// `VpnKeychain` backed by the OS keyring, one JSON document per entry
pub struct KeyringVpnKeychain {
    account: String,
    cached: Mutex<Option<VpnCredentials>>,
    events: Observers<AccountEvent>,
}

impl KeyringVpnKeychain {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            cached: Mutex::new(None),
            events: Observers::new(),
        }
    }

    fn read<T: serde::de::DeserializeOwned>(&self, service: &str) -> Result<Option<T>, CoreError> {
        match keyring::retrieve_secret(service, &self.account) {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|_| CoreError::Keyring(KeyringError::InvalidFormat)),
            Err(CoreError::Keyring(KeyringError::NotFound)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write<T: serde::Serialize>(&self, service: &str, value: &T) -> Result<(), CoreError> {
        let json = serde_json::to_string(value)?;
        keyring::store_secret(service, &self.account, &json)
    }
}

impl VpnKeychain for KeyringVpnKeychain {
    fn fetch(&self) -> Result<VpnCredentials, CoreError> {
        let credentials: VpnCredentials = self
            .read(KEYRING_SERVICE_CREDENTIALS)?
            .ok_or(CoreError::Keyring(KeyringError::NotFound))?;
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(credentials)
    }

    fn fetch_cached(&self) -> Result<VpnCredentials, CoreError> {
        let cached = self
            .cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match cached {
            Some(credentials) => Ok(credentials),
            None => self.fetch(),
        }
    }

    fn store(&self, credentials: &VpnCredentials) -> Result<(), CoreError> {
        let previous = self.read::<VpnCredentials>(KEYRING_SERVICE_CREDENTIALS).ok().flatten();
        self.write(KEYRING_SERVICE_CREDENTIALS, credentials)?;
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        debug!(tier = credentials.max_tier, "Stored VPN credentials");

        if let Some(event) = previous.and_then(|previous| AccountEvent::classify(&previous, credentials)) {
            match &event {
                AccountEvent::PlanDowngraded(_) => info!("Plan downgrade detected"),
                AccountEvent::UserDelinquent(_) => info!("Account became delinquent"),
            }
            self.events.notify(&event);
        }
        Ok(())
    }

    fn store_keys(&self, keys: &ClientKeyPair) -> Result<(), CoreError> {
        self.write(KEYRING_SERVICE_KEYS, keys)
    }

    fn fetch_keys(&self) -> Result<Option<ClientKeyPair>, CoreError> {
        self.read(KEYRING_SERVICE_KEYS)
    }

    fn delete_keys(&self) -> Result<(), CoreError> {
        keyring::delete_secret(KEYRING_SERVICE_KEYS, &self.account)
    }

    fn store_certificate(&self, certificate: &VpnCertificate) -> Result<(), CoreError> {
        self.write(KEYRING_SERVICE_CERTIFICATE, certificate)
    }

    fn fetch_certificate(&self) -> Result<Option<VpnCertificate>, CoreError> {
        self.read(KEYRING_SERVICE_CERTIFICATE)
    }

    fn delete_certificate(&self) -> Result<(), CoreError> {
        keyring::delete_secret(KEYRING_SERVICE_CERTIFICATE, &self.account)
    }

    fn account_events(&self) -> &Observers<AccountEvent> {
        &self.events
    }
}
