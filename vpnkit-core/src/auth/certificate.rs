//! Client certificates for certificate-authenticated tunnels
//!
//! `VpnAuthenticationManager` is the only component that generates keys or
//! requests certificates. Refreshes are serialized through a single lane so
//! two callers never race on the stored key pair.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::keys::ClientKeyPair;
use crate::auth::store::VpnKeychain;
use crate::error::CertificateError;
use crate::models::credentials::VpnCertificate;
use crate::models::features::VpnConnectionFeatures;
use crate::types::ClientPrivateKey;

/// Certificate authority endpoint
#[async_trait]
pub trait CertificateApi: Send + Sync {
    async fn request_certificate(
        &self,
        public_key: &str,
        features: Option<&VpnConnectionFeatures>,
    ) -> Result<VpnCertificate, CertificateError>;
}

/// Key and certificate handed to the tunnel and the LocalAgent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnAuthenticationData {
    pub client_key: ClientPrivateKey,
    pub client_certificate: VpnCertificate,
}

#[async_trait]
pub trait VpnAuthentication: Send + Sync {
    /// Stored data when still valid for `features`, otherwise a refresh
    async fn load_authentication_data(
        &self,
        features: Option<&VpnConnectionFeatures>,
    ) -> Result<VpnAuthenticationData, CertificateError>;

    /// Request a new certificate, generating keys first when none are stored
    async fn refresh_certificates(
        &self,
        features: Option<&VpnConnectionFeatures>,
    ) -> Result<VpnAuthenticationData, CertificateError>;

    /// Delete the stored key pair and certificate
    async fn clear_everything(&self);
}

pub struct VpnAuthenticationManager {
    keychain: Arc<dyn VpnKeychain>,
    api: Arc<dyn CertificateApi>,
    lane: Mutex<()>,
}

impl VpnAuthenticationManager {
    pub fn new(keychain: Arc<dyn VpnKeychain>, api: Arc<dyn CertificateApi>) -> Self {
        Self {
            keychain,
            api,
            lane: Mutex::new(()),
        }
    }

    fn stored(&self) -> Option<(ClientKeyPair, VpnCertificate)> {
        let keys = self.keychain.fetch_keys().ok().flatten()?;
        let certificate = self.keychain.fetch_certificate().ok().flatten()?;
        Some((keys, certificate))
    }

    fn keys_or_generate(&self) -> Result<ClientKeyPair, CertificateError> {
        if let Some(keys) = self
            .keychain
            .fetch_keys()
            .map_err(|e| CertificateError::Storage(e.to_string()))?
        {
            return Ok(keys);
        }
        info!("No client keys stored, generating a new key pair");
        let keys = ClientKeyPair::generate();
        self.keychain
            .store_keys(&keys)
            .map_err(|e| CertificateError::Storage(e.to_string()))?;
        Ok(keys)
    }

    fn delete_all(&self) {
        if let Err(e) = self.keychain.delete_keys() {
            warn!("Failed to delete client keys: {}", e);
        }
        if let Err(e) = self.keychain.delete_certificate() {
            warn!("Failed to delete certificate: {}", e);
        }
    }

    /// Caller must hold the lane
    async fn refresh_locked(
        &self,
        features: Option<&VpnConnectionFeatures>,
    ) -> Result<VpnAuthenticationData, CertificateError> {
        let keys = self.keys_or_generate()?;
        match self.api.request_certificate(keys.public_key(), features).await {
            Ok(certificate) => {
                self.keychain
                    .store_certificate(&certificate)
                    .map_err(|e| CertificateError::Storage(e.to_string()))?;
                info!(valid_until = %certificate.valid_until, "Certificate refreshed");
                Ok(VpnAuthenticationData {
                    client_key: keys.private_key().clone(),
                    client_certificate: certificate,
                })
            }
            Err(CertificateError::NeedNewKeys) => {
                // stale keys must not be offered again
                self.delete_all();
                Err(CertificateError::NeedNewKeys)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl VpnAuthentication for VpnAuthenticationManager {
    #[tracing::instrument(skip_all)]
    async fn load_authentication_data(
        &self,
        features: Option<&VpnConnectionFeatures>,
    ) -> Result<VpnAuthenticationData, CertificateError> {
        let _lane = self.lane.lock().await;

        if let Some((keys, certificate)) = self.stored() {
            if !certificate.needs_refresh(Utc::now()) && !certificate.features_differ(features) {
                debug!("Stored authentication data does not need refreshing");
                return Ok(VpnAuthenticationData {
                    client_key: keys.private_key().clone(),
                    client_certificate: certificate,
                });
            }
        }

        match self.refresh_locked(features).await {
            // keys were just removed, one attempt with a fresh pair
            Err(CertificateError::NeedNewKeys) => self.refresh_locked(features).await,
            result => result,
        }
    }

    #[tracing::instrument(skip_all)]
    async fn refresh_certificates(
        &self,
        features: Option<&VpnConnectionFeatures>,
    ) -> Result<VpnAuthenticationData, CertificateError> {
        let _lane = self.lane.lock().await;
        self.refresh_locked(features).await
    }

    async fn clear_everything(&self) {
        let _lane = self.lane.lock().await;
        info!("Clearing client keys and certificate");
        self.delete_all();
    }
}
