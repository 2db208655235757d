//! Client key management
//!
//! X25519 key pairs identify this client to the certificate authority and to
//! WireGuard servers.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CertificateError;
use crate::types::ClientPrivateKey;

/// Client key pair, both halves base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientKeyPair {
    private_key: ClientPrivateKey,
    public_key: String,
}

impl ClientKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::from_secret(&secret)
    }

    fn from_secret(secret: &StaticSecret) -> Self {
        let public = PublicKey::from(secret);
        Self {
            private_key: ClientPrivateKey::new(BASE64.encode(secret.to_bytes())),
            public_key: BASE64.encode(public.to_bytes()),
        }
    }

    /// Rebuild a key pair from a stored private key
    pub fn from_private_key(private_key: &ClientPrivateKey) -> Result<Self, CertificateError> {
        let bytes = BASE64
            .decode(private_key.expose())
            .map_err(|_| CertificateError::Storage("private key is not valid base64".to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CertificateError::Storage("private key must be 32 bytes".to_string()))?;
        Ok(Self::from_secret(&StaticSecret::from(bytes)))
    }

    pub fn private_key(&self) -> &ClientPrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}
