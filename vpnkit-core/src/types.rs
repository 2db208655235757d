//! Type definitions and wrappers for secure data handling
//!
//! This module provides type-safe wrappers for sensitive data using the
//! secrecy crate to prevent accidental exposure in logs or debug output.

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wrapper for the VPN account password
///
/// The password is the credential used by IKEv2 and OpenVPN tunnels. It is
/// compared when diagnosing a failed connection, and only ever serialized
/// into the keyring.
#[derive(Clone, Debug)]
pub struct VpnPassword(Secret<String>);

impl VpnPassword {
    pub fn new(password: String) -> Self {
        Self(Secret::new(password))
    }

    /// Expose the password value (use with caution!)
    ///
    /// This should only be called when handing credentials to the tunnel
    /// provider or comparing against a freshly fetched password.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl PartialEq for VpnPassword {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for VpnPassword {}

impl From<String> for VpnPassword {
    fn from(password: String) -> Self {
        Self::new(password)
    }
}

impl Serialize for VpnPassword {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for VpnPassword {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Base64-encoded X25519 client private key
#[derive(Clone, Debug)]
pub struct ClientPrivateKey(Secret<String>);

impl ClientPrivateKey {
    pub fn new(key: String) -> Self {
        Self(Secret::new(key))
    }

    /// Expose the key (use with caution!)
    ///
    /// Only the tunnel provider and the LocalAgent connection need the raw
    /// key material.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl PartialEq for ClientPrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for ClientPrivateKey {}

impl Serialize for ClientPrivateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for ClientPrivateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Keyring service names
pub const KEYRING_SERVICE_CREDENTIALS: &str = "vpnkit-credentials";
pub const KEYRING_SERVICE_KEYS: &str = "vpnkit-client-keys";
pub const KEYRING_SERVICE_CERTIFICATE: &str = "vpnkit-certificate";

/// Keyring account all vpnkit entries are stored under
pub const KEYRING_ACCOUNT: &str = "default";

/// Reference handed to the tunnel provider so it can look the password up
/// itself instead of receiving it inline
pub const PASSWORD_REFERENCE: &str = "vpnkit-credentials/default";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_debug_is_redacted() {
        let password = VpnPassword::new("hunter2".to_string());
        let debug = format!("{:?}", password);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_password_serde_roundtrip() {
        let password = VpnPassword::new("s3cret".to_string());
        let json = serde_json::to_string(&password).unwrap();
        let back: VpnPassword = serde_json::from_str(&json).unwrap();
        assert_eq!(password, back);
    }

    #[test]
    fn test_private_key_debug_is_redacted() {
        let key = ClientPrivateKey::new("c2VjcmV0a2V5".to_string());
        assert!(!format!("{:?}", key).contains("c2VjcmV0a2V5"));
    }
}
