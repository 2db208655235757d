//! Mock keyring implementation for testing
//!
//! Provides an in-memory keyring implementation that doesn't require
//! system keyring access. Used in CI environments and for testing.

use crate::error::{CoreError, KeyringError};
use std::collections::HashMap;
use std::sync::Mutex;

lazy_static::lazy_static! {
    static ref MOCK_KEYRING: Mutex<HashMap<String, String>> = Mutex::new(HashMap::new());
}

/// Generate a key for the mock keyring
fn make_key(service: &str, account: &str) -> String {
    format!("{}:{}", service, account)
}

/// Store a secret in the mock keyring
pub fn store_secret(service: &str, account: &str, secret: &str) -> Result<(), CoreError> {
    let mut keyring = MOCK_KEYRING
        .lock()
        .map_err(|_| CoreError::Keyring(KeyringError::StoreFailed))?;
    keyring.insert(make_key(service, account), secret.to_string());
    Ok(())
}

/// Retrieve a secret from the mock keyring
pub fn retrieve_secret(service: &str, account: &str) -> Result<String, CoreError> {
    let keyring = MOCK_KEYRING
        .lock()
        .map_err(|_| CoreError::Keyring(KeyringError::RetrieveFailed))?;
    keyring
        .get(&make_key(service, account))
        .cloned()
        .ok_or(CoreError::Keyring(KeyringError::NotFound))
}

/// Check if a secret exists in the mock keyring
pub fn has_secret(service: &str, account: &str) -> Result<bool, CoreError> {
    let keyring = MOCK_KEYRING
        .lock()
        .map_err(|_| CoreError::Keyring(KeyringError::ServiceUnavailable))?;
    Ok(keyring.contains_key(&make_key(service, account)))
}

/// Delete a secret from the mock keyring
pub fn delete_secret(service: &str, account: &str) -> Result<(), CoreError> {
    let mut keyring = MOCK_KEYRING
        .lock()
        .map_err(|_| CoreError::Keyring(KeyringError::StoreFailed))?;
    keyring.remove(&make_key(service, account));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_store_and_retrieve() {
        let account = "test_account_mock";
        let _ = delete_secret("vpnkit-test", account);

        store_secret("vpnkit-test", account, "{\"k\":1}").expect("Failed to store secret");
        assert!(has_secret("vpnkit-test", account).unwrap());

        let retrieved = retrieve_secret("vpnkit-test", account).expect("Failed to retrieve secret");
        assert_eq!(retrieved, "{\"k\":1}");

        delete_secret("vpnkit-test", account).expect("Failed to delete secret");
        assert!(matches!(
            retrieve_secret("vpnkit-test", account),
            Err(CoreError::Keyring(KeyringError::NotFound))
        ));
    }
}
