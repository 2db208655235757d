//! Keyring operations for secure secret storage
//!
//! Uses the system keyring (Secret Service on Linux, Keychain on macOS,
//! Credential Manager on Windows). Values are opaque strings; callers store
//! JSON documents.

use crate::error::{CoreError, KeyringError};
use keyring::Entry;

fn entry(service: &str, account: &str) -> Result<Entry, CoreError> {
    Entry::new(service, account).map_err(|_| CoreError::Keyring(KeyringError::ServiceUnavailable))
}

/// Store a secret under `service`/`account`, replacing any previous value
pub fn store_secret(service: &str, account: &str, secret: &str) -> Result<(), CoreError> {
    entry(service, account)?
        .set_password(secret)
        .map_err(|_| CoreError::Keyring(KeyringError::StoreFailed))?;

    Ok(())
}

/// Retrieve a secret
///
/// A missing entry is reported as `KeyringError::NotFound` so callers can
/// tell "nothing stored" apart from a broken keyring.
pub fn retrieve_secret(service: &str, account: &str) -> Result<String, CoreError> {
    entry(service, account)?.get_password().map_err(|e| match e {
        keyring::Error::NoEntry => CoreError::Keyring(KeyringError::NotFound),
        _ => CoreError::Keyring(KeyringError::RetrieveFailed),
    })
}

/// Check if a secret exists
pub fn has_secret(service: &str, account: &str) -> Result<bool, CoreError> {
    match entry(service, account)?.get_password() {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// Delete a secret; deleting a missing entry succeeds
pub fn delete_secret(service: &str, account: &str) -> Result<(), CoreError> {
    match entry(service, account)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(_) => Err(CoreError::Keyring(KeyringError::StoreFailed)),
    }
}
