//! Authentication module
//!
//! Handles credential storage, client key generation and short-lived
//! certificates, on top of the OS keyring.

pub mod certificate;
pub mod keys;

// Use mock keyring in test mode or CI environment
#[cfg(any(test, feature = "mock-keyring"))]
#[path = "keyring_mock.rs"]
pub mod keyring;

// Use real keyring in production
#[cfg(not(any(test, feature = "mock-keyring")))]
pub mod keyring;

pub mod store;
