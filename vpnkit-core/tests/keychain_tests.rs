//! Keyring-backed credential store tests
//!
//! These need the in-memory keyring backend. Run with:
//!
//! cargo test -p vpnkit-core --test keychain_tests --features mock-keyring

#![cfg(feature = "mock-keyring")]

use std::sync::{Arc, Mutex};
use vpnkit_core::auth::store::{KeyringVpnKeychain, VpnKeychain};
use vpnkit_core::error::{CoreError, KeyringError};
use vpnkit_core::models::credentials::{AccountEvent, AccountPlan, VpnCredentials};
use vpnkit_core::types::VpnPassword;

fn credentials(tier: u8, delinquent: bool) -> VpnCredentials {
    VpnCredentials {
        name: "user".to_string(),
        password: VpnPassword::new("secret".to_string()),
        plan: AccountPlan::Plus,
        max_tier: tier,
        max_connect: 10,
        delinquent,
    }
}

fn record_events(keychain: &KeyringVpnKeychain) -> Arc<Mutex<Vec<AccountEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    keychain
        .account_events()
        .subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

#[test]
fn test_fetch_without_credentials_is_not_found() {
    let keychain = KeyringVpnKeychain::new("integration-empty");

    let err = keychain.fetch().unwrap_err();

    assert!(matches!(err, CoreError::Keyring(KeyringError::NotFound)));
}

#[test]
fn test_credentials_survive_a_new_keychain_instance() {
    // Given credentials stored by one instance
    KeyringVpnKeychain::new("integration-restart")
        .store(&credentials(2, false))
        .unwrap();

    // When a fresh instance reads them
    let keychain = KeyringVpnKeychain::new("integration-restart");

    // Then the cached copy is filled from the keyring
    assert_eq!(keychain.fetch_cached().unwrap(), credentials(2, false));
}

#[test]
fn test_delinquency_takes_precedence_over_downgrade() {
    // Given a paying user
    let keychain = KeyringVpnKeychain::new("integration-delinquent");
    keychain.store(&credentials(2, false)).unwrap();
    let events = record_events(&keychain);

    // When the account becomes delinquent and drops to free at once
    keychain.store(&credentials(0, true)).unwrap();

    // Then only the delinquency is published
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
        AccountEvent::UserDelinquent(info) => {
            assert_eq!(info.from.max_tier, 2);
            assert_eq!(info.to.max_tier, 0);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_upgrade_publishes_nothing() {
    let keychain = KeyringVpnKeychain::new("integration-upgrade");
    keychain.store(&credentials(0, false)).unwrap();
    let events = record_events(&keychain);

    keychain.store(&credentials(2, false)).unwrap();

    assert!(events.lock().unwrap().is_empty());
}
