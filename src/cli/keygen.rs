//! Client key generation

use vpnkit_core::auth::keys::ClientKeyPair;
use vpnkit_core::error::CoreError;

/// Prints only the public half; the private key is dropped with the pair
pub fn run_keygen() -> Result<(), CoreError> {
    let keys = ClientKeyPair::generate();
    println!("{}", keys.public_key());
    Ok(())
}
