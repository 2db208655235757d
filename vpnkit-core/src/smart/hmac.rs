//! HMAC-SHA512 following RFC 2104
//!
//! OpenVPN's tls-auth signs control packets with HMAC over the configured
//! digest; servers use SHA512.
//!
//! Block size: 128 bytes for SHA-512
//! Inner pad (ipad): 0x36
//! Outer pad (opad): 0x5C

use sha2::{Digest, Sha512};

const BLOCK_SIZE: usize = 128;
const IPAD: u8 = 0x36;
const OPAD: u8 = 0x5C;

/// Output length of HMAC-SHA512
pub const HMAC_SHA512_LEN: usize = 64;

/// Compute HMAC-SHA512
///
/// 1. Hash key if longer than block size
/// 2. Pad key to block size
/// 3. XOR key with ipad and opad
/// 4. Compute inner and outer hashes
pub fn hmac_sha512(key: &[u8], message: &[u8]) -> [u8; HMAC_SHA512_LEN] {
    let mut key_block = [0u8; BLOCK_SIZE];

    if key.len() > BLOCK_SIZE {
        let hashed = Sha512::digest(key);
        key_block[..HMAC_SHA512_LEN].copy_from_slice(&hashed);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut ipad_key = [0u8; BLOCK_SIZE];
    let mut opad_key = [0u8; BLOCK_SIZE];

    for i in 0..BLOCK_SIZE {
        ipad_key[i] = key_block[i] ^ IPAD;
        opad_key[i] = key_block[i] ^ OPAD;
    }

    let mut inner = Sha512::new();
    inner.update(ipad_key);
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha512::new();
    outer.update(opad_key);
    outer.update(inner_hash);
    let outer_hash = outer.finalize();

    let mut result = [0u8; HMAC_SHA512_LEN];
    result.copy_from_slice(&outer_hash);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_encoding::HEXLOWER;

    fn expected(hex: &str) -> Vec<u8> {
        HEXLOWER.decode(hex.as_bytes()).unwrap()
    }

    #[test]
    fn test_hmac_sha512_rfc4231_test_case_1() {
        let key = [0x0b; 20];
        let result = hmac_sha512(&key, b"Hi There");

        assert_eq!(
            result.to_vec(),
            expected(concat!(
                "87aa7cdea5ef619d4ff0b4241a1d6cb02379f4e2ce4ec2787ad0b30545e17cde",
                "daa833b7d6b8a702038b274eaea3f4e4be9d914eeb61f1702e696c203a126854"
            ))
        );
    }

    #[test]
    fn test_hmac_sha512_rfc4231_test_case_2() {
        let result = hmac_sha512(b"Jefe", b"what do ya want for nothing?");

        assert_eq!(
            result.to_vec(),
            expected(concat!(
                "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554",
                "9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
            ))
        );
    }

    #[test]
    fn test_hmac_sha512_long_key() {
        // key longer than the block size is hashed first
        let key = [0xaa; 131];
        let result = hmac_sha512(&key, b"Test Using Larger Than Block-Size Key - Hash Key First");

        assert_eq!(
            result.to_vec(),
            expected(concat!(
                "80b24263c7c1a3ebb71493c1dd7be8b49b46d1f41b4aeec1121b013783f8f352",
                "6b56d037e05f2598bd0fd2215d6a1e5295e64f73f63f0aec8b915a985d786598"
            ))
        );
    }
}
