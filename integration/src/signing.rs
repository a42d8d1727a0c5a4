//! Signature primitives venue adapters compose their request signing from.
//!
//! Each venue defines its own canonical payload (query string, nonce + path,
//! body hash, ...); these helpers only cover the shared cryptographic step so
//! no adapter hand-rolls HMAC handling.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over `payload`, hex-encoded (lowercase).
pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> String {
    hex::encode(hmac_sha256(secret, payload))
}

/// HMAC-SHA256 over `payload`, base64-encoded.
pub fn hmac_sha256_base64(secret: &[u8], payload: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(hmac_sha256(secret, payload))
}

/// `Authorization: Basic` header value for key/secret venues.
pub fn basic_auth(user: &str, password: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    format!("Basic {token}")
}

fn hmac_sha256(secret: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC-SHA256 accepts keys of any length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}
