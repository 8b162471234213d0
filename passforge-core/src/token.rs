//! Authentication token issuance.

use rand::RngCore;

/// Shortest authentication token a content document may carry.
pub const MIN_AUTH_TOKEN_LEN: usize = 16;

/// Generate a fresh authentication token: 32 random bytes, hex encoded.
pub fn generate_auth_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
