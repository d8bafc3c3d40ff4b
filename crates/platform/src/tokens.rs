//! Per-form anti-forgery tokens.

use rand::RngCore;

/// 32 random bytes, hex encoded.
pub fn issue_form_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time comparison of a submitted token against the issued one.
pub fn verify_form_token(token: &str, expected: &str) -> bool {
    let (a, b) = (token.as_bytes(), expected.as_bytes());
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
