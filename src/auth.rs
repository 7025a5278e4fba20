use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const AUTH_HEADER: &str = "x-auth-token";

/// Verifies a caller token of form `base64Payload.hexSignature`.
///
/// The signature is an HMAC-SHA256 over the exact bytes of the base64
/// segment, compared in constant time. The decoded payload must be a JSON
/// object with a numeric `exp` strictly in the future. Every failure mode
/// collapses into the same boolean so nothing about which step failed is
/// observable to the caller.
pub fn verify_token(header: &str, secret: &str, now_secs: u64) -> bool {
    let Some((payload_b64, sig_hex)) = header.split_once('.') else {
        return false;
    };
    let Ok(signature) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload_b64.as_bytes());
    if mac.verify_slice(&signature).is_err() {
        return false;
    }
    let Ok(payload) = base64::engine::general_purpose::STANDARD.decode(payload_b64) else {
        return false;
    };
    let Ok(claims) = serde_json::from_slice::<Value>(&payload) else {
        return false;
    };
    matches!(
        claims.get("exp").and_then(Value::as_u64),
        Some(exp) if exp > now_secs
    )
}

/// Header-level guard used by the request handler: absent header and
/// invalid token produce the identical rejection.
pub fn require_token(header: Option<&str>, secret: &str) -> Result<(), AppError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    match header {
        Some(value) if verify_token(value, secret, now) => Ok(()),
        _ => Err(AppError::auth_failed()),
    }
}
