//! Shared-secret guard for the external callback routes

use axum::http::HeaderMap;

use docket_core::config::CallbackConfig;

use crate::error::ApiError;

/// Header carrying the shared secret on guarded routes.
pub const SECRET_HEADER: &str = "x-docket-secret";

/// Admit the request only when the presented secret matches.
///
/// An empty configured secret disables the guarded routes entirely; a
/// missing or wrong header on an enabled route is an authentication
/// failure.
pub fn require_secret(config: &CallbackConfig, headers: &HeaderMap) -> Result<(), ApiError> {
    if !config.is_enabled() {
        return Err(ApiError::Forbidden);
    }
    let presented = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if constant_time_compare(presented, &config.secret) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
