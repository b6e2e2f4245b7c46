//! API authentication middleware (§4.9).
//!
//! `AppState::api_key_hashes` is built once at startup from
//! `config.server.api_keys` — a list, not a single shared secret, so
//! different callers can be revoked independently. An empty list means
//! dev mode: every request is treated as authenticated.
//!
//! Protected routes must carry `X-API-Key: <key>`; the provided value is
//! hashed and compared in constant time against every configured digest
//! so neither the key's length nor its position in the list leaks via
//! timing.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::error;
use crate::state::AppState;

/// Axum middleware enforcing `X-API-Key` authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_key(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    if state.api_key_hashes.is_empty() {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let provided_hash = Sha256::digest(provided.as_bytes());
    let matches = state
        .api_key_hashes
        .iter()
        .any(|expected| bool::from(provided_hash.ct_eq(expected)));

    if !matches {
        return error::unauthorized("invalid or missing API key");
    }

    next.run(req).await
}

/// Best-effort caller identity for rate limiting: the provided API key
/// (not its hash — buckets are per-caller, not per-secret-bit) if present,
/// else the client's source IP.
pub fn identity_of(req: &Request<Body>, peer_ip: &str) -> String {
    req.headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| peer_ip.to_string())
}

pub fn hash_api_key(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_api_key_is_deterministic() {
        assert_eq!(hash_api_key("abc"), hash_api_key("abc"));
        assert_ne!(hash_api_key("abc"), hash_api_key("def"));
    }
}
