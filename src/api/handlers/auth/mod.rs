//! Auth handlers and supporting modules.
//!
//! This module coordinates password login, the two-factor challenge flow,
//! API-token minting, and the password-change operation.
//!
//! ## Token model
//!
//! Clients authenticate with `Authorization: Bearer <token>`. Tokens are
//! opaque 32-byte values; the database stores only SHA-256 hashes, so a leaked
//! dump cannot be replayed against the API.
//!
//! ## Two-factor model
//!
//! The challenge flow is stateless between steps: the server issues a
//! challenge instead of a token and the client resubmits credentials together
//! with the code. The gate in [`two_factor`] is shared by login and the
//! password-change operation.

pub(crate) mod enroll;
pub mod flow;
pub(crate) mod login;
pub(crate) mod password;
pub(crate) mod password_change;
pub(crate) mod principal;
mod rate_limit;
mod state;
mod storage;
pub(crate) mod two_factor;
pub(crate) mod types;
mod utils;

use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

pub use rate_limit::{NoopRateLimiter, RateLimiter};
pub use state::{AuthConfig, AuthState, SecretKeys};

/// Resolve the bearer token into its owning user, or return 401.
pub(crate) async fn require_token_auth(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Uuid, StatusCode> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    // Only the hash is stored; never compare raw tokens against the database.
    let token_hash = utils::hash_api_token(&token);
    match storage::lookup_api_token(pool, &token_hash).await {
        Ok(Some(user_id)) => Ok(user_id),
        Ok(None) => Err(StatusCode::UNAUTHORIZED),
        Err(err) => {
            error!("Failed to lookup api token: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::extract_bearer_token;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn extract_bearer_token_parses_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_bearer_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn extract_bearer_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc123"));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn extract_bearer_token_rejects_empty_value() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn extract_bearer_token_missing_header() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
