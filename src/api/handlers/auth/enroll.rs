//! Authenticator enrollment for the authenticated user.
//!
//! Enrollment is two requests: the first mints a fresh secret and stores it
//! sealed but unconfirmed, the second proves the authenticator works before
//! the secret counts at login. Confirmation also rotates the recovery-key
//! set, since the old keys belonged to the old secret.

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rand::{rngs::OsRng, RngCore};
use sqlx::PgPool;
use std::sync::Arc;
use totp_rs::Secret;
use tracing::{error, info, warn};
use url::Url;

use super::{
    login::validation,
    state::AuthState,
    storage,
    two_factor::{crypto, recovery::RecoveryKeySet, totp, INVALID_CODE_MESSAGE},
    types::{TotpConfirmRequest, TotpConfirmResponse, TotpEnrollResponse},
};

const TOTP_SECRET_LEN: usize = 20;
const NOT_ENROLLING_MESSAGE: &str = "Authenticator enrollment has not been started.";
const CONFIRMED_MESSAGE: &str =
    "Two-factor authentication is enabled. Store your recovery keys in a safe place.";

/// Start authenticator enrollment; any prior secret is replaced unconfirmed.
#[utoipa::path(
    post,
    path = "/v1/me/two-factor/totp",
    responses(
        (status = 200, description = "Secret minted", body = TotpEnrollResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "me",
    security(("bearer" = []))
)]
pub async fn totp_enroll_start(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let user_id = match super::require_token_auth(&headers, &pool).await {
        Ok(user_id) => user_id,
        Err(status) => return status.into_response(),
    };

    let principal = match storage::lookup_principal_by_id(&pool, user_id).await {
        Ok(Some(principal)) => principal,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to load user for enrollment: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut secret_bytes = [0u8; TOTP_SECRET_LEN];
    OsRng.fill_bytes(&mut secret_bytes);
    let Secret::Encoded(secret_base32) = Secret::Raw(secret_bytes.to_vec()).to_encoded() else {
        error!("Failed to encode generated totp secret");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let otpauth_url = match otpauth_url(&secret_base32, &principal.email) {
        Ok(url) => url,
        Err(err) => {
            error!("Failed to build otpauth url: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let sealed = match crypto::seal_secret(
        auth_state.keys().totp_sealing_key(),
        secret_base32.as_bytes(),
        user_id,
    ) {
        Ok(sealed) => sealed,
        Err(err) => {
            error!("Failed to seal totp secret: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match storage::store_totp_secret(&pool, user_id, &sealed).await {
        Ok(()) => {
            info!(user_id = %user_id, "totp enrollment started");
            (
                StatusCode::OK,
                Json(TotpEnrollResponse {
                    secret: secret_base32,
                    otpauth_url,
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to store totp secret: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Confirm enrollment with a working code; returns the recovery keys once.
#[utoipa::path(
    post,
    path = "/v1/me/two-factor/totp/confirm",
    request_body = TotpConfirmRequest,
    responses(
        (status = 200, description = "Enrollment confirmed", body = TotpConfirmResponse),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Validation error")
    ),
    tag = "me",
    security(("bearer" = []))
)]
pub async fn totp_enroll_confirm(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TotpConfirmRequest>>,
) -> Response {
    let user_id = match super::require_token_auth(&headers, &pool).await {
        Ok(user_id) => user_id,
        Err(status) => return status.into_response(),
    };

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let principal = match storage::lookup_principal_by_id(&pool, user_id).await {
        Ok(Some(principal)) => principal,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to load user for enrollment: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Some(sealed) = principal.totp_secret_sealed.as_deref() else {
        return validation("code", NOT_ENROLLING_MESSAGE);
    };

    let secret_base32 =
        match crypto::open_secret(auth_state.keys().totp_sealing_key(), sealed, user_id)
            .and_then(|bytes| String::from_utf8(bytes).context("sealed secret is not utf-8"))
        {
            Ok(secret) => secret,
            Err(err) => {
                error!(user_id = %user_id, "Failed to open sealed totp secret: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

    match totp::verify_code(&secret_base32, request.code.trim()) {
        Ok(true) => {}
        Ok(false) => {
            warn!(user_id = %user_id, "enrollment code rejected");
            return validation("code", INVALID_CODE_MESSAGE);
        }
        Err(err) => {
            warn!(user_id = %user_id, "enrollment code unverifiable: {err}");
            return validation("code", INVALID_CODE_MESSAGE);
        }
    }

    let keys = match RecoveryKeySet::generate(auth_state.keys().recovery_pepper()) {
        Ok(keys) => keys,
        Err(err) => {
            error!("Failed to generate recovery keys: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(err) = storage::replace_recovery_keys(&pool, user_id, &keys.key_hashes).await {
        error!("Failed to store recovery keys: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match storage::confirm_totp(&pool, user_id).await {
        Ok(()) => {
            info!(user_id = %user_id, "totp enrollment confirmed");
            (
                StatusCode::OK,
                Json(TotpConfirmResponse {
                    message: CONFIRMED_MESSAGE.to_string(),
                    recovery_keys: keys.keys,
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to confirm totp enrollment: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Provisioning URL understood by authenticator apps.
fn otpauth_url(secret_base32: &str, account_email: &str) -> Result<String> {
    let issuer = env!("CARGO_PKG_NAME");
    let mut url = Url::parse(&format!("otpauth://totp/{issuer}:{account_email}"))
        .context("failed to build otpauth url")?;
    url.query_pairs_mut()
        .append_pair("secret", secret_base32)
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", "6")
        .append_pair("period", "30");
    Ok(url.into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::two_factor::{crypto, totp};
    use super::{otpauth_url, TOTP_SECRET_LEN};
    use rand::{rngs::OsRng, RngCore};
    use totp_rs::{Algorithm, Secret, TOTP};
    use uuid::Uuid;

    fn minted_secret() -> String {
        let mut bytes = [0u8; TOTP_SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        match Secret::Raw(bytes.to_vec()).to_encoded() {
            Secret::Encoded(value) => value,
            Secret::Raw(_) => panic!("to_encoded returned raw"),
        }
    }

    #[test]
    fn minted_secret_verifies_a_live_code() {
        // The secret handed to the app must satisfy the login-time check.
        let secret = minted_secret();
        let secret_bytes = Secret::Encoded(secret.clone()).to_bytes().unwrap();
        let code = TOTP::new(Algorithm::SHA1, 6, 1, 30, secret_bytes)
            .unwrap()
            .generate_current()
            .unwrap();
        assert!(totp::verify_code(&secret, &code).unwrap());
    }

    #[test]
    fn minted_secret_survives_sealing() {
        let key = [9u8; 32];
        let user_id = Uuid::new_v4();
        let secret = minted_secret();
        let sealed = crypto::seal_secret(&key, secret.as_bytes(), user_id).unwrap();
        let opened = crypto::open_secret(&key, &sealed, user_id).unwrap();
        assert_eq!(String::from_utf8(opened).unwrap(), secret);
    }

    #[test]
    fn otpauth_url_encodes_account_and_secret() {
        let url = otpauth_url("JBSWY3DPEHPK3PXP", "curator@example.com").unwrap();
        assert!(url.starts_with("otpauth://totp/"));
        assert!(url.contains("curator@example.com"));
        assert!(url.contains("secret=JBSWY3DPEHPK3PXP"));
        assert!(url.contains(&format!("issuer={}", env!("CARGO_PKG_NAME"))));
        assert!(url.contains("period=30"));
    }
}
