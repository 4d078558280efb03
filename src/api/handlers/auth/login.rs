//! Token acquisition and the two-factor challenge flow.
//!
//! Flow Overview:
//! 1) `POST /v1/auth/token` verifies the password; accounts without a second
//!    factor get a token directly, others get a challenge.
//! 2) The client resubmits credentials plus a code, either inline on the same
//!    endpoint or via `POST /v1/auth/token/verify`; nothing about the
//!    challenge is held server-side, so the password is re-verified.
//! 3) The gate decides; a one-time recovery key bypasses it.
//!
//! Security boundaries:
//! - Unknown email and wrong password are indistinguishable to the caller.
//! - A rejected code never reveals which method was consulted.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::Lazy;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    password,
    principal::Principal,
    rate_limit::{RateLimitAction, RateLimitDecision},
    state::AuthState,
    storage,
    two_factor::{
        self, email_code, GateVerdict, LiveProviders, TwoFactorMethod, INVALID_CODE_MESSAGE,
    },
    types::{
        CredentialsRequest, EmailCodeResponse, TokenRequest, TokenResponse, TokenVerifyRequest,
        TwoFactorChallenge, TwoFactorStatusResponse, UserSummary, ValidationErrors,
    },
    utils::{extract_client_ip, normalize_email, valid_email},
};

pub(super) const BAD_CREDENTIALS_MESSAGE: &str = "The provided credentials are incorrect.";
pub(super) const INVALID_RECOVERY_KEY_MESSAGE: &str = "The provided recovery key is invalid.";
const CODE_REQUIRED_MESSAGE: &str = "The two-factor authentication code is required.";
const NOT_ENABLED_MESSAGE: &str = "Two-factor authentication is not enabled for this account.";
const CODE_SENT_MESSAGE: &str = "A verification code has been sent to your email address.";
const COOLDOWN_MESSAGE: &str = "Please wait before requesting another code.";

// Verified against unknown emails so both rejection paths cost one Argon2id pass.
static TIMING_EQUALIZER_HASH: Lazy<String> =
    Lazy::new(|| password::hash_password("timing-equalizer").unwrap_or_default());

pub(super) fn validation(field: &str, message: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ValidationErrors::single(field, message)),
    )
        .into_response()
}

/// Resolve credentials to a principal, or `None` for any bad-credential case.
pub(super) async fn authenticate(
    pool: &PgPool,
    email: &str,
    supplied_password: &str,
) -> anyhow::Result<Option<Principal>> {
    let Some(principal) = storage::lookup_principal(pool, email).await? else {
        let _ = password::verify_password(supplied_password, &TIMING_EQUALIZER_HASH);
        return Ok(None);
    };

    if !principal.is_active() {
        // Disabled accounts look exactly like bad credentials to the caller.
        let _ = password::verify_password(supplied_password, &TIMING_EQUALIZER_HASH);
        warn!(user_id = %principal.user_id, "login rejected: account disabled");
        return Ok(None);
    }

    match password::verify_password(supplied_password, &principal.password_hash) {
        Ok(true) => Ok(Some(principal)),
        Ok(false) => Ok(None),
        Err(err) => {
            warn!(user_id = %principal.user_id, "stored password hash unusable: {err}");
            Ok(None)
        }
    }
}

async fn mint_token_response(
    pool: &PgPool,
    principal: &Principal,
    device_name: &str,
    wipe_tokens: bool,
) -> Response {
    if wipe_tokens {
        match storage::delete_api_tokens(pool, principal.user_id).await {
            Ok(revoked) => {
                info!(user_id = %principal.user_id, revoked, "revoked tokens before mint");
            }
            Err(err) => {
                error!("Failed to revoke tokens before mint: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    match storage::insert_api_token(pool, principal.user_id, device_name).await {
        Ok(token) => (
            StatusCode::CREATED,
            Json(TokenResponse {
                token,
                user: UserSummary {
                    id: principal.user_id,
                    email: principal.email.clone(),
                    name: principal.name.clone(),
                },
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to mint api token: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Acquire an API token, answering a challenge when a second factor is live.
#[utoipa::path(
    post,
    path = "/v1/auth/token",
    request_body = TokenRequest,
    responses(
        (status = 201, description = "Token minted", body = TokenResponse),
        (status = 202, description = "Second factor required", body = TwoFactorChallenge),
        (status = 400, description = "Missing payload"),
        (status = 422, description = "Validation error", body = ValidationErrors),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn token_acquire(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TokenRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let email = normalize_email(&request.email);
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::TokenAcquire)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::TokenAcquire)
            == RateLimitDecision::Limited
    {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    if !valid_email(&email) {
        return validation("email", BAD_CREDENTIALS_MESSAGE);
    }
    if request.device_name.trim().is_empty() {
        return validation("device_name", "The device name field is required.");
    }

    let principal = match authenticate(&pool, &email, &request.password).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            warn!(email = %email, "login rejected");
            return validation("email", BAD_CREDENTIALS_MESSAGE);
        }
        Err(err) => {
            error!("Failed to authenticate: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // A recovery key bypasses the gate; it is only meaningful under 2FA.
    let recovery_key = request
        .recovery_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty());
    if principal.requires_two_factor() {
        if let Some(key) = recovery_key {
            let pepper = auth_state.keys().recovery_pepper();
            return match storage::consume_recovery_key(&pool, principal.user_id, key, pepper).await
            {
                Ok(true) => {
                    info!(user_id = %principal.user_id, "recovery key accepted");
                    mint_token_response(
                        &pool,
                        &principal,
                        request.device_name.trim(),
                        request.wipe_tokens,
                    )
                    .await
                }
                Ok(false) => {
                    warn!(user_id = %principal.user_id, "recovery key rejected");
                    validation("recovery_key", INVALID_RECOVERY_KEY_MESSAGE)
                }
                Err(err) => {
                    error!("Failed to consume recovery key: {err}");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            };
        }
    }

    let mut providers = LiveProviders::new(&pool, auth_state.keys().totp_sealing_key());
    match two_factor::satisfy(
        &principal,
        request.two_factor_code.as_deref(),
        None,
        &mut providers,
    )
    .await
    {
        Ok(GateVerdict::NotRequired) => {
            mint_token_response(&pool, &principal, request.device_name.trim(), request.wipe_tokens)
                .await
        }
        Ok(GateVerdict::Verified(method)) => {
            info!(user_id = %principal.user_id, method = method.as_str(), "second factor verified");
            mint_token_response(&pool, &principal, request.device_name.trim(), request.wipe_tokens)
                .await
        }
        Ok(GateVerdict::CodeRequired) => {
            let methods: Vec<String> = principal
                .available_methods()
                .into_iter()
                .map(str::to_string)
                .collect();
            let primary = principal.primary_method().unwrap_or("totp").to_string();
            (
                StatusCode::ACCEPTED,
                Json(TwoFactorChallenge::new(methods, primary)),
            )
                .into_response()
        }
        Ok(GateVerdict::InvalidCode) => {
            warn!(user_id = %principal.user_id, "two-factor code rejected");
            validation("two_factor_code", INVALID_CODE_MESSAGE)
        }
        Err(err) => {
            error!("Failed to run two-factor gate: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Second step of the challenge flow, with an optional method hint.
#[utoipa::path(
    post,
    path = "/v1/auth/token/verify",
    request_body = TokenVerifyRequest,
    responses(
        (status = 201, description = "Token minted", body = TokenResponse),
        (status = 400, description = "Missing payload"),
        (status = 422, description = "Validation error", body = ValidationErrors),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn token_verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<TokenVerifyRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let email = normalize_email(&request.email);
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::TokenVerify)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::TokenVerify)
            == RateLimitDecision::Limited
    {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let method_hint = match request.method.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => match TwoFactorMethod::from_str(value) {
            Some(method) => Some(method),
            None => return validation("method", "The selected method is invalid."),
        },
    };

    if request.device_name.trim().is_empty() {
        return validation("device_name", "The device name field is required.");
    }

    let principal = match authenticate(&pool, &email, &request.password).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            warn!(email = %email, "verification rejected: bad credentials");
            return validation("email", BAD_CREDENTIALS_MESSAGE);
        }
        Err(err) => {
            error!("Failed to authenticate: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut providers = LiveProviders::new(&pool, auth_state.keys().totp_sealing_key());
    match two_factor::satisfy(&principal, Some(&request.code), method_hint, &mut providers).await {
        Ok(GateVerdict::NotRequired) => validation("code", NOT_ENABLED_MESSAGE),
        Ok(GateVerdict::Verified(method)) => {
            info!(user_id = %principal.user_id, method = method.as_str(), "second factor verified");
            mint_token_response(&pool, &principal, request.device_name.trim(), false).await
        }
        Ok(GateVerdict::CodeRequired) => validation("code", CODE_REQUIRED_MESSAGE),
        Ok(GateVerdict::InvalidCode) => {
            warn!(user_id = %principal.user_id, "two-factor code rejected");
            validation("code", INVALID_CODE_MESSAGE)
        }
        Err(err) => {
            error!("Failed to run two-factor gate: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Password-gated request for an emailed verification code.
#[utoipa::path(
    post,
    path = "/v1/auth/token/email-code",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Code queued", body = EmailCodeResponse),
        (status = 400, description = "Missing payload"),
        (status = 422, description = "Validation error", body = ValidationErrors),
        (status = 429, description = "Cooldown active or rate limited")
    ),
    tag = "auth"
)]
pub async fn email_code_request(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<CredentialsRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let email = normalize_email(&request.email);
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::EmailCodeRequest)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::EmailCodeRequest)
            == RateLimitDecision::Limited
    {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let principal = match authenticate(&pool, &email, &request.password).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            warn!(email = %email, "email code request rejected: bad credentials");
            return validation("email", BAD_CREDENTIALS_MESSAGE);
        }
        Err(err) => {
            error!("Failed to authenticate: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if !principal.can_use_email() {
        return validation(
            "email",
            "Email two-factor authentication is not enabled for this account.",
        );
    }

    match email_code::issue(&pool, &principal, auth_state.config()).await {
        Ok(email_code::IssueOutcome::Queued { expires_in }) => {
            info!(user_id = %principal.user_id, "email code queued");
            (
                StatusCode::OK,
                Json(EmailCodeResponse {
                    message: CODE_SENT_MESSAGE.to_string(),
                    expires_in,
                }),
            )
                .into_response()
        }
        Ok(email_code::IssueOutcome::Cooldown) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "message": COOLDOWN_MESSAGE })),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to issue email code: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Password-gated probe of the account's second-factor setup.
#[utoipa::path(
    post,
    path = "/v1/auth/two-factor/status",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Status", body = TwoFactorStatusResponse),
        (status = 400, description = "Missing payload"),
        (status = 422, description = "Validation error", body = ValidationErrors),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn two_factor_status(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<CredentialsRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let email = normalize_email(&request.email);
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::TokenAcquire)
        == RateLimitDecision::Limited
    {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let principal = match authenticate(&pool, &email, &request.password).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            warn!(email = %email, "status probe rejected: bad credentials");
            return validation("email", BAD_CREDENTIALS_MESSAGE);
        }
        Err(err) => {
            error!("Failed to authenticate: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let requires = principal.requires_two_factor();
    (
        StatusCode::OK,
        Json(TwoFactorStatusResponse {
            two_factor_enabled: requires,
            requires_two_factor: requires,
            available_methods: principal
                .available_methods()
                .into_iter()
                .map(str::to_string)
                .collect(),
            primary_method: principal.primary_method().map(str::to_string),
        }),
    )
        .into_response()
}

/// Revoke every token held by the authenticated principal.
#[utoipa::path(
    delete,
    path = "/v1/auth/tokens",
    responses(
        (status = 204, description = "Tokens revoked"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth",
    security(("bearer" = []))
)]
pub async fn tokens_revoke(headers: HeaderMap, pool: Extension<PgPool>) -> Response {
    let user_id = match super::require_token_auth(&headers, &pool).await {
        Ok(user_id) => user_id,
        Err(status) => return status.into_response(),
    };

    match storage::delete_api_tokens(&pool, user_id).await {
        Ok(revoked) => {
            info!(user_id = %user_id, revoked, "tokens revoked");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("Failed to revoke tokens: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BAD_CREDENTIALS_MESSAGE, INVALID_RECOVERY_KEY_MESSAGE};
    use super::super::two_factor::INVALID_CODE_MESSAGE;

    // The SPA matches on these strings; they are part of the contract.
    #[test]
    fn rejection_messages_are_exact() {
        assert_eq!(
            INVALID_CODE_MESSAGE,
            "The provided two-factor authentication code is invalid."
        );
        assert_eq!(BAD_CREDENTIALS_MESSAGE, "The provided credentials are incorrect.");
        assert_eq!(INVALID_RECOVERY_KEY_MESSAGE, "The provided recovery key is invalid.");
    }
}
