//! Self-service password change, guarded by the two-factor gate.
//!
//! The checks are ordered: current password first, then the new-password
//! policy, then the gate. A wrong current password never reaches the gate, and
//! a missing code is rejected before any provider is consulted. The stored
//! hash changes only when every check has passed.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    password,
    principal::Principal,
    rate_limit::{RateLimitAction, RateLimitDecision},
    state::AuthState,
    storage,
    two_factor::{self, GateVerdict, LiveProviders, SecondFactorProviders, INVALID_CODE_MESSAGE},
    types::{PasswordChangeRequest, ValidationErrors},
    utils::extract_client_ip,
};

pub(super) const ERROR_BAG: &str = "updatePassword";
pub(super) const CODE_REQUIRED_FOR_PASSWORD_MESSAGE: &str =
    "Two-factor authentication code is required when changing password.";
const CURRENT_PASSWORD_MESSAGE: &str =
    "The provided password does not match your current password.";
const WEAK_PASSWORD_MESSAGE: &str = "The password must be at least 8 characters.";
const CONFIRMATION_MESSAGE: &str = "The password confirmation does not match.";

/// Decision for a password-change request. `Updated` carries the new hash so
/// evaluation stays side-effect free.
#[derive(Debug)]
pub(super) enum ChangeOutcome {
    Updated { new_hash: String },
    CurrentPasswordMismatch,
    WeakPassword,
    ConfirmationMismatch,
    CodeRequired,
    InvalidCode,
}

/// Run the ordered checks without touching the database.
pub(super) async fn evaluate<P: SecondFactorProviders>(
    principal: &Principal,
    request: &PasswordChangeRequest,
    providers: &mut P,
) -> anyhow::Result<ChangeOutcome> {
    match password::verify_password(&request.current_password, &principal.password_hash) {
        Ok(true) => {}
        Ok(false) => return Ok(ChangeOutcome::CurrentPasswordMismatch),
        Err(err) => {
            warn!(user_id = %principal.user_id, "stored password hash unusable: {err}");
            return Ok(ChangeOutcome::CurrentPasswordMismatch);
        }
    }

    if !password::acceptable_password(&request.password) {
        return Ok(ChangeOutcome::WeakPassword);
    }
    if request.password != request.password_confirmation {
        return Ok(ChangeOutcome::ConfirmationMismatch);
    }

    match two_factor::satisfy(
        principal,
        request.two_factor_code.as_deref(),
        None,
        providers,
    )
    .await?
    {
        GateVerdict::NotRequired | GateVerdict::Verified(_) => {}
        GateVerdict::CodeRequired => return Ok(ChangeOutcome::CodeRequired),
        GateVerdict::InvalidCode => return Ok(ChangeOutcome::InvalidCode),
    }

    Ok(ChangeOutcome::Updated {
        new_hash: password::hash_password(&request.password)?,
    })
}

fn bagged_validation(field: &str, message: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ValidationErrors::single(field, message).with_error_bag(ERROR_BAG)),
    )
        .into_response()
}

/// Change the authenticated user's password.
#[utoipa::path(
    put,
    path = "/v1/me/password",
    request_body = PasswordChangeRequest,
    responses(
        (status = 204, description = "Password updated"),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Validation error", body = ValidationErrors),
        (status = 429, description = "Rate limited")
    ),
    tag = "me",
    security(("bearer" = []))
)]
pub async fn password_change(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordChangeRequest>>,
) -> Response {
    let user_id = match super::require_token_auth(&headers, &pool).await {
        Ok(user_id) => user_id,
        Err(status) => return status.into_response(),
    };

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::PasswordChange)
        == RateLimitDecision::Limited
    {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let principal = match storage::lookup_principal_by_id(&pool, user_id).await {
        Ok(Some(principal)) => principal,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to load principal: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut providers = LiveProviders::new(&pool, auth_state.keys().totp_sealing_key());
    let outcome = match evaluate(&principal, &request, &mut providers).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Failed to evaluate password change: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match outcome {
        ChangeOutcome::Updated { new_hash } => {
            if let Err(err) = storage::update_password_hash(&pool, user_id, &new_hash).await {
                error!("Failed to store new password hash: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            info!(user_id = %user_id, "password changed");
            StatusCode::NO_CONTENT.into_response()
        }
        ChangeOutcome::CurrentPasswordMismatch => {
            warn!(user_id = %user_id, "password change rejected: current password mismatch");
            bagged_validation("current_password", CURRENT_PASSWORD_MESSAGE)
        }
        ChangeOutcome::WeakPassword => bagged_validation("password", WEAK_PASSWORD_MESSAGE),
        ChangeOutcome::ConfirmationMismatch => bagged_validation("password", CONFIRMATION_MESSAGE),
        ChangeOutcome::CodeRequired => {
            bagged_validation("two_factor_code", CODE_REQUIRED_FOR_PASSWORD_MESSAGE)
        }
        ChangeOutcome::InvalidCode => {
            warn!(user_id = %user_id, "password change rejected: two-factor code");
            bagged_validation("two_factor_code", INVALID_CODE_MESSAGE)
        }
    }
}
