//! Request/response types for the auth API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// Body for `POST /v1/auth/token`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub email: String,
    pub password: String,
    pub device_name: String,
    /// Second-factor code, required once a challenge was issued.
    #[serde(default)]
    pub two_factor_code: Option<String>,
    /// One-time recovery key, accepted instead of a code.
    #[serde(default)]
    pub recovery_key: Option<String>,
    /// Revoke every existing token before minting the new one.
    #[serde(default)]
    pub wipe_tokens: bool,
}

/// Body for `POST /v1/auth/token/verify`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenVerifyRequest {
    pub email: String,
    pub password: String,
    pub device_name: String,
    pub code: String,
    /// Restrict verification to one method ("totp" or "email").
    #[serde(default)]
    pub method: Option<String>,
}

/// Minted token plus the owning user.
#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
    pub user: UserSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

/// Challenge answered in place of a token when a second factor is enrolled.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TwoFactorChallenge {
    pub requires_two_factor: bool,
    pub available_methods: Vec<String>,
    pub primary_method: String,
    pub message: String,
}

impl TwoFactorChallenge {
    pub(super) fn new(available_methods: Vec<String>, primary_method: String) -> Self {
        Self {
            requires_two_factor: true,
            available_methods,
            primary_method,
            message: "Two-factor authentication required. Please provide a verification code."
                .to_string(),
        }
    }
}

/// Body for `POST /v1/auth/token/email-code` and
/// `POST /v1/auth/two-factor/status`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EmailCodeResponse {
    pub message: String,
    /// Seconds until the emailed code expires.
    pub expires_in: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorStatusResponse {
    pub two_factor_enabled: bool,
    pub requires_two_factor: bool,
    pub available_methods: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_method: Option<String>,
}

/// Fresh authenticator enrollment, returned once by
/// `POST /v1/me/two-factor/totp`.
#[derive(Debug, Serialize, ToSchema)]
pub struct TotpEnrollResponse {
    /// Base32 secret to load into the authenticator app.
    pub secret: String,
    /// `otpauth://` URL for QR provisioning.
    pub otpauth_url: String,
}

/// Body for `POST /v1/me/two-factor/totp/confirm`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TotpConfirmRequest {
    pub code: String,
}

/// Confirmation result; the recovery keys are shown exactly once.
#[derive(Debug, Serialize, ToSchema)]
pub struct TotpConfirmResponse {
    pub message: String,
    pub recovery_keys: Vec<String>,
}

/// Body for `PUT /v1/me/password`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub password: String,
    pub password_confirmation: String,
    #[serde(default)]
    pub two_factor_code: Option<String>,
}

/// Field-keyed validation failure, compatible with what the frontends expect.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ValidationErrors {
    pub message: String,
    pub errors: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_bag: Option<String>,
}

impl ValidationErrors {
    pub(super) fn single(field: &str, message: &str) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self {
            message: message.to_string(),
            errors,
            error_bag: None,
        }
    }

    #[must_use]
    pub(super) fn with_error_bag(mut self, bag: &str) -> Self {
        self.error_bag = Some(bag.to_string());
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{TokenRequest, TwoFactorChallenge, ValidationErrors};

    #[test]
    fn token_request_optional_fields_default() {
        let request: TokenRequest = serde_json::from_str(
            r#"{"email":"a@example.com","password":"secret","device_name":"phone"}"#,
        )
        .unwrap();
        assert!(request.two_factor_code.is_none());
        assert!(request.recovery_key.is_none());
        assert!(!request.wipe_tokens);
    }

    #[test]
    fn challenge_payload_shape() {
        let challenge =
            TwoFactorChallenge::new(vec!["totp".to_string(), "email".to_string()], "totp".to_string());
        let json = serde_json::to_value(&challenge).unwrap();
        assert_eq!(json["requires_two_factor"], true);
        assert_eq!(json["primary_method"], "totp");
        assert_eq!(json["available_methods"][1], "email");
        assert_eq!(
            json["message"],
            "Two-factor authentication required. Please provide a verification code."
        );
    }

    #[test]
    fn validation_errors_serialize_like_frontends_expect() {
        let errors = ValidationErrors::single("two_factor_code", "Code required.")
            .with_error_bag("updatePassword");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["message"], "Code required.");
        assert_eq!(json["errors"]["two_factor_code"][0], "Code required.");
        assert_eq!(json["error_bag"], "updatePassword");
    }

    #[test]
    fn validation_errors_omit_missing_bag() {
        let errors = ValidationErrors::single("email", "Invalid.");
        let json = serde_json::to_value(&errors).unwrap();
        assert!(json.get("error_bag").is_none());
    }
}
