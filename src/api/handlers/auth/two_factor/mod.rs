//! Two-factor verification gate.
//!
//! Flow Overview:
//! 1) Password auth succeeds, then the caller asks the gate whether a second
//!    factor is needed and whether the submitted code satisfies it.
//! 2) The gate tries the authenticator app first, then the emailed code, in
//!    that fixed order, stopping at the first match.
//! 3) Callers map `InvalidCode` to one uniform message so a response never
//!    reveals which factor rejected the code.
//!
//! Security boundaries:
//! - A TOTP provider malfunction (undecodable secret, unsealing failure) is
//!   logged and treated as a failed attempt, never surfaced to the client.
//! - A database failure while checking emailed codes is a real server error
//!   and propagates.

pub(crate) mod crypto;
pub(crate) mod email_code;
pub(crate) mod recovery;
pub(crate) mod totp;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::warn;
use utoipa::ToSchema;

use super::principal::Principal;

/// Uniform rejection shown for any wrong or unusable code.
pub const INVALID_CODE_MESSAGE: &str =
    "The provided two-factor authentication code is invalid.";

/// A second factor the gate can consult.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    Totp,
    Email,
}

impl TwoFactorMethod {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Email => "email",
        }
    }

    pub(crate) fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "totp" => Some(Self::Totp),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

/// Outcome of a pass through the gate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GateVerdict {
    /// The account has no live second factor; proceed.
    NotRequired,
    /// The submitted code matched the named method.
    Verified(TwoFactorMethod),
    /// A second factor is required and no code was submitted.
    CodeRequired,
    /// A code was submitted and no method accepted it.
    InvalidCode,
}

/// The verification backends the gate dispatches to.
///
/// `verify_totp` is infallible-by-policy: an `Err` means the provider itself
/// malfunctioned and the gate downgrades it to a non-match. An `Err` from
/// `verify_email_code` is a database failure and aborts the pass.
#[allow(async_fn_in_trait)]
pub trait SecondFactorProviders {
    fn verify_totp(&mut self, principal: &Principal, code: &str) -> Result<bool>;
    async fn verify_email_code(&mut self, principal: &Principal, code: &str) -> Result<bool>;
}

/// Run the submitted code through the account's live second factors.
///
/// Order is fixed: authenticator app first, emailed code second. The first
/// match wins and later providers are not consulted. `method_hint` restricts
/// the pass to that single method; a hint naming a method the account cannot
/// use fails the pass without consulting anything.
///
/// # Errors
/// Returns an error only when the emailed-code lookup hits the database and
/// fails.
pub async fn satisfy<P: SecondFactorProviders>(
    principal: &Principal,
    code: Option<&str>,
    method_hint: Option<TwoFactorMethod>,
    providers: &mut P,
) -> Result<GateVerdict> {
    if !principal.requires_two_factor() {
        return Ok(GateVerdict::NotRequired);
    }

    let code = code.map(str::trim).filter(|code| !code.is_empty());
    let Some(code) = code else {
        return Ok(GateVerdict::CodeRequired);
    };

    let try_totp = principal.can_use_totp()
        && method_hint.map_or(true, |hint| hint == TwoFactorMethod::Totp);
    let try_email = principal.can_use_email()
        && method_hint.map_or(true, |hint| hint == TwoFactorMethod::Email);

    if try_totp {
        match providers.verify_totp(principal, code) {
            Ok(true) => return Ok(GateVerdict::Verified(TwoFactorMethod::Totp)),
            Ok(false) => {}
            Err(err) => {
                warn!(user_id = %principal.user_id, "TOTP verification unavailable: {err}");
            }
        }
    }

    if try_email && providers.verify_email_code(principal, code).await? {
        return Ok(GateVerdict::Verified(TwoFactorMethod::Email));
    }

    Ok(GateVerdict::InvalidCode)
}

/// Production providers backed by the database and the sealing key.
pub struct LiveProviders<'a> {
    pool: &'a PgPool,
    sealing_key: &'a [u8],
}

impl<'a> LiveProviders<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool, sealing_key: &'a [u8]) -> Self {
        Self { pool, sealing_key }
    }
}

impl SecondFactorProviders for LiveProviders<'_> {
    fn verify_totp(&mut self, principal: &Principal, code: &str) -> Result<bool> {
        let Some(sealed) = principal.totp_secret_sealed.as_deref() else {
            return Ok(false);
        };
        let secret_bytes = crypto::open_secret(self.sealing_key, sealed, principal.user_id)?;
        let secret_base32 = std::str::from_utf8(&secret_bytes)
            .map_err(|_| anyhow::anyhow!("stored totp secret is not utf-8"))?;
        totp::verify_code(secret_base32, code)
    }

    async fn verify_email_code(&mut self, principal: &Principal, code: &str) -> Result<bool> {
        email_code::consume(self.pool, principal.user_id, code).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::principal::{tests::principal, PreferredMethod, Principal};
    use super::{satisfy, GateVerdict, SecondFactorProviders, TwoFactorMethod};
    use anyhow::Result;

    /// Scripted providers that record every call.
    struct ScriptedProviders {
        totp_result: Result<bool>,
        email_result: Result<bool>,
        totp_calls: Vec<String>,
        email_calls: Vec<String>,
    }

    impl ScriptedProviders {
        fn new(totp_result: Result<bool>, email_result: Result<bool>) -> Self {
            Self {
                totp_result,
                email_result,
                totp_calls: Vec::new(),
                email_calls: Vec::new(),
            }
        }
    }

    impl SecondFactorProviders for ScriptedProviders {
        fn verify_totp(&mut self, _principal: &Principal, code: &str) -> Result<bool> {
            self.totp_calls.push(code.to_string());
            match &self.totp_result {
                Ok(matched) => Ok(*matched),
                Err(err) => Err(anyhow::anyhow!("{err}")),
            }
        }

        async fn verify_email_code(&mut self, _principal: &Principal, code: &str) -> Result<bool> {
            self.email_calls.push(code.to_string());
            match &self.email_result {
                Ok(matched) => Ok(*matched),
                Err(err) => Err(anyhow::anyhow!("{err}")),
            }
        }
    }

    #[tokio::test]
    async fn no_factors_skips_providers() {
        let user = principal(PreferredMethod::Both, false, false);
        let mut providers = ScriptedProviders::new(Ok(true), Ok(true));
        let verdict = satisfy(&user, Some("123456"), None, &mut providers)
            .await
            .unwrap();
        assert_eq!(verdict, GateVerdict::NotRequired);
        assert!(providers.totp_calls.is_empty());
        assert!(providers.email_calls.is_empty());
    }

    #[tokio::test]
    async fn missing_code_requires_one() {
        let user = principal(PreferredMethod::Both, true, true);
        let mut providers = ScriptedProviders::new(Ok(true), Ok(true));
        assert_eq!(
            satisfy(&user, None, None, &mut providers).await.unwrap(),
            GateVerdict::CodeRequired
        );
        assert_eq!(
            satisfy(&user, Some("   "), None, &mut providers)
                .await
                .unwrap(),
            GateVerdict::CodeRequired
        );
        assert!(providers.totp_calls.is_empty());
        assert!(providers.email_calls.is_empty());
    }

    #[tokio::test]
    async fn totp_match_short_circuits_email() {
        let user = principal(PreferredMethod::Both, true, true);
        let mut providers = ScriptedProviders::new(Ok(true), Ok(true));
        let verdict = satisfy(&user, Some("123456"), None, &mut providers)
            .await
            .unwrap();
        assert_eq!(verdict, GateVerdict::Verified(TwoFactorMethod::Totp));
        assert_eq!(providers.totp_calls, vec!["123456"]);
        assert!(providers.email_calls.is_empty());
    }

    #[tokio::test]
    async fn totp_miss_falls_back_to_email() {
        let user = principal(PreferredMethod::Both, true, true);
        let mut providers = ScriptedProviders::new(Ok(false), Ok(true));
        let verdict = satisfy(&user, Some("654321"), None, &mut providers)
            .await
            .unwrap();
        assert_eq!(verdict, GateVerdict::Verified(TwoFactorMethod::Email));
        assert_eq!(providers.totp_calls, vec!["654321"]);
        assert_eq!(providers.email_calls, vec!["654321"]);
    }

    #[tokio::test]
    async fn both_misses_yield_uniform_invalid() {
        let user = principal(PreferredMethod::Both, true, true);
        let mut providers = ScriptedProviders::new(Ok(false), Ok(false));
        let verdict = satisfy(&user, Some("000000"), None, &mut providers)
            .await
            .unwrap();
        assert_eq!(verdict, GateVerdict::InvalidCode);
        assert_eq!(providers.totp_calls.len(), 1);
        assert_eq!(providers.email_calls.len(), 1);
    }

    #[tokio::test]
    async fn totp_malfunction_downgrades_to_miss() {
        let user = principal(PreferredMethod::Both, true, true);
        let mut providers =
            ScriptedProviders::new(Err(anyhow::anyhow!("undecodable secret")), Ok(true));
        let verdict = satisfy(&user, Some("123456"), None, &mut providers)
            .await
            .unwrap();
        assert_eq!(verdict, GateVerdict::Verified(TwoFactorMethod::Email));
    }

    #[tokio::test]
    async fn totp_malfunction_without_email_is_invalid_not_error() {
        let user = principal(PreferredMethod::Totp, true, false);
        let mut providers =
            ScriptedProviders::new(Err(anyhow::anyhow!("undecodable secret")), Ok(true));
        let verdict = satisfy(&user, Some("123456"), None, &mut providers)
            .await
            .unwrap();
        assert_eq!(verdict, GateVerdict::InvalidCode);
        assert!(providers.email_calls.is_empty());
    }

    #[tokio::test]
    async fn email_database_failure_propagates() {
        let user = principal(PreferredMethod::Both, true, true);
        let mut providers =
            ScriptedProviders::new(Ok(false), Err(anyhow::anyhow!("connection reset")));
        assert!(satisfy(&user, Some("123456"), None, &mut providers)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn hint_restricts_to_named_method() {
        let user = principal(PreferredMethod::Both, true, true);
        let mut providers = ScriptedProviders::new(Ok(true), Ok(true));
        let verdict = satisfy(
            &user,
            Some("123456"),
            Some(TwoFactorMethod::Email),
            &mut providers,
        )
        .await
        .unwrap();
        assert_eq!(verdict, GateVerdict::Verified(TwoFactorMethod::Email));
        assert!(providers.totp_calls.is_empty());
    }

    #[tokio::test]
    async fn hint_for_unavailable_method_is_invalid() {
        let user = principal(PreferredMethod::Totp, true, false);
        let mut providers = ScriptedProviders::new(Ok(true), Ok(true));
        let verdict = satisfy(
            &user,
            Some("123456"),
            Some(TwoFactorMethod::Email),
            &mut providers,
        )
        .await
        .unwrap();
        assert_eq!(verdict, GateVerdict::InvalidCode);
        assert!(providers.totp_calls.is_empty());
        assert!(providers.email_calls.is_empty());
    }

    #[test]
    fn method_round_trips() {
        assert_eq!(
            TwoFactorMethod::from_str(TwoFactorMethod::Totp.as_str()),
            Some(TwoFactorMethod::Totp)
        );
        assert_eq!(
            TwoFactorMethod::from_str(TwoFactorMethod::Email.as_str()),
            Some(TwoFactorMethod::Email)
        );
        assert_eq!(TwoFactorMethod::from_str("sms"), None);
    }
}
