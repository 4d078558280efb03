//! Auth state and configuration.

use secrecy::{ExposeSecret, SecretBox};
use std::sync::Arc;

use super::rate_limit::RateLimiter;

const DEFAULT_EMAIL_CODE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    email_code_ttl_seconds: i64,
    email_code_resend_cooldown_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            email_code_ttl_seconds: DEFAULT_EMAIL_CODE_TTL_SECONDS,
            email_code_resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
        }
    }

    #[must_use]
    pub fn with_email_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.email_code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_code_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.email_code_resend_cooldown_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn email_code_ttl_seconds(&self) -> i64 {
        self.email_code_ttl_seconds
    }

    pub(super) fn email_code_resend_cooldown_seconds(&self) -> i64 {
        self.email_code_resend_cooldown_seconds
    }
}

/// Key material loaded at startup, never logged.
pub struct SecretKeys {
    totp_sealing_key: SecretBox<[u8; 32]>,
    recovery_pepper: SecretBox<Vec<u8>>,
}

impl SecretKeys {
    #[must_use]
    pub fn new(totp_sealing_key: [u8; 32], recovery_pepper: Vec<u8>) -> Self {
        Self {
            totp_sealing_key: SecretBox::new(Box::new(totp_sealing_key)),
            recovery_pepper: SecretBox::new(Box::new(recovery_pepper)),
        }
    }

    pub(super) fn totp_sealing_key(&self) -> &[u8] {
        self.totp_sealing_key.expose_secret()
    }

    pub(super) fn recovery_pepper(&self) -> &[u8] {
        self.recovery_pepper.expose_secret()
    }
}

pub struct AuthState {
    config: AuthConfig,
    rate_limiter: Arc<dyn RateLimiter>,
    keys: SecretKeys,
}

impl AuthState {
    pub fn new(config: AuthConfig, rate_limiter: Arc<dyn RateLimiter>, keys: SecretKeys) -> Self {
        Self {
            config,
            rate_limiter,
            keys,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    pub(super) fn keys(&self) -> &SecretKeys {
        &self.keys
    }
}
