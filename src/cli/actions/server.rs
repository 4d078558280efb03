use crate::{api, cli::actions::Action};
use anyhow::Result;
use std::sync::Arc;

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server {
        port,
        dsn,
        frontend_base_url,
        email_code_ttl_seconds,
        email_code_resend_cooldown_seconds,
        email_outbox_poll_seconds,
        email_outbox_batch_size,
        email_outbox_max_attempts,
        totp_sealing_key,
        recovery_pepper,
    } = action;

    let auth_config = api::handlers::auth::AuthConfig::new(frontend_base_url)
        .with_email_code_ttl_seconds(email_code_ttl_seconds)
        .with_email_code_resend_cooldown_seconds(email_code_resend_cooldown_seconds);

    let keys = api::handlers::auth::SecretKeys::new(totp_sealing_key, recovery_pepper);

    let email_config = api::email::MailWorkerConfig::new()
        .with_poll_interval_seconds(email_outbox_poll_seconds)
        .with_batch_size(email_outbox_batch_size)
        .with_max_attempts(email_outbox_max_attempts);

    // No upstream limiter is deployed yet; swap the implementation here.
    let rate_limiter: Arc<dyn api::handlers::auth::RateLimiter> =
        Arc::new(api::handlers::auth::NoopRateLimiter);

    api::new(port, dsn, auth_config, rate_limiter, keys, email_config).await
}
