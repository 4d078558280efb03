//! Emailed one-time codes.
//!
//! Codes are 6 digits, stored as SHA-256 digests, expire after a short TTL,
//! and are consumed on first successful match. Delivery goes through the
//! transactional outbox so issuing the code and queueing the mail commit
//! together.

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::super::principal::Principal;
use super::super::state::AuthConfig;
use super::super::utils::{generate_email_code, hash_email_code};

const EMAIL_TEMPLATE: &str = "two_factor_code";

/// Outcome for a code request.
#[derive(Debug)]
pub(crate) enum IssueOutcome {
    Queued { expires_in: i64 },
    Cooldown,
}

/// Issue a fresh code and enqueue its delivery mail in one transaction.
pub(crate) async fn issue(
    pool: &PgPool,
    user: &Principal,
    config: &AuthConfig,
) -> Result<IssueOutcome> {
    let mut tx = pool.begin().await.context("begin email code transaction")?;

    lock_user_row(&mut tx, user.user_id).await?;

    if cooldown_active(&mut tx, user.user_id, config.email_code_resend_cooldown_seconds()).await? {
        tx.commit().await.context("commit email code cooldown")?;
        return Ok(IssueOutcome::Cooldown);
    }

    let code = generate_email_code();
    let code_hash = hash_email_code(&code);
    let ttl_seconds = config.email_code_ttl_seconds();

    let query = r"
        INSERT INTO email_two_factor_codes
            (user_id, code_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user.user_id)
        .bind(code_hash)
        .bind(ttl_seconds)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert email two-factor code")?;

    let payload_json = json!({
        "email": user.email,
        "name": user.name,
        "code": code,
        "expires_minutes": ttl_seconds / 60,
    });
    let payload_text =
        serde_json::to_string(&payload_json).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(&user.email)
        .bind(EMAIL_TEMPLATE)
        .bind(payload_text)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;

    tx.commit().await.context("commit email code enqueue")?;
    Ok(IssueOutcome::Queued {
        expires_in: ttl_seconds,
    })
}

/// Mark the matching code consumed if still valid. Single use.
pub(crate) async fn consume(pool: &PgPool, user_id: Uuid, code: &str) -> Result<bool> {
    let code_hash = hash_email_code(code.trim());

    let query = r"
        UPDATE email_two_factor_codes
        SET consumed_at = NOW()
        WHERE user_id = $1
          AND code_hash = $2
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(code_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume email two-factor code")?;

    Ok(row.map(|row| row.get::<Uuid, _>("id")).is_some())
}

async fn lock_user_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<()> {
    // Serializes concurrent requests for one user so the cooldown check and
    // the insert cannot interleave; without the lock both would enqueue.
    let query = r"
        SELECT id
        FROM users
        WHERE id = $1
        FOR UPDATE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lock user row for email code issue")?;
    Ok(())
}

async fn cooldown_active(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    cooldown_seconds: i64,
) -> Result<bool> {
    // Cooldown prevents repeated code requests from spamming the outbox.
    let query = r"
        SELECT 1
        FROM email_two_factor_codes
        WHERE user_id = $1
          AND created_at > NOW() - ($2 * INTERVAL '1 second')
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(cooldown_seconds)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check email code cooldown")?;
    Ok(row.is_some())
}
