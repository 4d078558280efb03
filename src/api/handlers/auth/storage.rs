//! Database helpers for authentication state.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::principal::{AccountStatus, PreferredMethod, Principal};
use super::two_factor::recovery::verify_recovery_key;
use super::utils::{generate_api_token, hash_api_token, is_unique_violation};

fn principal_from_row(row: &sqlx::postgres::PgRow) -> Principal {
    Principal {
        user_id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        password_hash: row.get("password_hash"),
        totp_secret_sealed: row.get("totp_secret_sealed"),
        totp_confirmed: row.get("totp_confirmed"),
        email_2fa_enabled: row.get("email_2fa_enabled"),
        preferred_method: PreferredMethod::from_column(
            row.get::<String, _>("preferred_2fa_method").as_str(),
        ),
        status: AccountStatus::from_column(row.get::<String, _>("status").as_str()),
    }
}

/// Look up a user for authentication by normalized email.
pub(super) async fn lookup_principal(pool: &PgPool, email: &str) -> Result<Option<Principal>> {
    let query = r"
        SELECT id, email, name, password_hash, totp_secret_sealed,
               totp_confirmed_at IS NOT NULL AS totp_confirmed,
               email_2fa_enabled, preferred_2fa_method::text AS preferred_2fa_method,
               status
        FROM users
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup principal")?;

    Ok(row.as_ref().map(principal_from_row))
}

/// Look up a user by id, for bearer-authenticated operations.
pub(super) async fn lookup_principal_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<Principal>> {
    let query = r"
        SELECT id, email, name, password_hash, totp_secret_sealed,
               totp_confirmed_at IS NOT NULL AS totp_confirmed,
               email_2fa_enabled, preferred_2fa_method::text AS preferred_2fa_method,
               status
        FROM users
        WHERE id = $1
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
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup principal by id")?;

    Ok(row.as_ref().map(principal_from_row))
}

/// Mint a new API token for a device.
///
/// The raw token is returned to the caller once; only its hash is stored.
pub(super) async fn insert_api_token(
    pool: &PgPool,
    user_id: Uuid,
    device_name: &str,
) -> Result<String> {
    let query = r"
        INSERT INTO api_tokens (user_id, token_hash, device_name)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_api_token()?;
        let token_hash = hash_api_token(&token);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(device_name)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert api token"),
        }
    }

    Err(anyhow!("failed to generate unique api token"))
}

/// Resolve a presented API token to its owner.
pub(super) async fn lookup_api_token(pool: &PgPool, token_hash: &[u8]) -> Result<Option<Uuid>> {
    let query = r"
        SELECT user_id
        FROM api_tokens
        WHERE token_hash = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup api token")?;

    if row.is_some() {
        let query = r"
            UPDATE api_tokens
            SET last_used_at = NOW()
            WHERE token_hash = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to update api token last_used_at")?;
    }

    Ok(row.map(|row| row.get("user_id")))
}

/// Revoke every token the user holds.
pub(super) async fn delete_api_tokens(pool: &PgPool, user_id: Uuid) -> Result<u64> {
    let query = "DELETE FROM api_tokens WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete api tokens")?;
    Ok(result.rows_affected())
}

/// Try to consume one of the user's unused recovery keys.
///
/// Verification walks the stored hashes; consumption marks the matched row
/// used only if it is still unused, so a raced duplicate submission loses.
pub(super) async fn consume_recovery_key(
    pool: &PgPool,
    user_id: Uuid,
    key: &str,
    pepper: &[u8],
) -> Result<bool> {
    let query = r"
        SELECT id, key_hash
        FROM recovery_keys
        WHERE user_id = $1
          AND used_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list recovery keys")?;

    let mut matched_id: Option<Uuid> = None;
    for row in &rows {
        let hash: String = row.get("key_hash");
        if verify_recovery_key(key, &hash, pepper)? {
            matched_id = Some(row.get("id"));
            break;
        }
    }

    let Some(matched_id) = matched_id else {
        return Ok(false);
    };

    let query = r"
        UPDATE recovery_keys
        SET used_at = NOW()
        WHERE id = $1
          AND used_at IS NULL
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(matched_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume recovery key")?;

    Ok(row.is_some())
}

/// Store fresh recovery-key hashes, replacing any previous set.
pub(super) async fn replace_recovery_keys(
    pool: &PgPool,
    user_id: Uuid,
    key_hashes: &[String],
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin recovery key transaction")?;

    let query = "DELETE FROM recovery_keys WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete old recovery keys")?;

    let query = r"
        INSERT INTO recovery_keys (user_id, key_hash)
        VALUES ($1, $2)
    ";
    for hash in key_hashes {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(hash)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert recovery key")?;
    }

    tx.commit().await.context("commit recovery key transaction")?;
    Ok(())
}

/// Store a freshly sealed TOTP secret, resetting any prior confirmation.
pub(super) async fn store_totp_secret(
    pool: &PgPool,
    user_id: Uuid,
    sealed_secret: &[u8],
) -> Result<()> {
    let query = r"
        UPDATE users
        SET totp_secret_sealed = $2,
            totp_confirmed_at = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(sealed_secret)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store totp secret")?;
    Ok(())
}

/// Mark the stored TOTP secret as confirmed by a working authenticator.
pub(super) async fn confirm_totp(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE users
        SET totp_confirmed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
          AND totp_secret_sealed IS NOT NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to confirm totp secret")?;
    Ok(())
}

/// Rotate the stored password hash.
pub(super) async fn update_password_hash(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update password hash")?;
    Ok(())
}
