//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::Action;
use crate::cli::commands::{auth, keys};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let key_opts = keys::Options::parse(matches)?;

    Ok(Action::Server {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        email_code_ttl_seconds: auth_opts.email_code_ttl_seconds,
        email_code_resend_cooldown_seconds: auth_opts.email_code_resend_cooldown_seconds,
        email_outbox_poll_seconds: auth_opts.outbox_poll_seconds,
        email_outbox_batch_size: auth_opts.outbox_batch_size,
        email_outbox_max_attempts: auth_opts.outbox_max_attempts,
        totp_sealing_key: key_opts.totp_sealing_key,
        recovery_pepper: key_opts.recovery_pepper,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::actions::Action;

    #[test]
    fn handler_builds_server_action_from_env() {
        temp_env::with_vars(
            [
                (
                    "INVENTARIA_DSN",
                    Some("postgres://user@localhost:5432/inventaria"),
                ),
                (
                    "INVENTARIA_TOTP_SEALING_KEY",
                    Some("MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY="),
                ),
                ("INVENTARIA_RECOVERY_PEPPER", Some("pepper")),
                ("INVENTARIA_FRONTEND_BASE_URL", Some("http://localhost:5173")),
                ("INVENTARIA_EMAIL_CODE_TTL_SECONDS", Some("120")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["inventaria"]);
                let action = handler(&matches).unwrap();
                let Action::Server {
                    port,
                    dsn,
                    frontend_base_url,
                    email_code_ttl_seconds,
                    recovery_pepper,
                    ..
                } = action;
                assert_eq!(port, 8080);
                assert_eq!(dsn, "postgres://user@localhost:5432/inventaria");
                assert_eq!(frontend_base_url, "http://localhost:5173");
                assert_eq!(email_code_ttl_seconds, 120);
                assert_eq!(recovery_pepper, b"pepper");
            },
        );
    }

    #[test]
    fn handler_requires_sealing_key() {
        temp_env::with_vars(
            [
                (
                    "INVENTARIA_DSN",
                    Some("postgres://user@localhost:5432/inventaria"),
                ),
                ("INVENTARIA_TOTP_SEALING_KEY", None::<&str>),
                ("INVENTARIA_RECOVERY_PEPPER", Some("pepper")),
            ],
            || {
                let command = crate::cli::commands::new();
                let result = command.try_get_matches_from(vec!["inventaria"]);
                assert!(result.is_err());
            },
        );
    }
}
