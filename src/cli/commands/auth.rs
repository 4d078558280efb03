use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_EMAIL_CODE_TTL: &str = "email-code-ttl-seconds";
pub const ARG_EMAIL_CODE_COOLDOWN: &str = "email-code-resend-cooldown-seconds";
pub const ARG_OUTBOX_POLL: &str = "email-outbox-poll-seconds";
pub const ARG_OUTBOX_BATCH: &str = "email-outbox-batch-size";
pub const ARG_OUTBOX_MAX_ATTEMPTS: &str = "email-outbox-max-attempts";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL allowed for CORS")
                .env("INVENTARIA_FRONTEND_BASE_URL")
                .default_value("https://inventaria.dev"),
        )
        .arg(
            Arg::new(ARG_EMAIL_CODE_TTL)
                .long(ARG_EMAIL_CODE_TTL)
                .help("Email two-factor code TTL in seconds")
                .env("INVENTARIA_EMAIL_CODE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_EMAIL_CODE_COOLDOWN)
                .long(ARG_EMAIL_CODE_COOLDOWN)
                .help("Cooldown before a new email code can be requested")
                .env("INVENTARIA_EMAIL_CODE_RESEND_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_POLL)
                .long(ARG_OUTBOX_POLL)
                .help("Email outbox poll interval in seconds")
                .env("INVENTARIA_EMAIL_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_BATCH)
                .long(ARG_OUTBOX_BATCH)
                .help("Email outbox batch size per poll")
                .env("INVENTARIA_EMAIL_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_OUTBOX_MAX_ATTEMPTS)
                .long(ARG_OUTBOX_MAX_ATTEMPTS)
                .help("Max attempts before marking an email as failed")
                .env("INVENTARIA_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub email_code_ttl_seconds: i64,
    pub email_code_resend_cooldown_seconds: i64,
    pub outbox_poll_seconds: u64,
    pub outbox_batch_size: usize,
    pub outbox_max_attempts: u32,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .context("missing required argument: --frontend-base-url")?,
            email_code_ttl_seconds: matches
                .get_one::<i64>(ARG_EMAIL_CODE_TTL)
                .copied()
                .unwrap_or(300),
            email_code_resend_cooldown_seconds: matches
                .get_one::<i64>(ARG_EMAIL_CODE_COOLDOWN)
                .copied()
                .unwrap_or(60),
            outbox_poll_seconds: matches.get_one::<u64>(ARG_OUTBOX_POLL).copied().unwrap_or(5),
            outbox_batch_size: matches
                .get_one::<usize>(ARG_OUTBOX_BATCH)
                .copied()
                .unwrap_or(10),
            outbox_max_attempts: matches
                .get_one::<u32>(ARG_OUTBOX_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(5),
        })
    }
}
