//! Key material arguments.
//!
//! The TOTP sealing key is a 32-byte ChaCha20-Poly1305 key supplied as
//! standard base64. The recovery pepper is an opaque string mixed into
//! recovery key hashes; rotating it invalidates all issued recovery keys.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Arg, ArgMatches, Command};

pub const ARG_TOTP_SEALING_KEY: &str = "totp-sealing-key";
pub const ARG_RECOVERY_PEPPER: &str = "recovery-pepper";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOTP_SEALING_KEY)
                .long(ARG_TOTP_SEALING_KEY)
                .help("Base64 encoded 32-byte key used to seal TOTP secrets at rest")
                .env("INVENTARIA_TOTP_SEALING_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_RECOVERY_PEPPER)
                .long(ARG_RECOVERY_PEPPER)
                .help("Server-side pepper mixed into recovery key hashes")
                .env("INVENTARIA_RECOVERY_PEPPER")
                .hide_env_values(true)
                .required(true),
        )
}

#[derive(Debug)]
pub struct Options {
    pub totp_sealing_key: [u8; 32],
    pub recovery_pepper: Vec<u8>,
}

impl Options {
    /// # Errors
    /// Returns an error if the sealing key is not valid base64 or not 32 bytes.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let encoded = matches
            .get_one::<String>(ARG_TOTP_SEALING_KEY)
            .context("missing required argument: --totp-sealing-key")?;
        let decoded = STANDARD
            .decode(encoded)
            .context("totp-sealing-key is not valid base64")?;
        let totp_sealing_key: [u8; 32] = decoded
            .try_into()
            .map_err(|bytes: Vec<u8>| {
                anyhow!(
                    "totp-sealing-key must decode to 32 bytes, got {}",
                    bytes.len()
                )
            })?;

        let recovery_pepper = matches
            .get_one::<String>(ARG_RECOVERY_PEPPER)
            .context("missing required argument: --recovery-pepper")?
            .as_bytes()
            .to_vec();

        Ok(Self {
            totp_sealing_key,
            recovery_pepper,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    fn matches_with_key(key: &str) -> ArgMatches {
        commands::new().get_matches_from(vec![
            "inventaria",
            "--dsn",
            "postgres://localhost/inventaria",
            "--totp-sealing-key",
            key,
            "--recovery-pepper",
            "pepper",
        ])
    }

    #[test]
    fn parse_accepts_32_byte_key() {
        let encoded = STANDARD.encode([7u8; 32]);
        let matches = matches_with_key(&encoded);
        let options = Options::parse(&matches).unwrap();
        assert_eq!(options.totp_sealing_key, [7u8; 32]);
        assert_eq!(options.recovery_pepper, b"pepper");
    }

    #[test]
    fn parse_rejects_short_key() {
        let encoded = STANDARD.encode([7u8; 16]);
        let matches = matches_with_key(&encoded);
        let err = Options::parse(&matches).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn parse_rejects_invalid_base64() {
        let matches = matches_with_key("not base64 at all!!!");
        assert!(Options::parse(&matches).is_err());
    }
}
