//! RFC-6238 code verification against a stored base32 secret.
//!
//! Legacy rows can hold secrets that are not valid base32 or are shorter than
//! the RFC minimum. Every malformed-secret path is reported as an `Err` so the
//! gate can downgrade it to a failed attempt instead of a server error.

use anyhow::Result;
use totp_rs::{Algorithm, Secret, TOTP};

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// Check a submitted code against a base32-encoded secret.
///
/// Accepts codes from the current step plus one step of clock drift either
/// way. A wrong code is `Ok(false)`.
///
/// # Errors
/// Returns an error when the secret cannot be decoded or is too short for
/// RFC 6238, or when the system clock is unavailable.
pub fn verify_code(secret_base32: &str, code: &str) -> Result<bool> {
    let secret_bytes = Secret::Encoded(secret_base32.trim().to_string())
        .to_bytes()
        .map_err(|e| anyhow::anyhow!("invalid base32 secret: {e:?}"))?;

    let totp = TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP,
        secret_bytes,
    )
    .map_err(|e| anyhow::anyhow!("unusable totp secret: {e}"))?;

    totp.check_current(code)
        .map_err(|e| anyhow::anyhow!("system clock error: {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::verify_code;
    use totp_rs::{Algorithm, Secret, TOTP};

    const SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

    fn current_code() -> String {
        let secret_bytes = Secret::Encoded(SECRET.to_string()).to_bytes().unwrap();
        let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, secret_bytes).unwrap();
        totp.generate_current().unwrap()
    }

    #[test]
    fn accepts_current_code() {
        assert!(verify_code(SECRET, &current_code()).unwrap());
    }

    #[test]
    fn rejects_wrong_code() {
        let code = current_code();
        let wrong = if code == "000000" { "000001" } else { "000000" };
        assert!(!verify_code(SECRET, wrong).unwrap());
    }

    #[test]
    fn short_secret_is_an_error_not_a_panic() {
        // 10 decoded bytes, below the RFC 6238 minimum of 128 bits
        assert!(verify_code("2OTD3XWE6GGU6QVP", "123456").is_err());
    }

    #[test]
    fn invalid_base32_is_an_error() {
        assert!(verify_code("not base32 at all!", "123456").is_err());
    }

    #[test]
    fn empty_secret_is_an_error() {
        assert!(verify_code("", "123456").is_err());
    }
}
