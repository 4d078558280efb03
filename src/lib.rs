//! # Inventaria authentication service
//!
//! `inventaria` is the authentication backend for the collection inventory
//! management system. The inventory CRUD, image pipeline, and rendering
//! frontends are separate services; this crate owns the token-based
//! authentication API they consume.
//!
//! ## Login & Two-Factor Flow
//!
//! 1) A client submits email + password to acquire an opaque API token.
//! 2) If the account has a second factor enrolled (TOTP authenticator app,
//!    emailed codes, or both), the server answers with a challenge instead of
//!    a token. Nothing about the challenge is stored server-side: the client
//!    keeps the submitted credentials and resubmits them together with the
//!    verification code.
//! 3) The two-factor gate checks TOTP first, then the emailed code, and
//!    reports a single uniform failure when neither matches.
//!
//! The same gate guards the password-change endpoint, so a stolen session
//! cannot rotate the password without a fresh code.
//!
//! ## Security boundaries
//!
//! - Raw API tokens and emailed codes are never stored; only SHA-256 digests.
//! - TOTP secrets are sealed with ChaCha20-Poly1305 before they touch the
//!   database; a record that fails to unseal is treated as a failed
//!   verification, never as a server error.
//! - Recovery keys are Argon2id-hashed with a server-side pepper and are
//!   single use.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
