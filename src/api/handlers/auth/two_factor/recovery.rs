//! Recovery key generation and verification.
//!
//! Recovery keys let a user back out of a lost authenticator or unreachable
//! mailbox. Keys are Argon2id-hashed with a server-side pepper and each key is
//! single use; consumption happens in storage.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng as HashOsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::{rngs::OsRng, RngCore};

const RECOVERY_KEY_COUNT: usize = 8;
const RECOVERY_KEY_LEN: usize = 12;
const RECOVERY_KEY_GROUP_SIZE: usize = 4;
// No 0/O/1/I to keep hand-typed keys unambiguous
const RECOVERY_KEY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated recovery-key set (plaintext + hashes).
#[derive(Debug)]
pub struct RecoveryKeySet {
    pub keys: Vec<String>,
    pub key_hashes: Vec<String>,
}

impl RecoveryKeySet {
    /// Generate a new recovery-key set using the provided pepper.
    pub fn generate(pepper: &[u8]) -> Result<Self> {
        let mut rng = OsRng;
        Self::generate_with_rng(&mut rng, pepper)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R, pepper: &[u8]) -> Result<Self> {
        let mut keys = Vec::with_capacity(RECOVERY_KEY_COUNT);
        let mut key_hashes = Vec::with_capacity(RECOVERY_KEY_COUNT);
        for _ in 0..RECOVERY_KEY_COUNT {
            let key = generate_key(rng)?;
            let hash = hash_recovery_key(&key, pepper)?;
            keys.push(key);
            key_hashes.push(hash);
        }
        Ok(Self { keys, key_hashes })
    }
}

/// Normalize a recovery key for verification.
pub fn normalize_recovery_key(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != RECOVERY_KEY_LEN {
        return Err(anyhow::anyhow!("invalid recovery key length"));
    }

    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| RECOVERY_KEY_ALPHABET.contains(ch))
    {
        return Err(anyhow::anyhow!("invalid recovery key characters"));
    }

    Ok(normalized)
}

/// Format a normalized recovery key for display.
pub fn format_recovery_key(normalized: &str) -> Result<String> {
    if normalized.len() != RECOVERY_KEY_LEN {
        return Err(anyhow::anyhow!("invalid recovery key length"));
    }
    let mut out = String::with_capacity(RECOVERY_KEY_LEN + 2);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(RECOVERY_KEY_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid recovery key chunk")?);
    }
    Ok(out)
}

/// Verify a recovery key against a stored hash.
///
/// A submitted key that does not normalize (wrong length, ambiguous
/// character) cannot match any stored hash; that is a mismatch, not an error.
pub fn verify_recovery_key(key: &str, stored_hash: &str, pepper: &[u8]) -> Result<bool> {
    let Ok(normalized) = normalize_recovery_key(key) else {
        return Ok(false);
    };
    let parsed =
        PasswordHash::new(stored_hash).map_err(|_| anyhow::anyhow!("invalid recovery key hash"))?;
    let argon2 = Argon2::new_with_secret(
        pepper,
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::default(),
    )
    .map_err(|_| anyhow::anyhow!("failed to initialize Argon2id"))?;
    Ok(argon2
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok())
}

/// Generate a single recovery key in grouped form.
fn generate_key<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; RECOVERY_KEY_LEN];
    rng.fill_bytes(&mut raw);
    let mut normalized = String::with_capacity(RECOVERY_KEY_LEN);
    for byte in raw {
        let idx = usize::from(byte) % RECOVERY_KEY_ALPHABET.len();
        if let Some(&char_byte) = RECOVERY_KEY_ALPHABET.get(idx) {
            normalized.push(char_byte as char);
        }
    }
    format_recovery_key(&normalized)
}

/// Hash a recovery key using Argon2id with the server-side pepper.
fn hash_recovery_key(key: &str, pepper: &[u8]) -> Result<String> {
    let normalized = normalize_recovery_key(key)?;
    let salt = SaltString::generate(&mut HashOsRng);
    let argon2 = Argon2::new_with_secret(
        pepper,
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::default(),
    )
    .map_err(|_| anyhow::anyhow!("failed to initialize Argon2id"))?;
    let hash = argon2
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| anyhow::anyhow!("failed to hash recovery key"))?
        .to_string();
    Ok(hash)
}
