//! Sealing of stored TOTP secrets.
//!
//! Secrets are encrypted with ChaCha20-Poly1305 before they reach the
//! database. The AAD binds the ciphertext to the owning user, so a row copied
//! onto another account fails to open.

use anyhow::Result;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

const NONCE_LEN: usize = 12;

/// Encrypts the TOTP secret under the sealing key.
/// Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn seal_secret(key: &[u8], secret: &[u8], user_id: Uuid) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = construct_aad(user_id);
    let payload = Payload {
        msg: secret,
        aad: &aad,
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts a sealed TOTP secret.
/// Expects `data` to be `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if decryption fails or if the ciphertext is too short.
pub fn open_secret(key: &[u8], data: &[u8], user_id: Uuid) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(anyhow::anyhow!("invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let aad = construct_aad(user_id);
    let payload = Payload {
        msg: ciphertext,
        aad: &aad,
    };

    let plaintext = cipher
        .decrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("decryption failure: {e}"))?;

    Ok(plaintext)
}

fn construct_aad(user_id: Uuid) -> Vec<u8> {
    // AAD = "totp-secret:v1|user_id"
    format!("totp-secret:v1|{user_id}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn seal_open_round_trip() {
        let key = [42u8; 32];
        let secret = b"JBSWY3DPEHPK3PXP";
        let user_id = Uuid::new_v4();

        let sealed = seal_secret(&key, secret, user_id).unwrap();
        assert_ne!(sealed, secret);
        assert!(sealed.len() > secret.len());

        let opened = open_secret(&key, &sealed, user_id).unwrap();
        assert_eq!(opened, secret);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn open_fails_for_other_user() {
        let key = [42u8; 32];
        let sealed = seal_secret(&key, b"secret", Uuid::new_v4()).unwrap();
        assert!(open_secret(&key, &sealed, Uuid::new_v4()).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn open_fails_on_tampered_ciphertext() {
        let key = [42u8; 32];
        let user_id = Uuid::new_v4();
        let mut sealed = seal_secret(&key, b"secret", user_id).unwrap();

        let len = sealed.len();
        if let Some(byte) = sealed.get_mut(len - 1) {
            *byte ^= 0xFF;
        }

        assert!(open_secret(&key, &sealed, user_id).is_err());
    }

    #[test]
    fn open_rejects_short_input() {
        let key = [42u8; 32];
        assert!(open_secret(&key, &[0u8; 4], Uuid::new_v4()).is_err());
    }
}
