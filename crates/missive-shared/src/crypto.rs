//! Per-room symmetric encryption for message bodies.
//!
//! Each chat can hold one `RoomSecret`, generated by one member and shared
//! out-of-band via the portable base64 export.  The secret never touches
//! the document store; only ciphertext and nonces are persisted.
//!
//! Decryption is infallible by design: a wrong key or corrupted input
//! renders as the [`DECRYPT_FAILED`](crate::constants::DECRYPT_FAILED)
//! sentinel so a bad secret can never crash message rendering.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

use crate::constants::{DECRYPT_FAILED, NONCE_SIZE, SECRET_SIZE};
use crate::error::CryptoError;

/// Symmetric key material for one room. Never serialized into the store.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomSecret([u8; SECRET_SIZE]);

impl std::fmt::Debug for RoomSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        write!(f, "RoomSecret(..)")
    }
}

/// Encrypted message body as persisted: base64 ciphertext plus base64
/// nonce. An empty `iv` marks a plaintext (degraded-mode) body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedText {
    pub value: String,
    pub iv: String,
}

pub fn generate_secret() -> RoomSecret {
    let mut key = [0u8; SECRET_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    RoomSecret(key)
}

/// Serialize a secret to its portable encoding for out-of-band exchange.
pub fn export_secret(secret: &RoomSecret) -> String {
    BASE64.encode(secret.0)
}

/// Inverse of [`export_secret`]. `None` on malformed input.
pub fn import_secret(encoded: &str) -> Option<RoomSecret> {
    let bytes = BASE64.decode(encoded).ok()?;
    let key: [u8; SECRET_SIZE] = bytes.try_into().ok()?;
    Some(RoomSecret(key))
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt a message body with a fresh random nonce.
///
/// A `None` secret is the explicit degraded mode: the plaintext passes
/// through untouched with an empty `iv`, so rooms without a shared secret
/// keep working.
pub fn encrypt_text(plaintext: &str, secret: Option<&RoomSecret>) -> EncryptedText {
    let secret = match secret {
        Some(s) => s,
        None => {
            return EncryptedText {
                value: plaintext.to_string(),
                iv: String::new(),
            }
        }
    };

    match encrypt_raw(secret, plaintext.as_bytes()) {
        Ok((ciphertext, nonce)) => EncryptedText {
            value: BASE64.encode(ciphertext),
            iv: BASE64.encode(nonce),
        },
        // AES-GCM encryption of in-memory data only fails on absurd input
        // lengths; fall back to plaintext rather than losing the message.
        Err(_) => EncryptedText {
            value: plaintext.to_string(),
            iv: String::new(),
        },
    }
}

/// Decrypt a persisted message body.
///
/// An empty `iv` or missing secret means the body was stored in the clear
/// and passes through. Every failure path returns the fixed sentinel.
pub fn decrypt_text(value: &str, iv: &str, secret: Option<&RoomSecret>) -> String {
    if iv.is_empty() || value.is_empty() {
        return value.to_string();
    }
    let secret = match secret {
        Some(s) => s,
        None => return value.to_string(),
    };

    let decrypt = || -> Result<String, CryptoError> {
        let nonce = BASE64
            .decode(iv)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let ciphertext = BASE64
            .decode(value)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let plaintext = decrypt_raw(secret, &ciphertext, &nonce)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    };

    decrypt().unwrap_or_else(|_| DECRYPT_FAILED.to_string())
}

fn encrypt_raw(
    secret: &RoomSecret,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_SIZE]), CryptoError> {
    let cipher = Aes256Gcm::new(&secret.0.into());
    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok((ciphertext, nonce_bytes))
}

fn decrypt_raw(
    secret: &RoomSecret,
    ciphertext: &[u8],
    nonce: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let cipher = Aes256Gcm::new(&secret.0.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let secret = generate_secret();
        let encrypted = encrypt_text("salut, ça va?", Some(&secret));
        assert!(!encrypted.iv.is_empty());
        assert_ne!(encrypted.value, "salut, ça va?");

        let decrypted = decrypt_text(&encrypted.value, &encrypted.iv, Some(&secret));
        assert_eq!(decrypted, "salut, ça va?");
    }

    #[test]
    fn test_roundtrip_empty_and_multibyte() {
        let secret = generate_secret();

        let empty = encrypt_text("", Some(&secret));
        assert_eq!(decrypt_text(&empty.value, &empty.iv, Some(&secret)), "");

        let text = "日本語 🦀 emoji";
        let enc = encrypt_text(text, Some(&secret));
        assert_eq!(decrypt_text(&enc.value, &enc.iv, Some(&secret)), text);
    }

    #[test]
    fn test_no_secret_passes_through() {
        let enc = encrypt_text("plain", None);
        assert_eq!(enc.value, "plain");
        assert_eq!(enc.iv, "");
        assert_eq!(decrypt_text(&enc.value, &enc.iv, None), "plain");
    }

    #[test]
    fn test_wrong_key_returns_sentinel() {
        let enc = encrypt_text("secret message", Some(&generate_secret()));
        let other = generate_secret();
        assert_eq!(
            decrypt_text(&enc.value, &enc.iv, Some(&other)),
            DECRYPT_FAILED
        );
    }

    #[test]
    fn test_corrupted_ciphertext_returns_sentinel() {
        let secret = generate_secret();
        let enc = encrypt_text("important", Some(&secret));
        assert_eq!(
            decrypt_text("definitely not base64!!!", &enc.iv, Some(&secret)),
            DECRYPT_FAILED
        );

        let mut bytes = BASE64.decode(&enc.value).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered = BASE64.encode(bytes);
        assert_eq!(
            decrypt_text(&tampered, &enc.iv, Some(&secret)),
            DECRYPT_FAILED
        );
    }

    #[test]
    fn test_export_import_roundtrip() {
        let secret = generate_secret();
        let exported = export_secret(&secret);
        let imported = import_secret(&exported).unwrap();
        assert_eq!(secret, imported);
    }

    #[test]
    fn test_import_malformed_returns_none() {
        assert!(import_secret("not base64 at all §§§").is_none());
        assert!(import_secret(&BASE64.encode([0u8; 16])).is_none());
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let secret = generate_secret();
        let a = encrypt_text("same text", Some(&secret));
        let b = encrypt_text("same text", Some(&secret));
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.value, b.value);
    }
}
