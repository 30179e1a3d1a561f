use thiserror::Error;

/// Errors produced by the encryption layer.
///
/// Note that text decryption deliberately does NOT use this type: a failed
/// decrypt renders as a sentinel string instead of propagating an error.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,
}
