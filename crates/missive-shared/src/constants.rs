/// Room secret size in bytes (AES-256-GCM key)
pub const SECRET_SIZE: usize = 32;

/// AES-GCM nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// Sentinel rendered in place of a message body that failed to decrypt.
/// Part of the external contract: decryption failure must never crash
/// message rendering.
pub const DECRYPT_FAILED: &str = "[Unable to decrypt]";

/// Text written into a message that was deleted for everyone.
pub const REMOVED_MESSAGE_TEXT: &str = "Message removed";

/// Preview text used when a message carries media but no text.
pub const MEDIA_PREVIEW_TEXT: &str = "Media";

/// Default STUN servers for call negotiation
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Maximum length of the sanitized username seed
pub const USERNAME_SEED_MAX: usize = 20;

/// How many leading uid characters are appended to a generated username
pub const USERNAME_UID_SUFFIX: usize = 5;
