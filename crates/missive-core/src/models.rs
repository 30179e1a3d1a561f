//! Persisted record shapes.
//!
//! Field names are part of the external store contract and are preserved
//! byte-for-byte (`memberIds`, `pinnedMessageId`, `deletedForEveryone`,
//! `sdpMLineIndex`, ...).  Timestamps are persisted as epoch milliseconds
//! so the store can order by them.

use std::collections::BTreeMap;

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use missive_shared::types::{ChatId, MessageId, UserId};
use missive_store::{Document, Fields};

use crate::Result;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// One user's directory entry, mutated by the owner and by presence
/// heartbeats. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserId,
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "photoURL", default)]
    pub photo_url: String,
    /// Unique handle: lowercase, `[a-z0-9_]`, generated on first sign-in.
    pub username: String,
    #[serde(default)]
    pub about: String,
    #[serde(with = "ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    pub online: bool,
    #[serde(default)]
    pub blocked_users: Vec<UserId>,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberMeta {
    pub is_admin: bool,
}

/// A conversation (1:1 or group). Direct chats use the deterministic
/// sorted-member-pair id; groups get a generated one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub is_group: bool,
    pub title: String,
    #[serde(rename = "photoURL", default)]
    pub photo_url: String,
    pub member_ids: Vec<UserId>,
    /// Per-member metadata keyed by uid. Last write wins per key.
    #[serde(default)]
    pub member_meta: BTreeMap<String, MemberMeta>,
    /// Empty string = nothing pinned.
    #[serde(default)]
    pub pinned_message_id: String,
    /// Per-member typing flags keyed by uid.
    #[serde(default)]
    pub typing: BTreeMap<String, bool>,
    /// Per-member draft text keyed by uid.
    #[serde(default)]
    pub draft_by_user: BTreeMap<String, String>,
    #[serde(default)]
    pub last_message: String,
    #[serde(default, with = "ts_milliseconds_option")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescriptor {
    pub url: String,
    pub name: String,
    pub content_type: String,
}

/// Poll attached to a message. `votes` is keyed by the option index as a
/// string; `voters` records each voter's chosen index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Poll {
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub votes: BTreeMap<String, i64>,
    #[serde(default)]
    pub voters: BTreeMap<String, usize>,
}

impl Poll {
    /// A fresh poll with every option's counter at zero.
    pub fn new(question: impl Into<String>, options: Vec<String>) -> Self {
        let votes = (0..options.len()).map(|i| (i.to_string(), 0)).collect();
        Self {
            question: question.into(),
            options,
            votes,
            voters: BTreeMap::new(),
        }
    }

    pub fn total_votes(&self) -> i64 {
        self.votes.values().sum()
    }
}

/// One message, owned by exactly one chat. The document id is injected on
/// decode and never written as a field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing)]
    pub id: MessageId,
    /// Plaintext, or base64 ciphertext when `iv` is non-empty.
    #[serde(default)]
    pub text: String,
    /// Base64 AES-GCM nonce; empty marks a plaintext body.
    #[serde(default)]
    pub iv: String,
    #[serde(default)]
    pub media: Option<MediaDescriptor>,
    pub sender_id: UserId,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "ts_milliseconds_option")]
    pub edited_at: Option<DateTime<Utc>>,
    /// Viewers who removed this message for themselves only.
    #[serde(default)]
    pub deleted_for: Vec<UserId>,
    #[serde(default)]
    pub deleted_for_everyone: bool,
    #[serde(default)]
    pub read_by: Vec<UserId>,
    #[serde(default)]
    pub delivered_to: Vec<UserId>,
    #[serde(default)]
    pub starred_by: Vec<UserId>,
    /// uid -> emoji; at most one active reaction per user.
    #[serde(default)]
    pub reactions: BTreeMap<String, String>,
    /// Empty string = not a reply.
    #[serde(default)]
    pub reply_to_id: String,
    #[serde(default)]
    pub poll: Option<Poll>,
    /// Chat id this message was forwarded from; empty = original.
    #[serde(default)]
    pub forwarded_from: String,
}

impl Message {
    pub fn is_visible_to(&self, viewer: &UserId) -> bool {
        !self.deleted_for.contains(viewer)
    }
}

// ---------------------------------------------------------------------------
// Call signaling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A media-session description as exchanged over the signaling record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// One trickled network candidate, appended to a per-side candidate log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Active,
    Ended,
}

/// Ephemeral signaling record; deleted outright when the call ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub caller_id: UserId,
    pub callee_id: UserId,
    pub offer: SessionDescription,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
    pub status: CallStatus,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store conversion helpers
// ---------------------------------------------------------------------------

/// Serialize a record to store fields.
pub fn to_fields<T: Serialize>(record: &T) -> Result<Fields> {
    use serde::ser::Error as _;

    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(serde_json::Error::custom("record is not an object").into()),
    }
}

/// Decode a document into a record, injecting the document id.
pub fn decode<T: DeserializeOwned>(doc: &Document) -> Result<T> {
    Ok(serde_json::from_value(doc.to_value_with_id())?)
}
