//! The message mutation protocol.
//!
//! Every operation is a named, field-level mutation against the store;
//! whole-document rewrites never happen after creation, so concurrent
//! operations on disjoint fields cannot conflict.
//!
//! Operations fall into two categories with different failure handling:
//! content-affecting operations (send, edit, delete, ...) return `Result`
//! and surface store failures; ambient updates (typing, drafts, read
//! receipts) are fire-and-forget and only log.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use missive_shared::constants::{MEDIA_PREVIEW_TEXT, REMOVED_MESSAGE_TEXT};
use missive_shared::crypto::{self, RoomSecret};
use missive_shared::types::{ChatId, MessageId, UserId};
use missive_store::{Deltas, DocumentStore, FieldDelta};

use crate::models::{
    decode, to_fields, Chat, MediaDescriptor, MemberMeta, Message, Poll, UserProfile,
};
use crate::paths;
use crate::{CoreError, Result};

/// Content of a message about to be sent.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub text: String,
    pub media: Option<MediaDescriptor>,
    pub reply_to: Option<MessageId>,
    pub poll: Option<Poll>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// All chat and message mutations issued on behalf of one local user.
#[derive(Clone)]
pub struct ChatOps {
    store: Arc<dyn DocumentStore>,
    local_user: UserId,
}

impl ChatOps {
    pub fn new(store: Arc<dyn DocumentStore>, local_user: UserId) -> Self {
        Self { store, local_user }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    // -- chat creation ------------------------------------------------------

    /// Open (creating if needed) the 1:1 chat with `target`. The id is
    /// deterministic, so both sides converge on the same document.
    pub async fn start_direct_chat(&self, target: &UserProfile) -> Result<ChatId> {
        let chat_id = ChatId::direct(&self.local_user, &target.uid);
        if self.store.get(&paths::chats(), chat_id.as_str()).await?.is_some() {
            return Ok(chat_id);
        }

        let now = Utc::now();
        let mut member_meta = BTreeMap::new();
        member_meta.insert(self.local_user.0.clone(), MemberMeta { is_admin: true });
        member_meta.insert(target.uid.0.clone(), MemberMeta { is_admin: false });

        let chat = Chat {
            id: chat_id.clone(),
            is_group: false,
            title: target.display_name.clone(),
            photo_url: target.photo_url.clone(),
            member_ids: vec![self.local_user.clone(), target.uid.clone()],
            member_meta,
            pinned_message_id: String::new(),
            typing: BTreeMap::new(),
            draft_by_user: BTreeMap::new(),
            last_message: String::new(),
            last_message_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store
            .set(&paths::chats(), chat_id.as_str(), to_fields(&chat)?)
            .await?;

        info!(chat = %chat_id, "direct chat created");
        Ok(chat_id)
    }

    /// Create a group chat. The caller is always a member and the sole
    /// admin; duplicate member ids are collapsed.
    pub async fn create_group(&self, title: &str, members: &[UserId]) -> Result<ChatId> {
        let chat_id = ChatId::generate();
        let now = Utc::now();

        let mut member_ids = vec![self.local_user.clone()];
        for uid in members {
            if !member_ids.contains(uid) {
                member_ids.push(uid.clone());
            }
        }
        let member_meta = member_ids
            .iter()
            .map(|uid| {
                (
                    uid.0.clone(),
                    MemberMeta {
                        is_admin: *uid == self.local_user,
                    },
                )
            })
            .collect();

        let chat = Chat {
            id: chat_id.clone(),
            is_group: true,
            title: title.to_string(),
            photo_url: String::new(),
            member_ids,
            member_meta,
            pinned_message_id: String::new(),
            typing: BTreeMap::new(),
            draft_by_user: BTreeMap::new(),
            last_message: String::new(),
            last_message_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store
            .set(&paths::chats(), chat_id.as_str(), to_fields(&chat)?)
            .await?;

        info!(chat = %chat_id, members = chat.member_ids.len(), "group created");
        Ok(chat_id)
    }

    // -- sending ------------------------------------------------------------

    /// Append a new message and update the parent chat's preview fields in
    /// one delta (which also clears the sender's typing flag and draft).
    ///
    /// When `secret` is given the body is encrypted; the chat-list preview
    /// still carries the plaintext-derived summary, matching the source
    /// system (room secrecy covers message bodies, not previews).
    pub async fn send_message(
        &self,
        chat: &ChatId,
        draft: OutgoingMessage,
        secret: Option<&RoomSecret>,
    ) -> Result<MessageId> {
        let now = Utc::now();
        let encrypted = crypto::encrypt_text(&draft.text, secret);

        let preview = if !draft.text.is_empty() {
            draft.text.clone()
        } else if let Some(media) = &draft.media {
            media.name.clone()
        } else if let Some(poll) = &draft.poll {
            poll.question.clone()
        } else {
            MEDIA_PREVIEW_TEXT.to_string()
        };

        let message = Message {
            id: MessageId::default(),
            text: encrypted.value,
            iv: encrypted.iv,
            media: draft.media,
            sender_id: self.local_user.clone(),
            created_at: now,
            edited_at: None,
            deleted_for: Vec::new(),
            deleted_for_everyone: false,
            read_by: vec![self.local_user.clone()],
            delivered_to: vec![self.local_user.clone()],
            starred_by: Vec::new(),
            reactions: BTreeMap::new(),
            reply_to_id: draft.reply_to.map(|m| m.0).unwrap_or_default(),
            poll: draft.poll,
            forwarded_from: String::new(),
        };

        let id = self
            .store
            .add(&paths::messages(chat), to_fields(&message)?)
            .await?;

        self.store
            .update(
                &paths::chats(),
                chat.as_str(),
                Deltas::new()
                    .set("lastMessage", preview)
                    .set("lastMessageAt", now.timestamp_millis())
                    .set("updatedAt", now.timestamp_millis())
                    .map_entry("typing", self.local_user.0.clone(), FieldDelta::Set(json!(false)))
                    .map_entry(
                        "draftByUser",
                        self.local_user.0.clone(),
                        FieldDelta::Set(json!("")),
                    ),
            )
            .await?;

        debug!(chat = %chat, message = %id, "message sent");
        Ok(MessageId(id))
    }

    /// Send a message carrying a freshly zero-initialized poll.
    pub async fn create_poll(
        &self,
        chat: &ChatId,
        question: &str,
        options: Vec<String>,
    ) -> Result<MessageId> {
        let draft = OutgoingMessage {
            poll: Some(Poll::new(question, options)),
            ..Default::default()
        };
        self.send_message(chat, draft, None).await
    }

    // -- editing and deletion ----------------------------------------------

    /// Edit a message body. Only the sender may edit, and hard-deleted
    /// messages refuse further mutation.
    pub async fn edit_message(
        &self,
        chat: &ChatId,
        message: &MessageId,
        text: &str,
        secret: Option<&RoomSecret>,
    ) -> Result<()> {
        let current = self.read_message_guarded(chat, message).await?;
        if current.sender_id != self.local_user {
            return Err(CoreError::NotOwner);
        }

        let encrypted = crypto::encrypt_text(text, secret);
        self.store
            .update(
                &paths::messages(chat),
                message.as_str(),
                Deltas::new()
                    .set("text", encrypted.value)
                    .set("iv", encrypted.iv)
                    .set("editedAt", Utc::now().timestamp_millis()),
            )
            .await?;
        Ok(())
    }

    /// Delete a message. `for_everyone` (sender only) is irreversible and
    /// visible to all members; otherwise the message is hidden from the
    /// caller alone.
    pub async fn delete_message(
        &self,
        chat: &ChatId,
        message: &MessageId,
        for_everyone: bool,
    ) -> Result<()> {
        if for_everyone {
            let current = self.read_message_guarded(chat, message).await?;
            if current.sender_id != self.local_user {
                return Err(CoreError::NotOwner);
            }
            self.store
                .update(
                    &paths::messages(chat),
                    message.as_str(),
                    Deltas::new()
                        .set("deletedForEveryone", true)
                        .set("text", REMOVED_MESSAGE_TEXT)
                        .set("iv", "")
                        .set("media", Value::Null),
                )
                .await?;
        } else {
            self.store
                .update(
                    &paths::messages(chat),
                    message.as_str(),
                    Deltas::new().array_union("deletedFor", self.local_user.as_str()),
                )
                .await?;
        }
        Ok(())
    }

    // -- reactions, stars, pins --------------------------------------------

    /// Toggle the caller's star. The pre-toggle state is derived from the
    /// latest stored document rather than trusted from the caller; returns
    /// the new starred state.
    pub async fn toggle_star(&self, chat: &ChatId, message: &MessageId) -> Result<bool> {
        let current = self.read_message_guarded(chat, message).await?;
        let starred = current.starred_by.contains(&self.local_user);

        let deltas = if starred {
            Deltas::new().array_remove("starredBy", self.local_user.as_str())
        } else {
            Deltas::new().array_union("starredBy", self.local_user.as_str())
        };
        self.store
            .update(&paths::messages(chat), message.as_str(), deltas)
            .await?;
        Ok(!starred)
    }

    /// Upsert the caller's reaction: at most one emoji per user, last
    /// write wins. (There is no operation to clear a reaction.)
    pub async fn react(&self, chat: &ChatId, message: &MessageId, emoji: &str) -> Result<()> {
        self.read_message_guarded(chat, message).await?;
        self.store
            .update(
                &paths::messages(chat),
                message.as_str(),
                Deltas::new().map_entry(
                    "reactions",
                    self.local_user.0.clone(),
                    FieldDelta::Set(json!(emoji)),
                ),
            )
            .await?;
        Ok(())
    }

    /// Pin a message on the chat, or clear the pin with `None`.
    pub async fn pin_message(&self, chat: &ChatId, message: Option<&MessageId>) -> Result<()> {
        let pinned = message.map(|m| m.0.clone()).unwrap_or_default();
        self.store
            .update(
                &paths::chats(),
                chat.as_str(),
                Deltas::new()
                    .set("pinnedMessageId", pinned)
                    .set("updatedAt", Utc::now().timestamp_millis()),
            )
            .await?;
        Ok(())
    }

    pub async fn clear_pin(&self, chat: &ChatId) -> Result<()> {
        self.pin_message(chat, None).await
    }

    // -- polls --------------------------------------------------------------

    /// Record the caller's vote: increments the chosen option's counter
    /// and stores the choice.
    ///
    /// Known quirk carried over from the source system: re-voting does NOT
    /// decrement the previously chosen option, so a voter who changes
    /// their mind double-counts in the totals.
    pub async fn vote_poll(
        &self,
        chat: &ChatId,
        message: &MessageId,
        option_index: usize,
    ) -> Result<()> {
        let current = self.read_message_guarded(chat, message).await?;
        let valid = current
            .poll
            .as_ref()
            .is_some_and(|poll| option_index < poll.options.len());
        if !valid {
            return Err(CoreError::InvalidPollOption(option_index));
        }

        let mut votes = BTreeMap::new();
        votes.insert(option_index.to_string(), FieldDelta::Increment(1));
        let mut voters = BTreeMap::new();
        voters.insert(
            self.local_user.0.clone(),
            FieldDelta::Set(json!(option_index)),
        );

        self.store
            .update(
                &paths::messages(chat),
                message.as_str(),
                Deltas::new()
                    .map_entry("poll", "votes", FieldDelta::MapMerge(votes))
                    .map_entry("poll", "voters", FieldDelta::MapMerge(voters)),
            )
            .await?;
        Ok(())
    }

    // -- forwarding ---------------------------------------------------------

    /// Copy a message into another chat as a new, independent message:
    /// fresh id and timestamp, read/delivered reset to the forwarder,
    /// per-viewer state cleared, `forwardedFrom` pointing back at the
    /// source chat. The original sender is retained.
    pub async fn forward_message(
        &self,
        source_chat: &ChatId,
        message: &MessageId,
        target_chat: &ChatId,
    ) -> Result<MessageId> {
        let source = self.read_message_guarded(source_chat, message).await?;
        let now = Utc::now();

        let copy = Message {
            id: MessageId::default(),
            created_at: now,
            edited_at: None,
            deleted_for: Vec::new(),
            deleted_for_everyone: false,
            read_by: vec![self.local_user.clone()],
            delivered_to: vec![self.local_user.clone()],
            starred_by: Vec::new(),
            reactions: BTreeMap::new(),
            reply_to_id: String::new(),
            forwarded_from: source_chat.0.clone(),
            ..source
        };
        let id = self
            .store
            .add(&paths::messages(target_chat), to_fields(&copy)?)
            .await?;
        Ok(MessageId(id))
    }

    // -- ambient (fire-and-forget) -----------------------------------------

    /// Idempotently add the caller to a message's read set. Best-effort:
    /// a failed receipt never interrupts the user.
    pub async fn mark_read(&self, chat: &ChatId, message: &MessageId) {
        let result = self
            .store
            .update(
                &paths::messages(chat),
                message.as_str(),
                Deltas::new().array_union("readBy", self.local_user.as_str()),
            )
            .await;
        if let Err(e) = result {
            debug!(chat = %chat, message = %message, error = %e, "read receipt dropped");
        }
    }

    /// Set or clear the caller's typing flag on the chat. Best-effort.
    pub async fn update_typing(&self, chat: &ChatId, typing: bool) {
        let result = self
            .store
            .update(
                &paths::chats(),
                chat.as_str(),
                Deltas::new()
                    .map_entry("typing", self.local_user.0.clone(), FieldDelta::Set(json!(typing)))
                    .set("updatedAt", Utc::now().timestamp_millis()),
            )
            .await;
        if let Err(e) = result {
            debug!(chat = %chat, error = %e, "typing update dropped");
        }
    }

    /// Store the caller's draft text on the chat. Best-effort.
    pub async fn update_draft(&self, chat: &ChatId, draft: &str) {
        let result = self
            .store
            .update(
                &paths::chats(),
                chat.as_str(),
                Deltas::new()
                    .map_entry(
                        "draftByUser",
                        self.local_user.0.clone(),
                        FieldDelta::Set(json!(draft)),
                    )
                    .set("updatedAt", Utc::now().timestamp_millis()),
            )
            .await;
        if let Err(e) = result {
            debug!(chat = %chat, error = %e, "draft update dropped");
        }
    }

    // -- helpers ------------------------------------------------------------

    /// Read a message, refusing mutations on hard-deleted messages.
    async fn read_message_guarded(&self, chat: &ChatId, message: &MessageId) -> Result<Message> {
        let doc = self
            .store
            .get(&paths::messages(chat), message.as_str())
            .await?
            .ok_or(CoreError::NotFound)?;
        let message: Message = decode(&doc).map_err(|e| {
            warn!(id = %doc.id, error = %e, "undecodable message document");
            e
        })?;
        if message.deleted_for_everyone {
            return Err(CoreError::MessageDeleted);
        }
        Ok(message)
    }
}
