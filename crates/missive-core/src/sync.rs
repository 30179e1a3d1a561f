//! Realtime chat state synchronizer.
//!
//! Consumes two change feeds — the chat list the local user belongs to,
//! and the message feed of the currently active chat — and maintains an
//! in-memory snapshot.  Every emission replaces the affected snapshot
//! wholesale: the chat list is re-sorted by `updatedAt` descending, the
//! message list keeps the store's `createdAt` order.  At most one message
//! subscription is live; switching the active chat drops the old handle
//! before opening the next, so stale feeds can never deliver.
//!
//! Readers get immutable views; everything derived (pinned message,
//! typing aggregate, per-viewer visibility, reaction summaries) is
//! computed from the snapshot, never stored.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use missive_shared::crypto::{self, RoomSecret};
use missive_shared::types::{ChatId, MessageId, UserId};
use missive_store::{
    Document, DocumentStore, Filter, Order, Query, QuerySubscription,
};

use crate::models::{decode, Chat, Message};
use crate::paths;
use crate::Result;

enum FeedEvent {
    Chats(Vec<Document>),
    Messages(Vec<Document>),
    Closed,
}

pub struct ChatStateSynchronizer {
    store: Arc<dyn DocumentStore>,
    local_user: UserId,
    chats_sub: QuerySubscription,
    messages_sub: Option<QuerySubscription>,
    chats: Vec<Chat>,
    messages: Vec<Message>,
    active_chat_id: Option<ChatId>,
}

impl ChatStateSynchronizer {
    /// Subscribe to the local user's chat list. The first snapshot arrives
    /// on the feed; call [`apply_pending`](Self::apply_pending) or
    /// [`recv`](Self::recv) to fold it in.
    pub fn new(store: Arc<dyn DocumentStore>, local_user: UserId) -> Result<Self> {
        let query = Query::collection(paths::chats()).filter(Filter::ArrayContains {
            field: "memberIds".into(),
            value: json!(local_user.as_str()),
        });
        let chats_sub = store.subscribe_query(query)?;

        Ok(Self {
            store,
            local_user,
            chats_sub,
            messages_sub: None,
            chats: Vec::new(),
            messages: Vec::new(),
            active_chat_id: None,
        })
    }

    /// Switch the active chat. The previous message subscription is
    /// dropped (and thereby cancelled) before the new one opens; the
    /// message snapshot clears immediately.
    pub fn set_active_chat(&mut self, chat: Option<ChatId>) -> Result<()> {
        if self.active_chat_id == chat {
            return Ok(());
        }

        self.messages_sub = None;
        self.messages.clear();
        self.active_chat_id = chat;

        if let Some(chat_id) = &self.active_chat_id {
            debug!(chat = %chat_id, "subscribing to active chat messages");
            let query = Query::collection(paths::messages(chat_id))
                .order_by(Order::asc("createdAt"));
            self.messages_sub = Some(self.store.subscribe_query(query)?);
        }
        Ok(())
    }

    /// Drain everything both feeds have already emitted, non-blocking.
    pub fn apply_pending(&mut self) -> Result<()> {
        while let Some(docs) = self.chats_sub.try_next() {
            self.apply_chat_snapshot(docs)?;
        }
        while let Some(docs) = self
            .messages_sub
            .as_mut()
            .and_then(QuerySubscription::try_next)
        {
            self.apply_message_snapshot(docs);
        }
        Ok(())
    }

    /// Await the next emission from either feed and fold it in. Returns
    /// `false` when the chat feed has closed. No ordering is assumed
    /// between the two feeds.
    pub async fn recv(&mut self) -> Result<bool> {
        let event = match &mut self.messages_sub {
            Some(messages_sub) => {
                tokio::select! {
                    snapshot = self.chats_sub.next() => match snapshot {
                        Some(docs) => FeedEvent::Chats(docs),
                        None => FeedEvent::Closed,
                    },
                    snapshot = messages_sub.next() => match snapshot {
                        Some(docs) => FeedEvent::Messages(docs),
                        // The message feed closing is not fatal; the chat
                        // feed decides the synchronizer's lifetime.
                        None => return Ok(true),
                    },
                }
            }
            None => match self.chats_sub.next().await {
                Some(docs) => FeedEvent::Chats(docs),
                None => FeedEvent::Closed,
            },
        };

        match event {
            FeedEvent::Chats(docs) => {
                self.apply_chat_snapshot(docs)?;
                Ok(true)
            }
            FeedEvent::Messages(docs) => {
                self.apply_message_snapshot(docs);
                Ok(true)
            }
            FeedEvent::Closed => Ok(false),
        }
    }

    fn apply_chat_snapshot(&mut self, docs: Vec<Document>) -> Result<()> {
        let mut chats: Vec<Chat> = Vec::with_capacity(docs.len());
        for doc in &docs {
            match decode(doc) {
                Ok(chat) => chats.push(chat),
                Err(e) => warn!(id = %doc.id, error = %e, "undecodable chat document"),
            }
        }
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        self.chats = chats;

        // Auto-select the freshest chat when nothing is active yet.
        if self.active_chat_id.is_none() {
            if let Some(first) = self.chats.first() {
                let id = first.id.clone();
                self.set_active_chat(Some(id))?;
            }
        }
        Ok(())
    }

    fn apply_message_snapshot(&mut self, docs: Vec<Document>) {
        let mut messages: Vec<Message> = Vec::with_capacity(docs.len());
        for doc in &docs {
            match decode(doc) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(id = %doc.id, error = %e, "undecodable message document"),
            }
        }
        self.messages = messages;
    }

    // -- snapshot views -----------------------------------------------------

    /// All chats, newest activity first.
    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn active_chat_id(&self) -> Option<&ChatId> {
        self.active_chat_id.as_ref()
    }

    pub fn active_chat(&self) -> Option<&Chat> {
        let id = self.active_chat_id.as_ref()?;
        self.chats.iter().find(|c| &c.id == id)
    }

    /// The active chat's messages in creation order, including ones other
    /// viewers soft-deleted. Empty when no chat is active.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    // -- derived views ------------------------------------------------------

    /// Messages after the local viewer's soft-delete filter. Hard-deleted
    /// messages stay, carrying their removal marker.
    pub fn visible_messages(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.is_visible_to(&self.local_user))
            .collect()
    }

    /// The pinned message of the active chat, if any and if present in
    /// the current snapshot.
    pub fn pinned_message(&self) -> Option<&Message> {
        let chat = self.active_chat()?;
        if chat.pinned_message_id.is_empty() {
            return None;
        }
        self.messages
            .iter()
            .find(|m| m.id.as_str() == chat.pinned_message_id)
    }

    /// Whether any member of the active chat currently has a typing flag
    /// set.
    pub fn anyone_typing(&self) -> bool {
        self.active_chat()
            .map(|chat| chat.typing.values().any(|&t| t))
            .unwrap_or(false)
    }

    /// The local user's saved draft for the active chat.
    pub fn local_draft(&self) -> Option<&str> {
        self.active_chat()?
            .draft_by_user
            .get(self.local_user.as_str())
            .map(String::as_str)
    }

    /// Emoji -> count projection of a message's reactions.
    pub fn reaction_summary(&self, message: &MessageId) -> BTreeMap<String, usize> {
        let mut summary = BTreeMap::new();
        if let Some(msg) = self.messages.iter().find(|m| &m.id == message) {
            for emoji in msg.reactions.values() {
                *summary.entry(emoji.clone()).or_insert(0) += 1;
            }
        }
        summary
    }

    /// Render a message body, decrypting with the room secret when one is
    /// held. Failures render as the fixed sentinel.
    pub fn display_text(&self, message: &Message, secret: Option<&RoomSecret>) -> String {
        crypto::decrypt_text(&message.text, &message.iv, secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserProfile;
    use crate::ops::{ChatOps, OutgoingMessage};
    use chrono::Utc;
    use missive_store::MemoryStore;

    fn profile(uid: &str, name: &str) -> UserProfile {
        let now = Utc::now();
        UserProfile {
            uid: UserId::new(uid),
            display_name: name.to_string(),
            email: String::new(),
            photo_url: String::new(),
            username: uid.to_string(),
            about: String::new(),
            last_seen: now,
            online: true,
            blocked_users: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn setup(store: &MemoryStore, uid: &str) -> (ChatOps, ChatStateSynchronizer) {
        let arc: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let ops = ChatOps::new(arc.clone(), UserId::new(uid));
        let sync = ChatStateSynchronizer::new(arc, UserId::new(uid)).unwrap();
        (ops, sync)
    }

    #[tokio::test]
    async fn test_chat_list_sorted_by_activity_desc() {
        let store = MemoryStore::new();
        let (ops, mut sync) = setup(&store, "alice");

        let c1 = ops.start_direct_chat(&profile("bob", "Bob")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let c2 = ops.start_direct_chat(&profile("carol", "Carol")).await.unwrap();
        sync.apply_pending().unwrap();
        assert_eq!(sync.chats()[0].id, c2);

        // Activity on the older chat moves it back to the top.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        ops.send_message(&c1, OutgoingMessage::text("bump"), None)
            .await
            .unwrap();
        sync.apply_pending().unwrap();
        assert_eq!(sync.chats()[0].id, c1);

        // Non-increasing by updatedAt across the whole list.
        let stamps: Vec<_> = sync.chats().iter().map(|c| c.updated_at).collect();
        assert!(stamps.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn test_auto_selects_first_chat() {
        let store = MemoryStore::new();
        let (ops, mut sync) = setup(&store, "alice");
        let chat = ops.start_direct_chat(&profile("bob", "Bob")).await.unwrap();

        sync.apply_pending().unwrap();
        assert_eq!(sync.active_chat_id(), Some(&chat));
        assert!(sync.active_chat().is_some());
    }

    #[tokio::test]
    async fn test_switching_chats_swaps_message_feed() {
        let store = MemoryStore::new();
        let (ops, mut sync) = setup(&store, "alice");
        let c1 = ops.start_direct_chat(&profile("bob", "Bob")).await.unwrap();
        let c2 = ops.start_direct_chat(&profile("carol", "Carol")).await.unwrap();

        ops.send_message(&c1, OutgoingMessage::text("in c1"), None)
            .await
            .unwrap();
        ops.send_message(&c2, OutgoingMessage::text("in c2"), None)
            .await
            .unwrap();

        sync.set_active_chat(Some(c1.clone())).unwrap();
        sync.apply_pending().unwrap();
        assert_eq!(sync.messages().len(), 1);
        assert_eq!(sync.display_text(&sync.messages()[0], None), "in c1");

        sync.set_active_chat(Some(c2.clone())).unwrap();
        assert!(sync.messages().is_empty());
        sync.apply_pending().unwrap();
        assert_eq!(sync.messages().len(), 1);
        assert_eq!(sync.display_text(&sync.messages()[0], None), "in c2");

        // A write to the abandoned chat must not leak into the snapshot.
        ops.send_message(&c1, OutgoingMessage::text("stale"), None)
            .await
            .unwrap();
        sync.apply_pending().unwrap();
        assert_eq!(sync.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_messages_in_creation_order() {
        let store = MemoryStore::new();
        let (ops, mut sync) = setup(&store, "alice");
        let chat = ops.start_direct_chat(&profile("bob", "Bob")).await.unwrap();

        for text in ["one", "two", "three"] {
            ops.send_message(&chat, OutgoingMessage::text(text), None)
                .await
                .unwrap();
        }
        sync.apply_pending().unwrap();

        let texts: Vec<_> = sync.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_soft_delete_filtering_is_per_viewer() {
        let store = MemoryStore::new();
        let (alice_ops, mut alice_sync) = setup(&store, "alice");
        let (_, mut bob_sync) = setup(&store, "bob");

        let chat = alice_ops.start_direct_chat(&profile("bob", "Bob")).await.unwrap();
        alice_ops
            .send_message(&chat, OutgoingMessage::text("oops"), None)
            .await
            .unwrap();
        let id = {
            alice_sync.apply_pending().unwrap();
            alice_sync.messages()[0].id.clone()
        };
        alice_ops.delete_message(&chat, &id, false).await.unwrap();

        alice_sync.apply_pending().unwrap();
        bob_sync.set_active_chat(Some(chat.clone())).unwrap();
        bob_sync.apply_pending().unwrap();

        assert!(alice_sync.visible_messages().is_empty());
        assert_eq!(bob_sync.visible_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_pinned_and_typing_and_reactions_views() {
        let store = MemoryStore::new();
        let (ops, mut sync) = setup(&store, "alice");
        let chat = ops.start_direct_chat(&profile("bob", "Bob")).await.unwrap();
        let id = ops
            .send_message(&chat, OutgoingMessage::text("pin me"), None)
            .await
            .unwrap();

        ops.pin_message(&chat, Some(&id)).await.unwrap();
        ops.update_typing(&chat, true).await;
        ops.react(&chat, &id, "👍").await.unwrap();

        let bob = ChatOps::new(Arc::new(store.clone()), UserId::new("bob"));
        bob.react(&chat, &id, "👍").await.unwrap();

        sync.apply_pending().unwrap();
        assert_eq!(sync.pinned_message().unwrap().id, id);
        assert!(sync.anyone_typing());
        assert_eq!(sync.reaction_summary(&id).get("👍"), Some(&2));

        ops.clear_pin(&chat).await.unwrap();
        ops.update_typing(&chat, false).await;
        sync.apply_pending().unwrap();
        assert!(sync.pinned_message().is_none());
        assert!(!sync.anyone_typing());
    }

    #[tokio::test]
    async fn test_no_active_chat_is_a_valid_state() {
        let store = MemoryStore::new();
        let (_, mut sync) = setup(&store, "alice");
        sync.apply_pending().unwrap();

        assert!(sync.chats().is_empty());
        assert!(sync.active_chat().is_none());
        assert!(sync.messages().is_empty());
        assert!(sync.pinned_message().is_none());
        assert!(!sync.anyone_typing());
    }

    #[tokio::test]
    async fn test_recv_folds_in_new_activity() {
        let store = MemoryStore::new();
        let (ops, mut sync) = setup(&store, "alice");
        sync.apply_pending().unwrap();

        let chat = ops.start_direct_chat(&profile("bob", "Bob")).await.unwrap();
        assert!(sync.recv().await.unwrap());
        assert_eq!(sync.active_chat_id(), Some(&chat));
    }
}
