//! Collection layout in the document store.
//!
//! Messages nest under their chat; candidate logs nest under their call.
//! These helpers are the only place the layout is spelled out.

use missive_shared::types::{CallId, ChatId};
use missive_store::CollectionPath;

pub fn users() -> CollectionPath {
    CollectionPath::root("users")
}

pub fn chats() -> CollectionPath {
    CollectionPath::root("chats")
}

pub fn messages(chat: &ChatId) -> CollectionPath {
    chats().sub(chat.as_str(), "messages")
}

pub fn calls() -> CollectionPath {
    CollectionPath::root("calls")
}

/// Which side of a call appended a candidate log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSide {
    Offer,
    Answer,
}

impl CandidateSide {
    pub fn other(self) -> Self {
        match self {
            CandidateSide::Offer => CandidateSide::Answer,
            CandidateSide::Answer => CandidateSide::Offer,
        }
    }

    fn collection(self) -> &'static str {
        match self {
            CandidateSide::Offer => "offerCandidates",
            CandidateSide::Answer => "answerCandidates",
        }
    }
}

pub fn candidates(call: &CallId, side: CandidateSide) -> CollectionPath {
    calls().sub(call.as_str(), side.collection())
}
