use thiserror::Error;

use crate::call::MediaError;

/// Errors surfaced by content-affecting operations and the call engine.
///
/// Ambient state updates (typing, drafts, read receipts, candidate
/// trickling) never produce these; their failures are logged and dropped.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(#[from] missive_store::StoreError),

    #[error("Record not found")]
    NotFound,

    #[error("Only the sender may do this")]
    NotOwner,

    #[error("Message was deleted for everyone")]
    MessageDeleted,

    #[error("Message has no poll, or option {0} does not exist")]
    InvalidPollOption(usize),

    #[error("Chat has no other member to call")]
    NoCallTarget,

    #[error("A call is already in progress")]
    AlreadyInCall,

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Malformed record: {0}")]
    Decode(#[from] serde_json::Error),
}
