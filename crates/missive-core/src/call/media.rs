//! The local media capability seam.
//!
//! The engine signals over the document store but never touches capture
//! devices or the transport stack itself; everything device-shaped sits
//! behind [`MediaSession`], provided by the embedding application.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use missive_shared::constants::DEFAULT_ICE_SERVERS;

use crate::models::{IceCandidate, SessionDescription};

#[derive(Error, Debug)]
pub enum MediaError {
    /// Camera/microphone could not be acquired. Raised before any
    /// signaling state exists, so it is always safe to retry a call.
    #[error("Media capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Media session closed")]
    Closed,
}

/// Call negotiation settings.
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub ice_servers: Vec<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One peer's media session for a single call.
///
/// Implementations gather local network candidates on their own schedule
/// and emit them through the channel handed out by
/// [`take_local_candidates`](Self::take_local_candidates); the engine
/// forwards them to the store as they trickle in.
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Acquire capture devices. Called before any signaling write, so a
    /// failure here leaves no trace in the store.
    async fn acquire_media(&self, config: &CallConfig) -> Result<(), MediaError>;

    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError>;

    /// Whether a remote description has already been applied. The engine
    /// checks this immediately before applying an answer, which is what
    /// makes re-delivered snapshots harmless.
    fn remote_description_set(&self) -> bool;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    /// Hand over the local candidate feed. Called once per call.
    fn take_local_candidates(&self) -> mpsc::UnboundedReceiver<IceCandidate>;

    /// Release capture devices and the transport. Must be idempotent and
    /// non-blocking so teardown paths can always call it.
    fn close(&self);
}
