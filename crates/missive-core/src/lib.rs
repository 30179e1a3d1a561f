//! # missive-core
//!
//! The Missive client core: persisted record models, the message mutation
//! protocol, user directory and presence, the realtime chat state
//! synchronizer, and the peer-to-peer call signaling engine.
//!
//! The core is a library with no process boundary of its own.  It talks to
//! two external collaborators through trait seams: the realtime document
//! store ([`missive_store::DocumentStore`]) and the local media capability
//! ([`call::MediaSession`]).  Data flows one way from the store into the
//! synchronizer's snapshot, and one way out through the operation types.

pub mod call;
pub mod models;
pub mod ops;
pub mod paths;
pub mod presence;
pub mod sync;

mod error;

pub use error::CoreError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
