//! # missive-store
//!
//! The realtime document store contract the Missive core is written
//! against, plus an in-process reference implementation.
//!
//! The production store is an external collaborator; what this crate pins
//! down is the contract: per-document CRUD, field-level merge deltas
//! (set-add / set-remove / numeric increment / map merge), filtered
//! queries, and subscribable change feeds.  Subscription handles own their
//! registration and unsubscribe on `Drop`, so a dropped handle can never
//! deliver into stale state.
//!
//! [`MemoryStore`] implements the full contract in memory and backs the
//! workspace test suite.

pub mod delta;
pub mod document;
pub mod memory;
pub mod query;
pub mod store;
pub mod subscription;

mod error;

pub use delta::{Deltas, FieldDelta};
pub use document::{CollectionPath, Document, Fields};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use query::{Direction, Filter, Order, Query};
pub use store::DocumentStore;
pub use subscription::{ChangeKind, ChangeSubscription, DocChange, DocumentSubscription, QuerySubscription};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
