use async_trait::async_trait;

use crate::delta::Deltas;
use crate::document::{CollectionPath, Document, Fields};
use crate::query::Query;
use crate::subscription::{ChangeSubscription, DocumentSubscription, QuerySubscription};
use crate::Result;

/// The realtime document store the core is written against.
///
/// Implementations must deliver change notifications for one subscription
/// in emission order; no ordering is guaranteed across independent
/// subscriptions, and consumers are expected to tolerate snapshot
/// re-delivery (e.g. after a transport reconnect).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document. `Ok(None)` when absent.
    async fn get(&self, path: &CollectionPath, id: &str) -> Result<Option<Document>>;

    /// Full upsert: replaces the document's fields wholesale.
    async fn set(&self, path: &CollectionPath, id: &str, fields: Fields) -> Result<()>;

    /// Append a document under a generated id, returned to the caller.
    async fn add(&self, path: &CollectionPath, fields: Fields) -> Result<String>;

    /// Field-level merge. Creates the document when absent.
    async fn update(&self, path: &CollectionPath, id: &str, deltas: Deltas) -> Result<()>;

    /// Delete one document. Deleting an absent document is a no-op.
    async fn delete(&self, path: &CollectionPath, id: &str) -> Result<()>;

    /// One-shot query evaluation.
    async fn query_docs(&self, query: &Query) -> Result<Vec<Document>>;

    /// Subscribe to a query; the full result set is re-delivered on every
    /// relevant change, starting with the current state.
    fn subscribe_query(&self, query: Query) -> Result<QuerySubscription>;

    /// Subscribe to a single document's snapshots.
    fn subscribe_document(&self, path: &CollectionPath, id: &str) -> Result<DocumentSubscription>;

    /// Subscribe to a collection's added/modified/removed change lists.
    fn subscribe_changes(&self, path: &CollectionPath) -> Result<ChangeSubscription>;
}
