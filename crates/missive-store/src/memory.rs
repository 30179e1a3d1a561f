//! In-process reference implementation of the store contract.
//!
//! Collections are plain maps behind one mutex; watcher notification is
//! synchronous with the mutation, which makes test scenarios fully
//! deterministic.  Documents carry a monotonic sequence number assigned on
//! creation, used as the ordering tiebreak so equal timestamps keep
//! insertion order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::delta::{apply_deltas, Deltas};
use crate::document::{CollectionPath, Document, Fields};
use crate::query::{compare_values, Direction, Query};
use crate::store::DocumentStore;
use crate::subscription::{
    ChangeKind, ChangeSubscription, DocChange, DocumentSubscription, QuerySubscription,
};
use crate::Result;

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, StoredDoc>>,
    watchers: HashMap<u64, Watcher>,
    next_watcher_id: u64,
    next_seq: u64,
}

#[derive(Clone)]
struct StoredDoc {
    fields: Fields,
    seq: u64,
}

enum Watcher {
    Query {
        query: Query,
        tx: mpsc::UnboundedSender<Vec<Document>>,
    },
    Doc {
        path_key: String,
        id: String,
        tx: mpsc::UnboundedSender<Option<Document>>,
    },
    Changes {
        path_key: String,
        tx: mpsc::UnboundedSender<Vec<DocChange>>,
    },
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Inner holds no user code that can panic mid-update.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, watcher: Watcher) -> Box<dyn FnOnce() + Send> {
        let mut inner = self.lock();
        let id = inner.next_watcher_id;
        inner.next_watcher_id += 1;
        inner.watchers.insert(id, watcher);

        let weak = Arc::downgrade(&self.inner);
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Ok(mut guard) = inner.lock() {
                    guard.watchers.remove(&id);
                }
            }
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn evaluate(&self, query: &Query) -> Vec<Document> {
        let mut docs: Vec<(u64, Document)> = self
            .collections
            .get(&query.path.as_key())
            .map(|coll| {
                coll.iter()
                    .map(|(id, stored)| (stored.seq, Document::new(id.clone(), stored.fields.clone())))
                    .filter(|(_, doc)| query.matches(doc))
                    .collect()
            })
            .unwrap_or_default();

        match &query.order {
            Some(order) => docs.sort_by(|(seq_a, a), (seq_b, b)| {
                let cmp = compare_values(a.get(&order.field), b.get(&order.field));
                let cmp = match order.direction {
                    Direction::Ascending => cmp,
                    Direction::Descending => cmp.reverse(),
                };
                cmp.then(seq_a.cmp(seq_b))
            }),
            None => docs.sort_by_key(|(seq, _)| *seq),
        }

        docs.into_iter().map(|(_, doc)| doc).collect()
    }

    /// Fan one change out to every watcher it is relevant to.
    fn notify(&self, path_key: &str, change: DocChange) {
        for watcher in self.watchers.values() {
            match watcher {
                Watcher::Query { query, tx } => {
                    if query.path.as_key() == path_key {
                        let _ = tx.send(self.evaluate(query));
                    }
                }
                Watcher::Doc { path_key: wp, id, tx } => {
                    if wp == path_key && *id == change.doc.id {
                        let current = self
                            .collections
                            .get(path_key)
                            .and_then(|coll| coll.get(id))
                            .map(|stored| Document::new(id.clone(), stored.fields.clone()));
                        let _ = tx.send(current);
                    }
                }
                Watcher::Changes { path_key: wp, tx } => {
                    if wp == path_key {
                        let _ = tx.send(vec![change.clone()]);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &CollectionPath, id: &str) -> Result<Option<Document>> {
        let inner = self.lock();
        Ok(inner
            .collections
            .get(&path.as_key())
            .and_then(|coll| coll.get(id))
            .map(|stored| Document::new(id, stored.fields.clone())))
    }

    async fn set(&self, path: &CollectionPath, id: &str, fields: Fields) -> Result<()> {
        let mut inner = self.lock();
        let key = path.as_key();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let coll = inner.collections.entry(key.clone()).or_default();
        let kind = match coll.get_mut(id) {
            Some(existing) => {
                existing.fields = fields.clone();
                ChangeKind::Modified
            }
            None => {
                coll.insert(id.to_string(), StoredDoc { fields: fields.clone(), seq });
                ChangeKind::Added
            }
        };

        debug!(path = %key, id, ?kind, "set document");
        inner.notify(&key, DocChange { kind, doc: Document::new(id, fields) });
        Ok(())
    }

    async fn add(&self, path: &CollectionPath, fields: Fields) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.set(path, &id, fields).await?;
        Ok(id)
    }

    async fn update(&self, path: &CollectionPath, id: &str, deltas: Deltas) -> Result<()> {
        let mut inner = self.lock();
        let key = path.as_key();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let coll = inner.collections.entry(key.clone()).or_default();
        let (fields, kind) = match coll.get_mut(id) {
            Some(existing) => {
                apply_deltas(&mut existing.fields, &deltas);
                (existing.fields.clone(), ChangeKind::Modified)
            }
            None => {
                let mut fields = Fields::new();
                apply_deltas(&mut fields, &deltas);
                coll.insert(id.to_string(), StoredDoc { fields: fields.clone(), seq });
                (fields, ChangeKind::Added)
            }
        };

        inner.notify(&key, DocChange { kind, doc: Document::new(id, fields) });
        Ok(())
    }

    async fn delete(&self, path: &CollectionPath, id: &str) -> Result<()> {
        let mut inner = self.lock();
        let key = path.as_key();
        let removed = inner
            .collections
            .get_mut(&key)
            .and_then(|coll| coll.remove(id));

        if let Some(stored) = removed {
            debug!(path = %key, id, "deleted document");
            inner.notify(
                &key,
                DocChange {
                    kind: ChangeKind::Removed,
                    doc: Document::new(id, stored.fields),
                },
            );
        }
        Ok(())
    }

    async fn query_docs(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(self.lock().evaluate(query))
    }

    fn subscribe_query(&self, query: Query) -> Result<QuerySubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let initial = self.lock().evaluate(&query);
        let _ = tx.send(initial);
        let unsubscribe = self.register(Watcher::Query { query, tx });
        Ok(QuerySubscription::new(rx, unsubscribe))
    }

    fn subscribe_document(&self, path: &CollectionPath, id: &str) -> Result<DocumentSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = path.as_key();
        {
            let inner = self.lock();
            let current = inner
                .collections
                .get(&key)
                .and_then(|coll| coll.get(id))
                .map(|stored| Document::new(id, stored.fields.clone()));
            let _ = tx.send(current);
        }
        let unsubscribe = self.register(Watcher::Doc {
            path_key: key,
            id: id.to_string(),
            tx,
        });
        Ok(DocumentSubscription::new(rx, unsubscribe))
    }

    fn subscribe_changes(&self, path: &CollectionPath) -> Result<ChangeSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = path.as_key();
        {
            let inner = self.lock();
            if let Some(coll) = inner.collections.get(&key) {
                let mut changes: Vec<(u64, DocChange)> = coll
                    .iter()
                    .map(|(id, stored)| {
                        (
                            stored.seq,
                            DocChange {
                                kind: ChangeKind::Added,
                                doc: Document::new(id.clone(), stored.fields.clone()),
                            },
                        )
                    })
                    .collect();
                changes.sort_by_key(|(seq, _)| *seq);
                let changes: Vec<DocChange> = changes.into_iter().map(|(_, c)| c).collect();
                if !changes.is_empty() {
                    let _ = tx.send(changes);
                }
            }
        }
        let unsubscribe = self.register(Watcher::Changes { path_key: key, tx });
        Ok(ChangeSubscription::new(rx, unsubscribe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Filter, Order};
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        let chats = CollectionPath::root("chats");

        store
            .set(&chats, "c1", fields(json!({ "title": "general" })))
            .await
            .unwrap();
        let doc = store.get(&chats, "c1").await.unwrap().unwrap();
        assert_eq!(doc.get_str("title"), Some("general"));

        store.delete(&chats, "c1").await.unwrap();
        assert!(store.get(&chats, "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_snapshot_delivered_on_subscribe_and_change() {
        let store = MemoryStore::new();
        let chats = CollectionPath::root("chats");
        store
            .set(&chats, "c1", fields(json!({ "memberIds": ["a"] })))
            .await
            .unwrap();

        let query = Query::collection(chats.clone()).filter(Filter::ArrayContains {
            field: "memberIds".into(),
            value: json!("a"),
        });
        let mut sub = store.subscribe_query(query).unwrap();

        let initial = sub.try_next().unwrap();
        assert_eq!(initial.len(), 1);

        store
            .set(&chats, "c2", fields(json!({ "memberIds": ["a", "b"] })))
            .await
            .unwrap();
        let next = sub.try_next().unwrap();
        assert_eq!(next.len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_delivery() {
        let store = MemoryStore::new();
        let chats = CollectionPath::root("chats");
        let sub = store.subscribe_query(Query::collection(chats.clone())).unwrap();
        drop(sub);

        // Writing after the drop must not hit a dangling watcher.
        store
            .set(&chats, "c1", fields(json!({ "title": "t" })))
            .await
            .unwrap();
        assert_eq!(store.lock().watchers.len(), 0);
    }

    #[tokio::test]
    async fn test_change_feed_added_only_consumption() {
        let store = MemoryStore::new();
        let cands = CollectionPath::root("calls").sub("k1", "offerCandidates");

        store
            .add(&cands, fields(json!({ "candidate": "cand-1" })))
            .await
            .unwrap();

        let mut sub = store.subscribe_changes(&cands).unwrap();
        let initial = sub.try_next().unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].kind, ChangeKind::Added);

        store
            .add(&cands, fields(json!({ "candidate": "cand-2" })))
            .await
            .unwrap();
        let next = sub.try_next().unwrap();
        assert_eq!(next[0].kind, ChangeKind::Added);
        assert_eq!(next[0].doc.get_str("candidate"), Some("cand-2"));
    }

    #[tokio::test]
    async fn test_order_by_with_insertion_tiebreak() {
        let store = MemoryStore::new();
        let msgs = CollectionPath::root("chats").sub("c1", "messages");

        store
            .set(&msgs, "m1", fields(json!({ "createdAt": 100 })))
            .await
            .unwrap();
        store
            .set(&msgs, "m2", fields(json!({ "createdAt": 100 })))
            .await
            .unwrap();
        store
            .set(&msgs, "m0", fields(json!({ "createdAt": 50 })))
            .await
            .unwrap();

        let docs = store
            .query_docs(&Query::collection(msgs).order_by(Order::asc("createdAt")))
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn test_document_subscription_sees_updates_and_removal() {
        let store = MemoryStore::new();
        let calls = CollectionPath::root("calls");
        store
            .set(&calls, "k1", fields(json!({ "status": "ringing" })))
            .await
            .unwrap();

        let mut sub = store.subscribe_document(&calls, "k1").unwrap();
        assert_eq!(
            sub.try_next().unwrap().unwrap().get_str("status"),
            Some("ringing")
        );

        store
            .update(&calls, "k1", Deltas::new().set("status", "active"))
            .await
            .unwrap();
        assert_eq!(
            sub.try_next().unwrap().unwrap().get_str("status"),
            Some("active")
        );

        store.delete(&calls, "k1").await.unwrap();
        assert!(sub.try_next().unwrap().is_none());
    }
}
