//! Owned subscription handles.
//!
//! A subscription is a scoped acquisition: the handle owns its
//! registration with the store and unregisters on `Drop`.  After the
//! handle is gone, no further change can be observed through it, which is
//! what lets the synchronizer swap the active chat without ever receiving
//! into stale state.

use tokio::sync::mpsc;

use crate::document::Document;

/// Change classification for collection change feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocChange {
    pub kind: ChangeKind,
    pub doc: Document,
}

/// Callback invoked when a handle is dropped; detaches the watcher.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

struct Guard(Option<Unsubscribe>);

impl Drop for Guard {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.0.take() {
            unsubscribe();
        }
    }
}

/// Feed of full query snapshots, one per relevant change. The current
/// result set is delivered immediately on subscribe.
pub struct QuerySubscription {
    rx: mpsc::UnboundedReceiver<Vec<Document>>,
    _guard: Guard,
}

impl QuerySubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Vec<Document>>, unsubscribe: Unsubscribe) -> Self {
        Self {
            rx,
            _guard: Guard(Some(unsubscribe)),
        }
    }

    /// Await the next snapshot. `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Vec<Document>> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&mut self) -> Option<Vec<Document>> {
        self.rx.try_recv().ok()
    }
}

/// Feed of single-document snapshots (`None` = the document is absent).
pub struct DocumentSubscription {
    rx: mpsc::UnboundedReceiver<Option<Document>>,
    _guard: Guard,
}

impl DocumentSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Option<Document>>, unsubscribe: Unsubscribe) -> Self {
        Self {
            rx,
            _guard: Guard(Some(unsubscribe)),
        }
    }

    pub async fn next(&mut self) -> Option<Option<Document>> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<Option<Document>> {
        self.rx.try_recv().ok()
    }
}

/// Feed of added/modified/removed change lists for one collection.
/// Pre-existing documents are delivered as `Added` on subscribe, so a
/// late subscriber still sees the whole candidate log.
pub struct ChangeSubscription {
    rx: mpsc::UnboundedReceiver<Vec<DocChange>>,
    _guard: Guard,
}

impl ChangeSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Vec<DocChange>>, unsubscribe: Unsubscribe) -> Self {
        Self {
            rx,
            _guard: Guard(Some(unsubscribe)),
        }
    }

    pub async fn next(&mut self) -> Option<Vec<DocChange>> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<Vec<DocChange>> {
        self.rx.try_recv().ok()
    }
}
