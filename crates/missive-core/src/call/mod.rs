//! Peer-to-peer call signaling over the document store.
//!
//! One ephemeral record per call under `calls/{chatId_ms}`, with each
//! side's trickled network candidates appended to its own subcollection
//! (`offerCandidates` for the caller, `answerCandidates` for the callee).
//! The engine owns at most one call at a time:
//!
//! ```text
//! Idle -> Ringing -> Active -> Ended -> Idle
//!              \________________^
//! ```
//!
//! `Ended` absorbs both remote teardown (status flip or record deletion)
//! and local hang-up; `reset` returns to `Idle`.  Media is acquired
//! before the first store write and released unconditionally on every
//! teardown path, including `Drop`.

mod media;

pub use media::{CallConfig, MediaError, MediaSession};

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use missive_shared::types::{CallId, UserId};
use missive_store::{
    ChangeKind, ChangeSubscription, Deltas, Document, DocumentStore, DocumentSubscription,
};

use crate::models::{decode, to_fields, CallRecord, CallStatus, Chat, IceCandidate};
use crate::paths::{self, CandidateSide};
use crate::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Ringing,
    Active,
    Ended,
}

pub struct CallSignalingEngine {
    store: Arc<dyn DocumentStore>,
    local_user: UserId,
    config: CallConfig,
    state: CallState,
    call_id: Option<CallId>,
    media: Option<Box<dyn MediaSession>>,
    signal_sub: Option<DocumentSubscription>,
    remote_candidates_sub: Option<ChangeSubscription>,
    pump: Option<JoinHandle<()>>,
}

impl CallSignalingEngine {
    pub fn new(store: Arc<dyn DocumentStore>, local_user: UserId, config: CallConfig) -> Self {
        Self {
            store,
            local_user,
            config,
            state: CallState::Idle,
            call_id: None,
            media: None,
            signal_sub: None,
            remote_candidates_sub: None,
            pump: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.call_id.as_ref()
    }

    /// Start a call to the other member of `chat`.
    ///
    /// Media is acquired before anything is written, so a capture failure
    /// leaves the store untouched and the engine in `Idle`.
    pub async fn initiate(&mut self, chat: &Chat, media: Box<dyn MediaSession>) -> Result<CallId> {
        if self.state != CallState::Idle {
            return Err(CoreError::AlreadyInCall);
        }
        let callee = chat
            .member_ids
            .iter()
            .find(|uid| **uid != self.local_user)
            .cloned()
            .ok_or(CoreError::NoCallTarget)?;

        media.acquire_media(&self.config).await?;
        let offer = match media.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return self.abort_setup(media, e.into()),
        };

        let now = Utc::now();
        let call_id = CallId::new(&chat.id, now);
        let record = CallRecord {
            caller_id: self.local_user.clone(),
            callee_id: callee.clone(),
            offer,
            answer: None,
            status: CallStatus::Ringing,
            created_at: now,
            updated_at: now,
        };
        let fields = match to_fields(&record) {
            Ok(fields) => fields,
            Err(e) => return self.abort_setup(media, e),
        };
        if let Err(e) = self.store.set(&paths::calls(), call_id.as_str(), fields).await {
            return self.abort_setup(media, e.into());
        }

        self.attach(&call_id, media, CandidateSide::Offer)?;
        self.call_id = Some(call_id.clone());
        self.state = CallState::Ringing;

        info!(call = %call_id, callee = %callee, "call initiated");
        Ok(call_id)
    }

    /// Answer an incoming call identified by its signaling record.
    pub async fn answer(&mut self, call_id: &CallId, media: Box<dyn MediaSession>) -> Result<()> {
        if self.state != CallState::Idle {
            return Err(CoreError::AlreadyInCall);
        }
        let doc = self
            .store
            .get(&paths::calls(), call_id.as_str())
            .await?
            .ok_or(CoreError::NotFound)?;
        let record: CallRecord = decode(&doc)?;

        media.acquire_media(&self.config).await?;
        if let Err(e) = media.set_remote_description(record.offer).await {
            return self.abort_setup(media, e.into());
        }
        let answer = match media.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return self.abort_setup(media, e.into()),
        };
        let answer_value = match serde_json::to_value(&answer) {
            Ok(value) => value,
            Err(e) => return self.abort_setup(media, e.into()),
        };

        let applied = self
            .store
            .update(
                &paths::calls(),
                call_id.as_str(),
                Deltas::new()
                    .set("answer", answer_value)
                    .set("status", "active")
                    .set("updatedAt", Utc::now().timestamp_millis()),
            )
            .await;
        if let Err(e) = applied {
            return self.abort_setup(media, e.into());
        }

        self.attach(call_id, media, CandidateSide::Answer)?;
        self.call_id = Some(call_id.clone());
        self.state = CallState::Active;

        info!(call = %call_id, caller = %record.caller_id, "call answered");
        Ok(())
    }

    /// Release capture devices after a failed call setup. Every call site
    /// is on a path where the engine never took ownership of the session,
    /// so this is the only handle that can still close it.
    fn abort_setup<T>(&self, media: Box<dyn MediaSession>, err: CoreError) -> Result<T> {
        media.close();
        Err(err)
    }

    /// Wire up one side of a live call: spawn the local-candidate pump and
    /// subscribe to the record and to the remote side's candidate log.
    fn attach(
        &mut self,
        call_id: &CallId,
        media: Box<dyn MediaSession>,
        side: CandidateSide,
    ) -> Result<()> {
        let signal_sub = match self.store.subscribe_document(&paths::calls(), call_id.as_str()) {
            Ok(sub) => sub,
            Err(e) => return self.abort_setup(media, e.into()),
        };
        let candidates_sub = match self
            .store
            .subscribe_changes(&paths::candidates(call_id, side.other()))
        {
            Ok(sub) => sub,
            Err(e) => return self.abort_setup(media, e.into()),
        };

        let store = Arc::clone(&self.store);
        let path = paths::candidates(call_id, side);
        let mut local = media.take_local_candidates();
        let pump_call = call_id.clone();
        // Trickle local candidates as they are gathered. Failed appends
        // are dropped, never retried; the peer works with what arrived.
        self.pump = Some(tokio::spawn(async move {
            while let Some(candidate) = local.recv().await {
                let fields = match to_fields(&candidate) {
                    Ok(fields) => fields,
                    Err(e) => {
                        debug!(call = %pump_call, error = %e, "unencodable local candidate");
                        continue;
                    }
                };
                if let Err(e) = store.add(&path, fields).await {
                    debug!(call = %pump_call, error = %e, "local candidate dropped");
                }
            }
        }));

        self.signal_sub = Some(signal_sub);
        self.remote_candidates_sub = Some(candidates_sub);
        self.media = Some(media);
        Ok(())
    }

    /// Drain both feeds non-blocking and advance the call.
    ///
    /// The remote answer is applied at most once: `remote_description_set`
    /// is checked immediately before applying, so re-delivered snapshots
    /// (and the initial one on subscribe) are harmless. A remote `ended`
    /// status or deletion of the record tears the call down.
    pub async fn apply_pending(&mut self) -> Result<()> {
        let mut snapshots: Vec<Option<Document>> = Vec::new();
        if let Some(sub) = self.signal_sub.as_mut() {
            while let Some(snapshot) = sub.try_next() {
                snapshots.push(snapshot);
            }
        }
        for snapshot in snapshots {
            if self.state == CallState::Ended || self.state == CallState::Idle {
                break;
            }
            match snapshot {
                None => {
                    info!(call = ?self.call_id, "call record removed by remote");
                    self.teardown();
                    self.state = CallState::Ended;
                }
                Some(doc) => {
                    let record: CallRecord = match decode(&doc) {
                        Ok(record) => record,
                        Err(e) => {
                            warn!(id = %doc.id, error = %e, "undecodable call record");
                            continue;
                        }
                    };
                    if record.status == CallStatus::Ended {
                        info!(call = ?self.call_id, "call ended by remote");
                        self.teardown();
                        self.state = CallState::Ended;
                        continue;
                    }
                    if let Some(answer) = record.answer {
                        if let Some(media) = &self.media {
                            if !media.remote_description_set() {
                                match media.set_remote_description(answer).await {
                                    Ok(()) => self.state = CallState::Active,
                                    Err(e) => {
                                        warn!(call = ?self.call_id, error = %e, "answer rejected")
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut added: Vec<Document> = Vec::new();
        if let Some(sub) = self.remote_candidates_sub.as_mut() {
            while let Some(changes) = sub.try_next() {
                added.extend(
                    changes
                        .into_iter()
                        .filter(|c| c.kind == ChangeKind::Added)
                        .map(|c| c.doc),
                );
            }
        }
        for doc in added {
            let candidate: IceCandidate = match decode(&doc) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(id = %doc.id, error = %e, "undecodable remote candidate");
                    continue;
                }
            };
            if let Some(media) = &self.media {
                if let Err(e) = media.add_remote_candidate(candidate).await {
                    debug!(call = ?self.call_id, error = %e, "remote candidate rejected");
                }
            }
        }
        Ok(())
    }

    /// End the call locally. Infallible: the status flip and the record
    /// deletion are best-effort, and media release, pump abort and
    /// subscription drop happen regardless.
    pub async fn hang_up(&mut self) {
        if let Some(call_id) = self.call_id.take() {
            let flip = self
                .store
                .update(
                    &paths::calls(),
                    call_id.as_str(),
                    Deltas::new()
                        .set("status", "ended")
                        .set("updatedAt", Utc::now().timestamp_millis()),
                )
                .await;
            if let Err(e) = flip {
                debug!(call = %call_id, error = %e, "end-status flip dropped");
            }
            if let Err(e) = self.store.delete(&paths::calls(), call_id.as_str()).await {
                debug!(call = %call_id, error = %e, "call record delete dropped");
            }
            info!(call = %call_id, "call hung up");
        }
        self.teardown();
        self.state = CallState::Idle;
    }

    /// Return from `Ended` to `Idle`, ready for the next call.
    pub fn reset(&mut self) {
        self.teardown();
        self.call_id = None;
        self.state = CallState::Idle;
    }

    fn teardown(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.signal_sub = None;
        self.remote_candidates_sub = None;
        if let Some(media) = self.media.take() {
            media.close();
        }
    }
}

impl Drop for CallSignalingEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
