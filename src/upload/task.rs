//! Upload of one layer
//!
//! [`LayerUploadTask`] submits the pending objects of a layer batch by batch
//! and owns the two recoveries the server protocol allows:
//!
//! - changeset full: ask the capacity policy, then either open a new
//!   changeset with the same tags and continue with the unchanged pending
//!   set, or stop and keep the rest pending
//! - object already gone: if the layer deleted the object too, drop it from
//!   the pending set and continue
//!
//! Every other error ends the task as FAILED; cancellation ends it as
//! CANCELED. Objects confirmed before the task ended stay confirmed.

use std::fmt;
use std::sync::Arc;

use crate::api::{ApiError, RemoteApi};
use crate::cancel::CancelToken;
use crate::data::{lock_layer, Changeset, EditObject, ObjectId, ProcessedObject, SharedLayer};
use crate::error::{Result, SyncError};
use crate::orchestrator::EventSink;
use crate::outcome::Outcome;

use super::pending::PendingObjectSet;
use super::policy::{ChangesetCapacityPolicy, OverflowChoice};
use super::strategy::UploadStrategySpecification;

/// States of the upload state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Preparing,
    Uploading,
    RecoveringFull,
    RecoveringGone,
    Closing,
    Success,
    Failed,
    Canceled,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::Preparing => "preparing",
            UploadState::Uploading => "uploading",
            UploadState::RecoveringFull => "recovering from full changeset",
            UploadState::RecoveringGone => "recovering from deleted object",
            UploadState::Closing => "closing changeset",
            UploadState::Success => "success",
            UploadState::Failed => "failed",
            UploadState::Canceled => "canceled",
        };
        write!(f, "{}", name)
    }
}

/// Collaborators shared by every upload task of a session
#[derive(Clone)]
pub struct UploadContext {
    pub api: Arc<dyn RemoteApi>,
    pub policy: ChangesetCapacityPolicy,
    pub cancel: CancelToken,
    pub events: EventSink,
}

impl UploadContext {
    pub fn new(api: Arc<dyn RemoteApi>, policy: ChangesetCapacityPolicy) -> Self {
        Self {
            api,
            policy,
            cancel: CancelToken::new(),
            events: EventSink::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }
}

/// What an upload task did
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub outcome: Outcome,

    /// Server confirmations, including objects skipped as already deleted
    pub processed: Vec<ProcessedObject>,

    /// Objects still pending, in upload order
    pub remaining: Vec<ObjectId>,

    /// Changeset the task ended with
    pub changeset: Changeset,

    /// Ids of every changeset the task uploaded into
    pub changesets_used: Vec<u64>,

    pub batches_submitted: usize,
    pub overflow_choice: Option<OverflowChoice>,

    /// Failure of a close request; does not change the outcome
    pub close_error: Option<Arc<SyncError>>,
}

impl UploadReport {
    /// Number of objects that left the pending set
    pub fn uploaded(&self) -> usize {
        self.processed.len()
    }
}

/// Uploads the pending objects of one layer
pub struct LayerUploadTask {
    layer: SharedLayer,
    name: String,
    pending: PendingObjectSet,
    changeset: Changeset,
    spec: UploadStrategySpecification,
    ctx: UploadContext,
    state: UploadState,
    processed: Vec<ProcessedObject>,
    changesets_used: Vec<u64>,
    batches_submitted: usize,
    overflow_choice: Option<OverflowChoice>,
    close_error: Option<Arc<SyncError>>,
    /// Current changeset was opened by this task
    opened_current: bool,
    /// Objects the current changeset accepted from this task
    accepted_by_current: usize,
}

impl LayerUploadTask {
    pub fn new(
        layer: SharedLayer,
        pending: PendingObjectSet,
        changeset: Changeset,
        spec: UploadStrategySpecification,
        ctx: UploadContext,
    ) -> Result<Self> {
        let name = lock_layer(&layer)?.name().to_string();
        Ok(Self {
            layer,
            name,
            pending,
            changeset,
            spec,
            ctx,
            state: UploadState::Preparing,
            processed: Vec::new(),
            changesets_used: Vec::new(),
            batches_submitted: 0,
            overflow_choice: None,
            close_error: None,
            opened_current: false,
            accepted_by_current: 0,
        })
    }

    /// Task uploading everything the layer currently wants to upload
    pub fn for_layer(
        layer: SharedLayer,
        changeset: Changeset,
        spec: UploadStrategySpecification,
        ctx: UploadContext,
    ) -> Result<Self> {
        let pending = PendingObjectSet::new(lock_layer(&layer)?.objects_to_upload());
        Self::new(layer, pending, changeset, spec, ctx)
    }

    pub fn pending(&self) -> &PendingObjectSet {
        &self.pending
    }

    /// Run the task to completion
    pub fn run(mut self) -> UploadReport {
        tracing::info!(
            layer = %self.name,
            objects = self.pending.len(),
            strategy = %self.spec.strategy,
            "Starting upload"
        );

        let outcome = match self.upload_all() {
            Ok(()) => {
                self.close_when_done();
                Outcome::Ok
            }
            Err(err) => Outcome::from_error(err),
        };

        match &outcome {
            Outcome::Ok => {
                self.transition(UploadState::Success);
                tracing::info!(
                    layer = %self.name,
                    uploaded = self.processed.len(),
                    batches = self.batches_submitted,
                    "Upload finished"
                );
            }
            Outcome::Canceled => {
                self.transition(UploadState::Canceled);
                tracing::info!(
                    layer = %self.name,
                    uploaded = self.processed.len(),
                    remaining = self.pending.len(),
                    "Upload canceled"
                );
            }
            Outcome::Failed(err) => {
                self.transition(UploadState::Failed);
                tracing::error!(
                    layer = %self.name,
                    remaining = self.pending.len(),
                    error = %err,
                    "Upload failed"
                );
            }
        }

        self.cleanup_layer();

        UploadReport {
            outcome,
            processed: self.processed,
            remaining: self.pending.ids(),
            changeset: self.changeset,
            changesets_used: self.changesets_used,
            batches_submitted: self.batches_submitted,
            overflow_choice: self.overflow_choice,
            close_error: self.close_error,
        }
    }

    fn transition(&mut self, state: UploadState) {
        if self.state != state {
            tracing::debug!(layer = %self.name, from = %self.state, to = %state, "Upload state changed");
            self.state = state;
        }
    }

    fn upload_all(&mut self) -> Result<()> {
        self.transition(UploadState::Preparing);
        self.spec
            .validate(self.pending.len(), self.ctx.api.capabilities())?;
        if !self.changeset.is_new() {
            if !self.changeset.is_open() {
                return Err(SyncError::ChangesetAlreadyClosed {
                    changeset_id: self.changeset.id,
                });
            }
            self.changesets_used.push(self.changeset.id);
        }

        self.transition(UploadState::Uploading);
        while !self.pending.is_empty() {
            if self.ctx.cancel.is_canceled() {
                return Err(SyncError::Canceled);
            }
            self.ensure_changeset()?;

            let len = self.spec.strategy.batch_len(self.pending.len());
            let batch: Vec<EditObject> = self.pending.next_batch(len).to_vec();
            self.batches_submitted += 1;
            tracing::debug!(
                layer = %self.name,
                changeset = self.changeset.id,
                batch = self.batches_submitted,
                size = batch.len(),
                "Submitting batch"
            );
            self.ctx.events.progress(
                &self.name,
                format!(
                    "Uploading {} object(s) to changeset {}",
                    batch.len(),
                    self.changeset.id
                ),
            );

            match self
                .ctx
                .api
                .upload_batch(&self.changeset, &batch, &self.ctx.cancel)
            {
                Ok(processed) => self.accept(processed)?,
                Err(ApiError::ObjectGone { object }) => self.recover_gone(object)?,
                Err(err) if err.is_changeset_full() => self.recover_full()?,
                Err(err @ ApiError::ChangesetClosed { .. }) => {
                    self.changeset.mark_closed();
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn ensure_changeset(&mut self) -> Result<()> {
        if !self.changeset.is_new() {
            return Ok(());
        }
        let opened = self
            .ctx
            .api
            .open_changeset(&self.changeset.tags, &self.ctx.cancel)?;
        tracing::info!(layer = %self.name, changeset = opened.id, "Opened changeset");
        self.changesets_used.push(opened.id);
        self.changeset = opened;
        self.opened_current = true;
        self.accepted_by_current = 0;
        Ok(())
    }

    fn accept(&mut self, processed: Vec<ProcessedObject>) -> Result<()> {
        let ids: Vec<ObjectId> = processed.iter().map(|p| p.id).collect();
        let removed = self.pending.remove(&ids);
        if removed == 0 {
            // Would otherwise resubmit the same batch forever.
            return Err(SyncError::Internal(format!(
                "server confirmed none of the objects submitted to changeset {}",
                self.changeset.id
            )));
        }
        self.accepted_by_current += removed;
        self.processed.extend(processed);
        Ok(())
    }

    fn recover_gone(&mut self, object: Option<ObjectId>) -> Result<()> {
        self.transition(UploadState::RecoveringGone);
        let gone = ApiError::ObjectGone { object };
        let Some(id) = object else {
            return Err(gone.into());
        };
        let known_deleted = lock_layer(&self.layer)?
            .object(id)
            .filter(|o| o.deleted)
            .map(|o| o.version);

        match known_deleted {
            Some(version) if self.pending.contains(id) => {
                tracing::warn!(
                    layer = %self.name,
                    object = %id,
                    "{} is already deleted. Skipping object in upload.",
                    id
                );
                self.pending.remove(&[id]);
                self.processed.push(ProcessedObject::skipped(id, version));
                self.transition(UploadState::Uploading);
                Ok(())
            }
            _ => Err(gone.into()),
        }
    }

    fn recover_full(&mut self) -> Result<()> {
        self.transition(UploadState::RecoveringFull);
        let changeset_id = self.changeset.id;
        let remaining = self.pending.len();
        if remaining == 0 {
            self.changeset.mark_closed();
            return Err(SyncError::ChangesetFull {
                changeset_id,
                remaining,
                choice: None,
            });
        }
        if self.opened_current && self.accepted_by_current == 0 {
            // Nothing fits into a fresh changeset.
            tracing::warn!(
                layer = %self.name,
                changeset = changeset_id,
                remaining,
                "New changeset is full before accepting any object"
            );
            self.changeset.mark_closed();
            return Err(SyncError::ChangesetFull {
                changeset_id,
                remaining,
                choice: None,
            });
        }

        let choice = self.ctx.policy.decide(remaining);
        self.overflow_choice = Some(choice);
        tracing::info!(
            layer = %self.name,
            changeset = changeset_id,
            remaining,
            %choice,
            "Changeset is full"
        );

        match choice {
            OverflowChoice::ReopenAndContinue => {
                if self.spec.close_changeset_after_upload {
                    self.close_current();
                }
                self.changeset.mark_closed();
                self.changeset = self.changeset.successor();
                self.ctx.events.progress(
                    &self.name,
                    format!("Changeset {} is full, continuing in a new one", changeset_id),
                );
                self.transition(UploadState::Uploading);
                Ok(())
            }
            OverflowChoice::Abort | OverflowChoice::ReturnToCaller => {
                self.changeset.mark_closed();
                Err(SyncError::ChangesetFull {
                    changeset_id,
                    remaining,
                    choice: Some(choice),
                })
            }
        }
    }

    fn close_when_done(&mut self) {
        if self.spec.close_changeset_after_upload
            && !self.changeset.is_new()
            && self.changeset.is_open()
        {
            self.transition(UploadState::Closing);
            self.close_current();
        }
    }

    fn close_current(&mut self) {
        match self
            .ctx
            .api
            .close_changeset(&self.changeset, &self.ctx.cancel)
        {
            Ok(()) => {
                tracing::info!(layer = %self.name, changeset = self.changeset.id, "Closed changeset");
                self.changeset.mark_closed();
            }
            Err(err) => {
                tracing::warn!(
                    layer = %self.name,
                    changeset = self.changeset.id,
                    error = %err,
                    "Failed to close changeset"
                );
                self.close_error = Some(Arc::new(err.into()));
            }
        }
    }

    fn cleanup_layer(&mut self) {
        if self.processed.is_empty() {
            return;
        }
        match lock_layer(&self.layer) {
            Ok(mut layer) => {
                layer.cleanup_after_upload(&self.processed);
                layer.on_post_upload();
            }
            Err(err) => {
                tracing::warn!(layer = %self.name, error = %err, "Skipping post-upload cleanup");
            }
        }
    }
}
