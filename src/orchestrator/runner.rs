//! Save-and-upload sessions
//!
//! [`SaveAndUploadOrchestrator`] runs the uploads and then the saves of a
//! set of layers on a single background worker, one task at a time, and
//! records one outcome per (layer, action).

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use super::action::LayerActionInfo;
use super::model::{Mode, ModelEvent, OrchestrationModel};
use super::summary::Summary;
use super::worker::TaskWorker;
use crate::api::RemoteApi;
use crate::cancel::CancelToken;
use crate::config::SyncSettings;
use crate::error::{Result, SyncError};
use crate::outcome::Outcome;
use crate::save::{JsonLayerWriter, LayerSaveTask, LayerWriter};
use crate::upload::{
    ChangesetCapacityPolicy, LayerUploadTask, OverflowDecisionSource, PendingObjectSet,
    UploadContext, UploadReport,
};

/// Check consulted before a layer is uploaded; `Err` vetoes the upload
pub trait UploadHook: Send + Sync {
    fn check_upload(&self, layer: &str, pending: &PendingObjectSet) -> std::result::Result<(), String>;
}

impl<F> UploadHook for F
where
    F: Fn(&str, &PendingObjectSet) -> std::result::Result<(), String> + Send + Sync,
{
    fn check_upload(&self, layer: &str, pending: &PendingObjectSet) -> std::result::Result<(), String> {
        self(layer, pending)
    }
}

/// Cancels a session from any thread.
///
/// The request is kept until the session ends and forwarded to the task
/// currently running, if any. A request made while no session runs applies
/// to the next one.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    state: Arc<Mutex<CancelState>>,
}

#[derive(Debug, Default)]
struct CancelState {
    requested: bool,
    current: Option<CancelToken>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        tracing::info!("Cancel requested");
        let current = {
            let mut state = self.lock();
            state.requested = true;
            state.current.take()
        };
        if let Some(task) = current {
            task.cancel();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.lock().requested
    }

    fn lock(&self) -> MutexGuard<'_, CancelState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Token for the next task, or `None` once the session is canceled
    fn begin_task(&self) -> Option<CancelToken> {
        let mut state = self.lock();
        if state.requested {
            return None;
        }
        let token = CancelToken::new();
        state.current = Some(token.clone());
        Some(token)
    }

    fn end_task(&self) {
        self.lock().current.take();
    }

    fn end_session(&self) {
        let mut state = self.lock();
        state.requested = false;
        state.current = None;
    }
}

/// Coordinates the uploads and saves of one session
pub struct SaveAndUploadOrchestrator {
    model: OrchestrationModel,
    api: Arc<dyn RemoteApi>,
    writer: Arc<dyn LayerWriter>,
    policy: ChangesetCapacityPolicy,
    hooks: Vec<Arc<dyn UploadHook>>,
    cancel: CancelHandle,
    worker: TaskWorker,
}

impl SaveAndUploadOrchestrator {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        writer: Arc<dyn LayerWriter>,
        policy: ChangesetCapacityPolicy,
    ) -> Result<Self> {
        Ok(Self {
            model: OrchestrationModel::new(),
            api,
            writer,
            policy,
            hooks: Vec::new(),
            cancel: CancelHandle::default(),
            worker: TaskWorker::spawn("edit-sync-worker")?,
        })
    }

    /// Orchestrator writing JSON files; a preset overflow policy in the
    /// settings takes precedence over `source`.
    pub fn with_settings(
        api: Arc<dyn RemoteApi>,
        settings: &SyncSettings,
        source: impl OverflowDecisionSource + 'static,
    ) -> Result<Self> {
        let policy = match settings.upload.overflow_policy {
            Some(choice) => ChangesetCapacityPolicy::preset(choice),
            None => ChangesetCapacityPolicy::new(source),
        };
        let writer = Arc::new(JsonLayerWriter::new(settings.save.pretty));
        Self::new(api, writer, policy)
    }

    pub fn add_upload_hook(&mut self, hook: impl UploadHook + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    pub fn model(&self) -> &OrchestrationModel {
        &self.model
    }

    pub fn subscribe(&self) -> Receiver<ModelEvent> {
        self.model.subscribe()
    }

    pub fn policy(&self) -> &ChangesetCapacityPolicy {
        &self.policy
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run every upload, then every save, and summarize the outcomes.
    ///
    /// Per-layer failures end up in the summary; only an invalid action set
    /// is returned as an error.
    pub fn run(&mut self, actions: Vec<LayerActionInfo>) -> Result<Summary> {
        validate_actions(&actions)?;

        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("session", id = %session_id);
        let _guard = span.enter();
        let started_at = Utc::now();

        self.model.populate(actions)?;
        self.policy.reset();
        self.model.set_mode(Mode::Running);
        tracing::info!(
            uploads = self.model.layers_to_upload().len(),
            saves = self.model.layers_to_save().len(),
            "Session started"
        );

        for index in self.model.layers_to_upload() {
            let outcome = self.upload_layer(index);
            self.model.set_upload_outcome(index, outcome);
        }
        for index in self.model.layers_to_save() {
            let outcome = self.save_layer(index);
            self.model.set_save_outcome(index, outcome);
        }

        self.cancel.end_session();
        self.model.set_mode(Mode::Editing);
        let summary = Summary::from_infos(session_id, started_at, self.model.infos());
        if summary.has_unsaved_data() {
            tracing::warn!(
                failed = summary.failed,
                canceled = summary.canceled,
                "{} action(s) did not complete, some changes are neither uploaded nor saved",
                summary.num_problems()
            );
        }
        tracing::info!(
            ok = summary.ok,
            failed = summary.failed,
            canceled = summary.canceled,
            "Session finished"
        );
        Ok(summary)
    }

    fn upload_layer(&mut self, index: usize) -> Outcome {
        let Some(info) = self.model.info(index) else {
            return Outcome::failed(SyncError::Internal(format!("no layer at {}", index)));
        };
        let layer = info.layer.clone();
        let name = info.name.clone();
        let changeset = info.changeset.clone();
        let strategy = info.strategy;

        let Some(cancel) = self.cancel.begin_task() else {
            tracing::info!(layer = %name, "Upload skipped, session canceled");
            return Outcome::Canceled;
        };
        let ctx = UploadContext::new(self.api.clone(), self.policy.clone())
            .with_cancel(cancel)
            .with_events(self.model.events().clone());
        let hooks = self.hooks.clone();

        let result = self.worker.execute(move || -> Result<UploadReport> {
            let task = LayerUploadTask::for_layer(layer, changeset, strategy, ctx)?;
            for hook in &hooks {
                hook.check_upload(&name, task.pending())
                    .map_err(|reason| SyncError::PreUploadCheckFailed {
                        layer: name.clone(),
                        reason,
                    })?;
            }
            Ok(task.run())
        });
        self.cancel.end_task();

        match result.and_then(|report| report) {
            Ok(report) => {
                if let Some(info) = self.model.info_mut(index) {
                    info.uploaded = report.uploaded();
                    info.residual = report.remaining;
                    info.changeset = report.changeset;
                }
                report.outcome
            }
            Err(err) => {
                tracing::warn!(layer = index, error = %err, "Upload not started");
                Outcome::from_error(err)
            }
        }
    }

    fn save_layer(&mut self, index: usize) -> Outcome {
        let Some(info) = self.model.info(index).cloned() else {
            return Outcome::failed(SyncError::Internal(format!("no layer at {}", index)));
        };
        let Some(cancel) = self.cancel.begin_task() else {
            tracing::info!(layer = %info.name, "Save skipped, session canceled");
            return Outcome::Canceled;
        };
        let task = LayerSaveTask::new(self.writer.clone(), cancel, self.model.events().clone());

        let result = self.worker.execute(move || {
            let mut info = info;
            let outcome = task.run(&mut info);
            (outcome, info.save_precondition)
        });
        self.cancel.end_task();

        match result {
            Ok((outcome, precondition)) => {
                if let Some(info) = self.model.info_mut(index) {
                    info.save_precondition = precondition;
                }
                outcome
            }
            Err(err) => Outcome::from_error(err),
        }
    }
}

/// Reject action sets the session cannot run
fn validate_actions(actions: &[LayerActionInfo]) -> Result<()> {
    for (i, info) in actions.iter().enumerate() {
        if info.do_save && info.file.is_none() {
            return Err(SyncError::InvalidActionSet {
                reason: format!("layer '{}' is to be saved but has no file", info.name),
            });
        }
        let layer_ptr = Arc::as_ptr(&info.layer) as *const ();
        if actions[..i]
            .iter()
            .any(|other| Arc::as_ptr(&other.layer) as *const () == layer_ptr)
        {
            return Err(SyncError::InvalidActionSet {
                reason: format!("layer '{}' appears more than once", info.name),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryServer;
    use crate::data::{share_layer, DataLayer, EditObject, ObjectId};
    use crate::upload::{FixedDecision, OverflowChoice};

    fn orchestrator() -> SaveAndUploadOrchestrator {
        SaveAndUploadOrchestrator::new(
            Arc::new(InMemoryServer::new()),
            Arc::new(JsonLayerWriter::default()),
            ChangesetCapacityPolicy::new(FixedDecision(OverflowChoice::Abort)),
        )
        .unwrap()
    }

    fn modified_layer(name: &str) -> crate::data::SharedLayer {
        share_layer(
            DataLayer::new(name).with_objects(vec![EditObject::modified(ObjectId::node(1), 1)]),
        )
    }

    #[test]
    fn test_save_without_file_is_rejected() {
        let info = LayerActionInfo::from_layer(modified_layer("a"), &SyncSettings::default())
            .unwrap()
            .with_save(true);
        let err = orchestrator().run(vec![info]).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ACTION_SET");
    }

    #[test]
    fn test_duplicate_layer_is_rejected() {
        let layer = modified_layer("a");
        let settings = SyncSettings::default();
        let first = LayerActionInfo::from_layer(layer.clone(), &settings).unwrap();
        let second = LayerActionInfo::from_layer(layer, &settings).unwrap();
        let mut orchestrator = orchestrator();
        assert!(orchestrator.run(vec![first, second]).is_err());
        assert_eq!(orchestrator.model().mode(), Mode::Editing);
    }

    #[test]
    fn test_hook_vetoes_upload() {
        let server = Arc::new(InMemoryServer::new());
        let mut orchestrator = SaveAndUploadOrchestrator::new(
            server.clone(),
            Arc::new(JsonLayerWriter::default()),
            ChangesetCapacityPolicy::preset(OverflowChoice::Abort),
        )
        .unwrap();
        orchestrator.add_upload_hook(|layer: &str, pending: &PendingObjectSet| {
            if !pending.is_empty() && layer == "blocked" {
                Err("validation found errors".to_string())
            } else {
                Ok(())
            }
        });
        let info =
            LayerActionInfo::from_layer(modified_layer("blocked"), &SyncSettings::default()).unwrap();

        let summary = orchestrator.run(vec![info]).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(
            orchestrator.model().infos()[0]
                .upload_outcome
                .as_ref()
                .and_then(Outcome::error)
                .map(|e| e.error_code()),
            Some("PRE_UPLOAD_CHECK_FAILED")
        );
        assert!(server.calls().is_empty());
    }

    #[test]
    fn test_canceled_session_skips_every_task() {
        let mut orchestrator = orchestrator();
        orchestrator.cancel();
        let settings = SyncSettings::default();
        let infos = vec![
            LayerActionInfo::from_layer(modified_layer("a"), &settings).unwrap(),
            LayerActionInfo::from_layer(modified_layer("b"), &settings).unwrap(),
        ];

        let summary = orchestrator.run(infos).unwrap();
        assert_eq!(summary.canceled, 2);
        assert_eq!(summary.ok + summary.failed, 0);
    }
}
