//! Observable orchestration state
//!
//! Holds the current mode and one [`LayerActionInfo`] per layer. State
//! changes are published as [`ModelEvent`]s to every subscriber.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::action::LayerActionInfo;
use crate::error::{Result, SyncError};
use crate::outcome::{Outcome, OutcomeKind};

/// Whether the layers may be edited or a session is running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Editing,
    Running,
}

/// State change published by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ModelEvent {
    ModeChanged { mode: Mode },
    UploadStateChanged { layer: String, outcome: OutcomeKind },
    SaveStateChanged { layer: String, outcome: OutcomeKind },
    Progress { layer: String, message: String },
}

/// Fan-out of model events to any number of channel subscribers
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    subscribers: Arc<Mutex<Vec<Sender<ModelEvent>>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ModelEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Publish an event; subscribers that hung up are dropped.
    pub fn emit(&self, event: ModelEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn progress(&self, layer: &str, message: impl Into<String>) {
        self.emit(ModelEvent::Progress {
            layer: layer.to_string(),
            message: message.into(),
        });
    }
}

/// Mode plus per-layer actions and outcomes
#[derive(Debug, Default)]
pub struct OrchestrationModel {
    mode: Mode,
    infos: Vec<LayerActionInfo>,
    events: EventSink,
}

impl OrchestrationModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the layers to act on; only allowed while editing
    pub fn populate(&mut self, infos: Vec<LayerActionInfo>) -> Result<()> {
        if self.mode == Mode::Running {
            return Err(SyncError::InvalidActionSet {
                reason: "cannot repopulate while a session is running".to_string(),
            });
        }
        self.infos = infos;
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode == mode {
            return;
        }
        tracing::debug!(from = ?self.mode, to = ?mode, "Orchestration mode changed");
        self.mode = mode;
        self.events.emit(ModelEvent::ModeChanged { mode });
    }

    pub fn infos(&self) -> &[LayerActionInfo] {
        &self.infos
    }

    pub fn info(&self, index: usize) -> Option<&LayerActionInfo> {
        self.infos.get(index)
    }

    pub fn info_mut(&mut self, index: usize) -> Option<&mut LayerActionInfo> {
        self.infos.get_mut(index)
    }

    /// Indices of the layers to upload, in order
    pub fn layers_to_upload(&self) -> Vec<usize> {
        self.indices(|info| info.do_upload)
    }

    /// Indices of the layers to save, in order
    pub fn layers_to_save(&self) -> Vec<usize> {
        self.indices(|info| info.do_save)
    }

    fn indices(&self, predicate: impl Fn(&LayerActionInfo) -> bool) -> Vec<usize> {
        self.infos
            .iter()
            .enumerate()
            .filter(|(_, info)| predicate(info))
            .map(|(index, _)| index)
            .collect()
    }

    /// Record the upload outcome of a layer.
    ///
    /// Returns false, leaving the model untouched, if an outcome was already
    /// recorded for this layer.
    pub fn set_upload_outcome(&mut self, index: usize, outcome: Outcome) -> bool {
        let Some(info) = self.infos.get_mut(index) else {
            return false;
        };
        if let Some(existing) = &info.upload_outcome {
            tracing::warn!(layer = %info.name, %existing, "Upload outcome already recorded");
            return false;
        }
        let event = ModelEvent::UploadStateChanged {
            layer: info.name.clone(),
            outcome: outcome.kind(),
        };
        info.upload_outcome = Some(outcome);
        self.events.emit(event);
        true
    }

    /// Record the save outcome of a layer; never overwrites.
    pub fn set_save_outcome(&mut self, index: usize, outcome: Outcome) -> bool {
        let Some(info) = self.infos.get_mut(index) else {
            return false;
        };
        if let Some(existing) = &info.save_outcome {
            tracing::warn!(layer = %info.name, %existing, "Save outcome already recorded");
            return false;
        }
        let event = ModelEvent::SaveStateChanged {
            layer: info.name.clone(),
            outcome: outcome.kind(),
        };
        info.save_outcome = Some(outcome);
        self.events.emit(event);
        true
    }

    pub fn num_failures(&self) -> usize {
        self.count(Outcome::is_failed)
    }

    pub fn num_cancellations(&self) -> usize {
        self.count(Outcome::is_canceled)
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.infos
            .iter()
            .flat_map(|info| [&info.upload_outcome, &info.save_outcome])
            .flatten()
            .filter(|outcome| predicate(*outcome))
            .count()
    }

    pub fn subscribe(&self) -> Receiver<ModelEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::data::{share_layer, DataLayer};
    use pretty_assertions::assert_eq;

    fn info(name: &str, upload: bool, save: bool) -> LayerActionInfo {
        LayerActionInfo::from_layer(share_layer(DataLayer::new(name)), &SyncSettings::default())
            .unwrap()
            .with_upload(upload)
            .with_save(save)
    }

    #[test]
    fn test_mode_changes_are_published() {
        let mut model = OrchestrationModel::new();
        let events = model.subscribe();
        model.set_mode(Mode::Running);
        model.set_mode(Mode::Running);
        model.set_mode(Mode::Editing);

        let received: Vec<ModelEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                ModelEvent::ModeChanged {
                    mode: Mode::Running
                },
                ModelEvent::ModeChanged {
                    mode: Mode::Editing
                },
            ]
        );
    }

    #[test]
    fn test_outcomes_are_never_overwritten() {
        let mut model = OrchestrationModel::new();
        model.populate(vec![info("a", true, false)]).unwrap();

        assert!(model.set_upload_outcome(0, Outcome::Canceled));
        assert!(!model.set_upload_outcome(0, Outcome::Ok));
        assert!(model.info(0).unwrap().upload_outcome.as_ref().unwrap().is_canceled());
        assert_eq!(model.num_cancellations(), 1);
        assert_eq!(model.num_failures(), 0);
    }

    #[test]
    fn test_action_selection() {
        let mut model = OrchestrationModel::new();
        model
            .populate(vec![
                info("a", true, false),
                info("b", false, true),
                info("c", true, true),
            ])
            .unwrap();
        assert_eq!(model.layers_to_upload(), vec![0, 2]);
        assert_eq!(model.layers_to_save(), vec![1, 2]);
    }

    #[test]
    fn test_populate_refused_while_running() {
        let mut model = OrchestrationModel::new();
        model.set_mode(Mode::Running);
        assert!(model.populate(Vec::new()).is_err());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let sink = EventSink::new();
        drop(sink.subscribe());
        let live = sink.subscribe();
        sink.progress("a", "working");
        assert_eq!(live.try_iter().count(), 1);
        assert_eq!(sink.subscribers.lock().unwrap().len(), 1);
    }
}
