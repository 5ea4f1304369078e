//! Save of one layer

use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::data::lock_layer;
use crate::error::{Result, SyncError};
use crate::orchestrator::{EventSink, LayerActionInfo};
use crate::outcome::Outcome;

use super::writer::LayerWriter;

/// Writes one layer to its target file
#[derive(Clone)]
pub struct LayerSaveTask {
    writer: Arc<dyn LayerWriter>,
    cancel: CancelToken,
    events: EventSink,
}

impl LayerSaveTask {
    pub fn new(writer: Arc<dyn LayerWriter>, cancel: CancelToken, events: EventSink) -> Self {
        Self {
            writer,
            cancel,
            events,
        }
    }

    /// Save the layer of `info` to `info.file`.
    ///
    /// The layer's save conditions are checked once per info; a failed check
    /// ends the task as FAILED without touching the filesystem.
    pub fn run(&self, info: &mut LayerActionInfo) -> Outcome {
        match self.save(info) {
            Ok(()) => {
                tracing::info!(layer = %info.name, "Layer saved");
                Outcome::Ok
            }
            Err(err) if err.is_cancellation() => {
                tracing::info!(layer = %info.name, "Save canceled");
                Outcome::Canceled
            }
            Err(err) => {
                tracing::error!(layer = %info.name, error = %err, "Save failed");
                Outcome::failed(err)
            }
        }
    }

    fn save(&self, info: &mut LayerActionInfo) -> Result<()> {
        if self.cancel.is_canceled() {
            return Err(SyncError::Canceled);
        }

        let precondition = match info.save_precondition {
            Some(checked) => checked,
            None => {
                let checked = lock_layer(&info.layer)?.check_save_conditions();
                info.save_precondition = Some(checked);
                checked
            }
        };
        if !precondition {
            return Err(SyncError::SaveConditionsNotMet {
                layer: info.name.clone(),
            });
        }

        let path = info.file.clone().ok_or_else(|| SyncError::MissingSaveTarget {
            layer: info.name.clone(),
        })?;

        self.events
            .progress(&info.name, format!("Saving to {}", path.display()));
        let snapshot = lock_layer(&info.layer)?.snapshot();
        self.writer.write_layer(&snapshot, &path, &self.cancel)?;

        let mut layer = lock_layer(&info.layer)?;
        layer.set_associated_file(path);
        layer.on_post_save();
        Ok(())
    }
}
