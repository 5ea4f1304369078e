//! Per-layer action records

use std::fmt;
use std::path::PathBuf;

use crate::config::SyncSettings;
use crate::data::{lock_layer, Changeset, ObjectId, SharedLayer};
use crate::error::Result;
use crate::outcome::Outcome;
use crate::upload::UploadStrategySpecification;

/// What to do with one layer during a session, and what came of it
#[derive(Clone)]
pub struct LayerActionInfo {
    pub layer: SharedLayer,
    pub name: String,
    pub do_upload: bool,
    pub do_save: bool,
    pub file: Option<PathBuf>,
    pub upload_outcome: Option<Outcome>,
    pub save_outcome: Option<Outcome>,

    /// Changeset to upload into; replaced by the one the upload ended with
    pub changeset: Changeset,
    pub strategy: UploadStrategySpecification,

    /// Objects the last upload left pending
    pub residual: Vec<ObjectId>,

    /// Number of objects the last upload got confirmed
    pub uploaded: usize,

    /// Result of the save precondition check, evaluated once
    pub save_precondition: Option<bool>,
}

impl LayerActionInfo {
    /// Create the record from the layer's current state and the settings defaults
    pub fn from_layer(layer: SharedLayer, settings: &SyncSettings) -> Result<Self> {
        let (name, do_upload, do_save, file) = {
            let guard = lock_layer(&layer)?;
            (
                guard.name().to_string(),
                guard.requires_upload(),
                guard.requires_save(),
                guard.associated_file().map(|p| p.to_path_buf()),
            )
        };
        Ok(Self {
            layer,
            name,
            do_upload,
            do_save,
            file,
            upload_outcome: None,
            save_outcome: None,
            changeset: settings.initial_changeset(),
            strategy: settings.strategy_spec(),
            residual: Vec::new(),
            uploaded: 0,
            save_precondition: None,
        })
    }

    pub fn with_upload(mut self, do_upload: bool) -> Self {
        self.do_upload = do_upload;
        self
    }

    pub fn with_save(mut self, do_save: bool) -> Self {
        self.do_save = do_save;
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_changeset(mut self, changeset: Changeset) -> Self {
        self.changeset = changeset;
        self
    }

    pub fn with_strategy(mut self, strategy: UploadStrategySpecification) -> Self {
        self.strategy = strategy;
        self
    }

    /// True once every requested action has an outcome
    pub fn is_finished(&self) -> bool {
        (!self.do_upload || self.upload_outcome.is_some())
            && (!self.do_save || self.save_outcome.is_some())
    }
}

impl fmt::Debug for LayerActionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerActionInfo")
            .field("name", &self.name)
            .field("do_upload", &self.do_upload)
            .field("do_save", &self.do_save)
            .field("file", &self.file)
            .field("upload_outcome", &self.upload_outcome)
            .field("save_outcome", &self.save_outcome)
            .field("changeset", &self.changeset.id)
            .field("residual", &self.residual.len())
            .finish()
    }
}
