//! Session settings
//!
//! Defaults for upload strategy, changeset handling and file output. Every
//! field has a default so a settings file only needs the values it changes.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::{Changeset, Tags};
use crate::error::{Result, SyncError};
use crate::upload::{
    OverflowChoice, UploadStrategy, UploadStrategySpecification, DEFAULT_CHUNK_SIZE,
};

/// Strategy selector as written in settings files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SingleRequest,
    #[default]
    Chunked,
    PerObject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub strategy: StrategyKind,
    pub chunk_size: usize,
    pub close_changeset_after_upload: bool,

    /// Preset answer for changeset overflows; when set nobody is asked
    pub overflow_policy: Option<OverflowChoice>,

    /// Tags for every changeset opened by a session
    pub changeset_tags: Tags,
}

impl Default for UploadSettings {
    fn default() -> Self {
        let mut changeset_tags = Tags::new();
        changeset_tags.insert(
            "created_by".to_string(),
            format!("edit-sync/{}", env!("CARGO_PKG_VERSION")),
        );
        Self {
            strategy: StrategyKind::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            close_changeset_after_upload: true,
            overflow_policy: None,
            changeset_tags,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveSettings {
    /// Indent written layer files
    pub pretty: bool,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self { pretty: true }
    }
}

/// All settings of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub upload: UploadSettings,
    pub save: SaveSettings,
}

impl SyncSettings {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| SyncError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| SyncError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn strategy(&self) -> UploadStrategy {
        match self.upload.strategy {
            StrategyKind::SingleRequest => UploadStrategy::SingleRequest,
            StrategyKind::Chunked => UploadStrategy::Chunked {
                chunk_size: self.upload.chunk_size,
            },
            StrategyKind::PerObject => UploadStrategy::PerObject,
        }
    }

    pub fn strategy_spec(&self) -> UploadStrategySpecification {
        UploadStrategySpecification::new(self.strategy(), self.upload.close_changeset_after_upload)
    }

    /// Fresh changeset carrying the configured tags
    pub fn initial_changeset(&self) -> Changeset {
        Changeset::new(self.upload.changeset_tags.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(
            settings.strategy(),
            UploadStrategy::Chunked { chunk_size: 1000 }
        );
        assert!(settings.upload.close_changeset_after_upload);
        assert!(settings.upload.changeset_tags.contains_key("created_by"));
        assert!(settings.initial_changeset().is_new());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"upload": {{"strategy": "per_object", "overflow_policy": "reopen_and_continue"}}}}"#
        )
        .unwrap();

        let settings = SyncSettings::load(file.path()).unwrap();
        assert_eq!(settings.strategy(), UploadStrategy::PerObject);
        assert_eq!(
            settings.upload.overflow_policy,
            Some(OverflowChoice::ReopenAndContinue)
        );
        assert_eq!(settings.upload.chunk_size, 1000);
        assert!(settings.save.pretty);
    }

    #[test]
    fn test_load_reports_path() {
        let err = SyncSettings::load(Path::new("/nonexistent/edit-sync.json")).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("/nonexistent/edit-sync.json"));
    }
}
