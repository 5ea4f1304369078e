//! Layer file writers

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::data::LayerSnapshot;
use crate::error::{Result, SyncError};

const WRITE_CHUNK: usize = 64 * 1024;

/// Filesystem collaborator of the save task
pub trait LayerWriter: Send + Sync {
    /// Write `snapshot` to `path`.
    ///
    /// Must return [`SyncError::Canceled`] when `cancel` fires mid-write and
    /// leave no partial file behind.
    fn write_layer(&self, snapshot: &LayerSnapshot, path: &Path, cancel: &CancelToken) -> Result<()>;
}

/// Writes layers as JSON through a temporary sibling file
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLayerWriter {
    pub pretty: bool,
}

impl JsonLayerWriter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn encode(&self, snapshot: &LayerSnapshot) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(snapshot)?
        } else {
            serde_json::to_vec(snapshot)?
        };
        Ok(bytes)
    }

    fn write_chunks(&self, bytes: &[u8], temp: &Path, cancel: &CancelToken) -> Result<()> {
        let file = File::create(temp).map_err(|e| file_write(temp, e))?;
        let mut writer = BufWriter::new(file);
        for chunk in bytes.chunks(WRITE_CHUNK) {
            if cancel.is_canceled() {
                return Err(SyncError::Canceled);
            }
            writer.write_all(chunk).map_err(|e| file_write(temp, e))?;
        }
        writer.flush().map_err(|e| file_write(temp, e))?;
        Ok(())
    }
}

impl LayerWriter for JsonLayerWriter {
    fn write_layer(&self, snapshot: &LayerSnapshot, path: &Path, cancel: &CancelToken) -> Result<()> {
        let bytes = self.encode(snapshot)?;
        let temp = temp_path(path);

        if let Err(err) = self.write_chunks(&bytes, &temp, cancel) {
            let _ = fs::remove_file(&temp);
            return Err(err);
        }
        if cancel.is_canceled() {
            let _ = fs::remove_file(&temp);
            return Err(SyncError::Canceled);
        }
        fs::rename(&temp, path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            file_write(path, e)
        })?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Layer written");
        Ok(())
    }
}

fn file_write(path: &Path, source: std::io::Error) -> SyncError {
    SyncError::FileWrite {
        path: path.to_path_buf(),
        source,
    }
}

/// `dir/.name.part` next to the target
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "layer".to_string());
    path.with_file_name(format!(".{}.part", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{EditObject, ObjectId};

    fn snapshot() -> LayerSnapshot {
        LayerSnapshot {
            name: "buildings".to_string(),
            objects: vec![EditObject::modified(ObjectId::way(3), 2).with_tag("building", "yes")],
        }
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buildings.json");

        JsonLayerWriter::new(true)
            .write_layer(&snapshot(), &path, &CancelToken::new())
            .unwrap();

        let read: LayerSnapshot = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(read, snapshot());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_canceled_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buildings.json");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = JsonLayerWriter::default()
            .write_layer(&snapshot(), &path, &cancel)
            .unwrap_err();
        assert!(err.is_cancellation());
        assert!(!path.exists());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_missing_directory_is_file_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("buildings.json");

        let err = JsonLayerWriter::default()
            .write_layer(&snapshot(), &path, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.error_code(), "FILE_WRITE_ERROR");
    }

    #[test]
    fn test_temp_path_is_hidden_sibling() {
        assert_eq!(
            temp_path(Path::new("/data/roads.json")),
            PathBuf::from("/data/.roads.json.part")
        );
    }
}
