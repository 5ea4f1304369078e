//! Scenario files for the command line
//!
//! A scenario describes the simulated server and the layers of a session.
//! Relative file paths are resolved against the scenario's directory.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::api::InMemoryServer;
use crate::config::SyncSettings;
use crate::data::{share_layer, DataLayer, EditObject, ObjectId};
use crate::error::{Result, SyncError};
use crate::orchestrator::LayerActionInfo;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerScenario {
    /// Objects per changeset before the server closes it
    pub capacity: Option<usize>,

    /// Objects already deleted on the server
    pub deleted: Vec<ObjectId>,

    pub latency_ms: u64,
}

impl ServerScenario {
    pub fn build(&self) -> InMemoryServer {
        let mut server = InMemoryServer::new().with_latency(Duration::from_millis(self.latency_ms));
        if let Some(capacity) = self.capacity {
            server = server.with_capacity(capacity);
        }
        for id in &self.deleted {
            server = server.with_deleted(*id, 1);
        }
        server
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayerScenario {
    pub name: String,

    #[serde(default)]
    pub objects: Vec<EditObject>,

    /// Number of modified nodes (ids 1..=n, version 1) to add
    #[serde(default)]
    pub generate_nodes: usize,

    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Override whether the layer is uploaded
    #[serde(default)]
    pub upload: Option<bool>,

    /// Override whether the layer is saved
    #[serde(default)]
    pub save: Option<bool>,

    #[serde(default)]
    pub conflicts: usize,
}

impl LayerScenario {
    pub fn build_layer(&self, base_dir: &Path) -> DataLayer {
        let generated = (1..=self.generate_nodes as i64)
            .map(|id| EditObject::modified(ObjectId::node(id), 1));
        let mut layer = DataLayer::new(&self.name)
            .with_objects(generated)
            .with_objects(self.objects.iter().cloned());
        if let Some(file) = &self.file {
            layer = layer.with_associated_file(base_dir.join(file));
        }
        layer.set_conflicts(self.conflicts);
        layer
    }

    pub fn to_action(&self, base_dir: &Path, settings: &SyncSettings) -> Result<LayerActionInfo> {
        let mut info =
            LayerActionInfo::from_layer(share_layer(self.build_layer(base_dir)), settings)?;
        if let Some(upload) = self.upload {
            info = info.with_upload(upload);
        }
        if let Some(save) = self.save {
            info = info.with_save(save);
        }
        Ok(info)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub server: ServerScenario,

    #[serde(default)]
    pub layers: Vec<LayerScenario>,

    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| SyncError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut scenario: Scenario =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| SyncError::Config {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        scenario.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(scenario)
    }

    pub fn actions(&self, settings: &SyncSettings) -> Result<Vec<LayerActionInfo>> {
        self.layers
            .iter()
            .map(|layer| layer.to_action(&self.base_dir, settings))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RemoteApi;
    use std::io::Write;

    const SCENARIO: &str = r#"{
        "server": { "capacity": 120, "deleted": [{ "kind": "node", "id": 3 }] },
        "layers": [
            { "name": "bulk", "generate_nodes": 250, "file": "bulk.json" },
            {
                "name": "small",
                "objects": [{ "id": { "kind": "way", "id": -1 }, "modified": true }],
                "save": false
            }
        ]
    }"#;

    #[test]
    fn test_load_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        File::create(&path)
            .unwrap()
            .write_all(SCENARIO.as_bytes())
            .unwrap();

        let scenario = Scenario::load(&path).unwrap();
        let server = scenario.server.build();
        assert_eq!(server.capabilities().max_changeset_size, Some(120));
        assert_eq!(server.object_state(ObjectId::node(3)), Some((1, true)));

        let actions = scenario.actions(&SyncSettings::default()).unwrap();
        assert_eq!(actions.len(), 2);
        assert!(actions[0].do_upload && actions[0].do_save);
        assert_eq!(actions[0].file, Some(dir.path().join("bulk.json")));
        assert!(actions[1].do_upload);
        assert!(!actions[1].do_save);
    }

    #[test]
    fn test_invalid_scenario_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        File::create(&path).unwrap().write_all(b"{ layers: ").unwrap();
        assert_eq!(
            Scenario::load(&path).unwrap_err().error_code(),
            "CONFIG_ERROR"
        );
    }
}
