//! Editing layers
//!
//! The orchestration core only sees layers through [`EditLayer`]. The core
//! never edits layer contents except to tell a layer which objects were
//! processed by an upload and where it has been saved.
//! [`DataLayer`] is the in-memory implementation used by the CLI and tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::object::{EditObject, ObjectId, ProcessedObject, UploadOp};
use crate::error::{Result, SyncError};

/// Behaviour the orchestration core needs from an editing layer
pub trait EditLayer: Send {
    fn name(&self) -> &str;

    /// True if the layer holds changes the server does not know about
    fn is_modified(&self) -> bool;

    fn requires_upload(&self) -> bool;

    fn requires_save(&self) -> bool;

    fn associated_file(&self) -> Option<&Path>;

    fn set_associated_file(&mut self, path: PathBuf);

    /// Objects that have to be sent to the server, in upload order
    fn objects_to_upload(&self) -> Vec<EditObject>;

    fn object(&self, id: ObjectId) -> Option<&EditObject>;

    /// Layer-defined check run before the layer is written to a file
    fn check_save_conditions(&self) -> bool;

    /// Serializable view of the layer contents
    fn snapshot(&self) -> LayerSnapshot;

    /// Apply the server confirmations of an upload attempt.
    ///
    /// Called even for failed or canceled attempts as long as at least one
    /// object was processed.
    fn cleanup_after_upload(&mut self, processed: &[ProcessedObject]);

    fn on_post_upload(&mut self);

    fn on_post_save(&mut self);
}

/// A layer shared between the caller and the background worker.
pub type SharedLayer = Arc<Mutex<dyn EditLayer>>;

/// Wrap a layer for use by the orchestrator.
pub fn share_layer<L: EditLayer + 'static>(layer: L) -> SharedLayer {
    Arc::new(Mutex::new(layer))
}

/// Lock a shared layer, turning a poisoned lock into an error.
pub fn lock_layer(layer: &SharedLayer) -> Result<MutexGuard<'_, dyn EditLayer + 'static>> {
    layer
        .lock()
        .map_err(|_| SyncError::Internal("layer lock poisoned".to_string()))
}

/// Serializable contents of a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    pub name: String,
    #[serde(default)]
    pub objects: Vec<EditObject>,
}

/// In-memory editing layer
#[derive(Debug, Clone)]
pub struct DataLayer {
    name: String,
    objects: BTreeMap<ObjectId, EditObject>,
    associated_file: Option<PathBuf>,
    requires_save: bool,
    requires_upload: bool,
    conflicts: usize,
}

impl DataLayer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            objects: BTreeMap::new(),
            associated_file: None,
            requires_save: false,
            requires_upload: false,
            conflicts: 0,
        }
    }

    pub fn from_snapshot(snapshot: LayerSnapshot) -> Self {
        let mut layer = Self::new(&snapshot.name);
        for object in snapshot.objects {
            layer.add_object(object);
        }
        layer
    }

    pub fn with_objects(mut self, objects: impl IntoIterator<Item = EditObject>) -> Self {
        for object in objects {
            self.add_object(object);
        }
        self
    }

    pub fn with_associated_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.associated_file = Some(path.into());
        self
    }

    /// Add or replace an object; a modifying edit flags the layer for upload and save.
    pub fn add_object(&mut self, object: EditObject) {
        if object.upload_op().is_some() {
            self.requires_upload = true;
            self.requires_save = true;
        }
        self.objects.insert(object.id, object);
    }

    pub fn set_conflicts(&mut self, conflicts: usize) {
        self.conflicts = conflicts;
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> impl Iterator<Item = &EditObject> {
        self.objects.values()
    }

    /// True if saving would produce a file without any live object
    fn would_save_empty(&self) -> bool {
        self.objects.values().all(|o| o.deleted)
    }
}

fn upload_rank(object: &EditObject) -> Option<(u8, i8)> {
    // Creations and modifications go children first, deletions parents first.
    let kind = object.id.kind as i8;
    match object.upload_op()? {
        UploadOp::Create => Some((0, kind)),
        UploadOp::Modify => Some((1, kind)),
        UploadOp::Delete => Some((2, -kind)),
    }
}

impl EditLayer for DataLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_modified(&self) -> bool {
        self.objects.values().any(|o| o.upload_op().is_some())
    }

    fn requires_upload(&self) -> bool {
        self.requires_upload
    }

    fn requires_save(&self) -> bool {
        self.associated_file.is_some() && self.requires_save
    }

    fn associated_file(&self) -> Option<&Path> {
        self.associated_file.as_deref()
    }

    fn set_associated_file(&mut self, path: PathBuf) {
        self.associated_file = Some(path);
    }

    fn objects_to_upload(&self) -> Vec<EditObject> {
        let mut ranked: Vec<((u8, i8), &EditObject)> = self
            .objects
            .values()
            .filter_map(|o| upload_rank(o).map(|rank| (rank, o)))
            .collect();
        // Stable sort keeps id order inside each rank.
        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, o)| o.clone()).collect()
    }

    fn object(&self, id: ObjectId) -> Option<&EditObject> {
        self.objects.get(&id)
    }

    fn check_save_conditions(&self) -> bool {
        self.conflicts == 0 && !self.would_save_empty()
    }

    fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot {
            name: self.name.clone(),
            objects: self.objects.values().cloned().collect(),
        }
    }

    fn cleanup_after_upload(&mut self, processed: &[ProcessedObject]) {
        for confirmation in processed {
            let Some(mut object) = self.objects.remove(&confirmation.id) else {
                continue;
            };
            if object.deleted {
                continue;
            }
            object.id = confirmation.new_id;
            object.version = confirmation.new_version;
            object.modified = false;
            self.objects.insert(object.id, object);
        }
    }

    fn on_post_upload(&mut self) {
        self.requires_upload = self.is_modified();
    }

    fn on_post_save(&mut self) {
        self.requires_save = false;
        self.requires_upload = self.is_modified();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layer() -> DataLayer {
        DataLayer::new("Data Layer 1").with_objects(vec![
            EditObject::deleted(ObjectId::node(1), 3),
            EditObject::created(ObjectId::way(-1)),
            EditObject::modified(ObjectId::node(2), 1),
            EditObject::deleted(ObjectId::way(7), 2),
            EditObject::created(ObjectId::node(-2)),
            EditObject::unchanged(ObjectId::node(3), 1),
        ])
    }

    #[test]
    fn test_upload_order_creates_modifies_deletes() {
        let ids: Vec<ObjectId> = sample_layer()
            .objects_to_upload()
            .into_iter()
            .map(|o| o.id)
            .collect();

        assert_eq!(
            ids,
            vec![
                ObjectId::node(-2),
                ObjectId::way(-1),
                ObjectId::node(2),
                ObjectId::way(7),
                ObjectId::node(1),
            ]
        );
    }

    #[test]
    fn test_cleanup_after_upload_purges_and_renumbers() {
        let mut layer = sample_layer();
        layer.cleanup_after_upload(&[
            ProcessedObject::new(ObjectId::node(-2), ObjectId::node(100), 1),
            ProcessedObject::skipped(ObjectId::node(1), 3),
            ProcessedObject::new(ObjectId::node(2), ObjectId::node(2), 2),
        ]);

        assert!(layer.object(ObjectId::node(-2)).is_none());
        let created = layer.object(ObjectId::node(100)).unwrap();
        assert!(!created.modified);
        assert_eq!(created.version, 1);
        assert!(layer.object(ObjectId::node(1)).is_none());
        assert_eq!(layer.object(ObjectId::node(2)).unwrap().version, 2);

        layer.on_post_upload();
        // way -1 and way 7 are still pending
        assert!(layer.requires_upload());
    }

    #[test]
    fn test_requires_save_needs_associated_file() {
        let layer = sample_layer();
        assert!(!layer.requires_save());
        let layer = layer.with_associated_file("/tmp/layer.json");
        assert!(layer.requires_save());
    }

    #[test]
    fn test_save_conditions() {
        let mut layer = sample_layer();
        assert!(layer.check_save_conditions());

        layer.set_conflicts(2);
        assert!(!layer.check_save_conditions());

        let only_deleted =
            DataLayer::new("empty").with_objects(vec![EditObject::deleted(ObjectId::node(5), 1)]);
        assert!(!only_deleted.check_save_conditions());
    }
}
