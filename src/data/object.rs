//! Domain objects held by an editing layer

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Key/value tags attached to objects and changesets.
pub type Tags = BTreeMap<String, String>;

/// Kind of a domain object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Node,
    Way,
    Relation,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Node => write!(f, "Node"),
            ObjectKind::Way => write!(f, "Way"),
            ObjectKind::Relation => write!(f, "Relation"),
        }
    }
}

/// Typed identifier of a domain object.
///
/// Ids `<= 0` belong to objects that only exist locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    pub kind: ObjectKind,
    pub id: i64,
}

impl ObjectId {
    pub fn new(kind: ObjectKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn node(id: i64) -> Self {
        Self::new(ObjectKind::Node, id)
    }

    pub fn way(id: i64) -> Self {
        Self::new(ObjectKind::Way, id)
    }

    pub fn relation(id: i64) -> Self {
        Self::new(ObjectKind::Relation, id)
    }

    /// True if the object has never been created on the server
    pub fn is_new(&self) -> bool {
        self.id <= 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// What an object contributes to an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOp {
    Create,
    Modify,
    Delete,
}

/// A single editable object in a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditObject {
    pub id: ObjectId,

    /// Last version known from the server (0 for new objects)
    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub modified: bool,

    #[serde(default)]
    pub deleted: bool,

    #[serde(default)]
    pub tags: Tags,
}

impl EditObject {
    /// A locally created object.
    pub fn created(id: ObjectId) -> Self {
        Self {
            id,
            version: 0,
            modified: true,
            deleted: false,
            tags: Tags::new(),
        }
    }

    /// A server object with local modifications.
    pub fn modified(id: ObjectId, version: u64) -> Self {
        Self {
            id,
            version,
            modified: true,
            deleted: false,
            tags: Tags::new(),
        }
    }

    /// A server object deleted locally.
    pub fn deleted(id: ObjectId, version: u64) -> Self {
        Self {
            id,
            version,
            modified: true,
            deleted: true,
            tags: Tags::new(),
        }
    }

    /// A server object without local changes.
    pub fn unchanged(id: ObjectId, version: u64) -> Self {
        Self {
            id,
            version,
            modified: false,
            deleted: false,
            tags: Tags::new(),
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    /// Operation this object needs on upload, if any.
    ///
    /// Objects created and deleted locally never reach the server.
    pub fn upload_op(&self) -> Option<UploadOp> {
        match (self.id.is_new(), self.deleted) {
            (true, true) => None,
            (true, false) => Some(UploadOp::Create),
            (false, true) => Some(UploadOp::Delete),
            (false, false) if self.modified => Some(UploadOp::Modify),
            (false, false) => None,
        }
    }

    /// Name used in log and progress messages
    pub fn display_name(&self) -> String {
        match self.tags.get("name") {
            Some(name) => name.clone(),
            None => format!("#{}", self.id.id),
        }
    }
}

/// Server confirmation for one uploaded object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedObject {
    /// Id the object had when it was submitted
    pub id: ObjectId,

    /// Id assigned by the server (equal to `id` for existing objects)
    pub new_id: ObjectId,

    pub new_version: u64,
}

impl ProcessedObject {
    pub fn new(id: ObjectId, new_id: ObjectId, new_version: u64) -> Self {
        Self {
            id,
            new_id,
            new_version,
        }
    }

    /// An object dropped from the upload without a server round trip.
    pub fn skipped(id: ObjectId, version: u64) -> Self {
        Self::new(id, id, version)
    }
}
