//! Data Model Module
//!
//! Objects, changesets and the layers that own them.

mod changeset;
mod layer;
mod object;

pub use changeset::Changeset;
pub use layer::{lock_layer, share_layer, DataLayer, EditLayer, LayerSnapshot, SharedLayer};
pub use object::{EditObject, ObjectId, ObjectKind, ProcessedObject, Tags, UploadOp};
