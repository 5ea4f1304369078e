//! Remote API interface
//!
//! This module provides:
//! - `RemoteApi` trait for the transactional server the layers upload to
//! - `ApiError`, the closed set of server failures
//! - `InMemoryServer`, a simulated server for the CLI and tests

mod error;
mod memory;

pub use error::{ApiError, ClosedSource};
pub use memory::{ApiCall, InMemoryServer};

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::data::{Changeset, EditObject, ProcessedObject, Tags};

/// Limits advertised by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Maximum number of objects in one changeset, if the server announces one
    pub max_changeset_size: Option<usize>,
}

/// Trait every remote API collaborator must implement.
///
/// All calls block until the server answers. Implementations must return
/// [`ApiError::Canceled`] promptly once `cancel` fires.
pub trait RemoteApi: Send + Sync {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Create a changeset on the server carrying `tags`
    fn open_changeset(&self, tags: &Tags, cancel: &CancelToken) -> Result<Changeset, ApiError>;

    /// Upload one batch of objects into an open changeset.
    ///
    /// A batch is applied completely or not at all.
    fn upload_batch(
        &self,
        changeset: &Changeset,
        objects: &[EditObject],
        cancel: &CancelToken,
    ) -> Result<Vec<ProcessedObject>, ApiError>;

    fn close_changeset(&self, changeset: &Changeset, cancel: &CancelToken) -> Result<(), ApiError>;
}
