//! Edit Sync - save and upload orchestration for edited data layers
//!
//! Edit Sync persists the in-memory edits of independently modified layers
//! to two destinations:
//! 1. A remote transactional API, uploading objects into changesets
//! 2. Local files, one per layer
//!
//! # Architecture
//!
//! A session is driven by [`SaveAndUploadOrchestrator`]:
//! - Uploads run first, one layer at a time, through [`LayerUploadTask`],
//!   which recovers from full changesets and already deleted objects
//! - Saves run afterwards through [`LayerSaveTask`]
//! - Every task runs on a single background worker and can be canceled
//! - Each (layer, action) ends with one [`Outcome`]: ok, failed or canceled

pub mod api;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod save;
pub mod upload;

pub use cancel::CancelToken;
pub use config::SyncSettings;
pub use error::{Result, SyncError};
pub use orchestrator::{LayerActionInfo, SaveAndUploadOrchestrator, Summary};
pub use outcome::Outcome;
pub use save::LayerSaveTask;
pub use upload::{LayerUploadTask, OverflowChoice};
