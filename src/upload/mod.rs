//! Upload Module
//!
//! This module provides:
//! - Upload strategies and their validation
//! - The pending object set of one upload
//! - The changeset capacity policy
//! - `LayerUploadTask`, the per-layer upload state machine

mod pending;
mod policy;
mod strategy;
mod task;

pub use pending::PendingObjectSet;
pub use policy::{ChangesetCapacityPolicy, FixedDecision, OverflowChoice, OverflowDecisionSource};
pub use strategy::{UploadStrategy, UploadStrategySpecification, DEFAULT_CHUNK_SIZE};
pub use task::{LayerUploadTask, UploadContext, UploadReport, UploadState};
