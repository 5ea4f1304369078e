//! Orchestrator Module
//!
//! This module provides:
//! - `OrchestrationModel`: mode, per-layer actions and outcomes, events
//! - `LayerActionInfo`: what to do with one layer
//! - `TaskWorker`: the single background worker
//! - `SaveAndUploadOrchestrator`: runs a session and returns its `Summary`

mod action;
mod model;
mod runner;
mod summary;
mod worker;

pub use action::LayerActionInfo;
pub use model::{EventSink, Mode, ModelEvent, OrchestrationModel};
pub use runner::{CancelHandle, SaveAndUploadOrchestrator, UploadHook};
pub use summary::{LayerSummary, Summary};
pub use worker::TaskWorker;
