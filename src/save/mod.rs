//! Save Module
//!
//! Writing layers to their associated files.

mod task;
mod writer;

pub use task::LayerSaveTask;
pub use writer::{JsonLayerWriter, LayerWriter};
