//! Error handling for edit-sync
//!
//! Every per-layer failure ends up inside an [`Outcome`](crate::Outcome);
//! only invalid orchestration input is returned as an `Err` from the
//! orchestrator itself.

use std::path::PathBuf;

use thiserror::Error;

use crate::api::ApiError;
use crate::upload::OverflowChoice;

/// Result type alias for edit-sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for edit-sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    // Remote Errors
    #[error("Remote API error: {0}")]
    Api(#[from] ApiError),

    #[error("Changeset {changeset_id} is full with {remaining} object(s) left to upload")]
    ChangesetFull {
        changeset_id: u64,
        remaining: usize,
        choice: Option<OverflowChoice>,
    },

    #[error("Changeset {changeset_id} is already closed and cannot be reused")]
    ChangesetAlreadyClosed { changeset_id: u64 },

    #[error("Invalid upload strategy: {reason}")]
    InvalidStrategy { reason: String },

    #[error("Upload of layer '{layer}' vetoed: {reason}")]
    PreUploadCheckFailed { layer: String, reason: String },

    // Save Errors
    #[error("Layer '{layer}' does not satisfy its save conditions")]
    SaveConditionsNotMet { layer: String },

    #[error("Layer '{layer}' has no file to save to")]
    MissingSaveTarget { layer: String },

    #[error("Failed to write file: {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Orchestration Errors
    #[error("Operation canceled")]
    Canceled,

    #[error("Invalid action set: {reason}")]
    InvalidActionSet { reason: String },

    #[error("Background worker is not available")]
    WorkerUnavailable,

    // Configuration Errors
    #[error("Configuration error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    // Generic Errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Api(api) => api.error_code(),
            SyncError::ChangesetFull { .. } => "CHANGESET_FULL",
            SyncError::ChangesetAlreadyClosed { .. } => "CHANGESET_ALREADY_CLOSED",
            SyncError::InvalidStrategy { .. } => "INVALID_STRATEGY",
            SyncError::PreUploadCheckFailed { .. } => "PRE_UPLOAD_CHECK_FAILED",
            SyncError::SaveConditionsNotMet { .. } => "SAVE_CONDITIONS_NOT_MET",
            SyncError::MissingSaveTarget { .. } => "MISSING_SAVE_TARGET",
            SyncError::FileWrite { .. } => "FILE_WRITE_ERROR",
            SyncError::Canceled => "CANCELED",
            SyncError::InvalidActionSet { .. } => "INVALID_ACTION_SET",
            SyncError::WorkerUnavailable => "WORKER_UNAVAILABLE",
            SyncError::Config { .. } => "CONFIG_ERROR",
            SyncError::Internal(_) => "INTERNAL_ERROR",
            SyncError::Io(_) => "IO_ERROR",
            SyncError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// True when the error stems from a cancellation request rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Canceled | SyncError::Api(ApiError::Canceled))
    }

    /// Check if the work behind this error can be resumed later without data loss
    pub fn is_resumable(&self) -> bool {
        match self {
            SyncError::ChangesetFull { .. } => true,
            SyncError::Canceled => true,
            SyncError::Api(api) => api.is_transient(),
            SyncError::FileWrite { .. } => true,
            _ => false,
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SyncError::ChangesetFull { .. } => vec![
                "Upload the remaining objects into a new changeset",
                "Use a smaller chunk size so each changeset stays below the server limit",
            ],
            SyncError::ChangesetAlreadyClosed { .. } => {
                vec!["Select an open changeset or let a new one be created"]
            }
            SyncError::Api(ApiError::VersionConflict { .. }) => vec![
                "Synchronize the conflicting object with the server",
                "Resolve the conflict before uploading again",
            ],
            SyncError::Api(ApiError::ObjectGone { .. }) => {
                vec!["The object was deleted on the server - resolve the conflict locally"]
            }
            SyncError::SaveConditionsNotMet { .. } => vec![
                "Resolve outstanding conflicts in the layer",
                "Add data to the layer before saving it",
            ],
            SyncError::FileWrite { .. } => vec![
                "Check that the target directory exists and is writable",
                "Free up disk space",
            ],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ObjectId;

    #[test]
    fn test_error_codes() {
        let err = SyncError::ChangesetFull {
            changeset_id: 7,
            remaining: 3,
            choice: None,
        };
        assert_eq!(err.error_code(), "CHANGESET_FULL");
        assert!(err.is_resumable());
    }

    #[test]
    fn test_cancellation_detection() {
        assert!(SyncError::Canceled.is_cancellation());
        assert!(SyncError::Api(ApiError::Canceled).is_cancellation());
        assert!(!SyncError::Api(ApiError::ObjectGone {
            object: Some(ObjectId::node(1))
        })
        .is_cancellation());
    }

    #[test]
    fn test_recovery_suggestions() {
        let err = SyncError::SaveConditionsNotMet {
            layer: "Data Layer 1".to_string(),
        };
        assert!(!err.recovery_suggestions().is_empty());
        assert!(!err.is_resumable());
    }
}
