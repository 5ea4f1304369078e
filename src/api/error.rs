//! Errors reported by the remote API

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::ObjectId;

/// Which request found the changeset closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedSource {
    /// Uploading data into the changeset; usually means the changeset is full
    UploadData,
    /// Updating the changeset itself
    UpdateChangeset,
    Unspecified,
}

impl fmt::Display for ClosedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosedSource::UploadData => write!(f, "upload data"),
            ClosedSource::UpdateChangeset => write!(f, "update changeset"),
            ClosedSource::Unspecified => write!(f, "unspecified"),
        }
    }
}

/// Closed set of failures the remote API can report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Version conflict on {object}: local version {local_version}, server version {server_version}")]
    VersionConflict {
        object: ObjectId,
        local_version: u64,
        server_version: u64,
    },

    #[error("Changeset {changeset_id} was closed ({origin})")]
    ChangesetClosed {
        changeset_id: u64,
        origin: ClosedSource,
    },

    #[error("{}", gone_message(.object))]
    ObjectGone { object: Option<ObjectId> },

    #[error("Request canceled")]
    Canceled,

    #[error("Transport failure: {reason}")]
    Transport { reason: String },
}

fn gone_message(object: &Option<ObjectId>) -> String {
    match object {
        Some(id) => format!("{} is already deleted on the server", id),
        None => "An object is already deleted on the server".to_string(),
    }
}

impl ApiError {
    pub fn transport(reason: impl Into<String>) -> Self {
        ApiError::Transport {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::VersionConflict { .. } => "VERSION_CONFLICT",
            ApiError::ChangesetClosed { .. } => "CHANGESET_CLOSED",
            ApiError::ObjectGone { .. } => "OBJECT_GONE",
            ApiError::Canceled => "CANCELED",
            ApiError::Transport { .. } => "TRANSPORT_ERROR",
        }
    }

    /// True for the "changeset full" signal
    pub fn is_changeset_full(&self) -> bool {
        matches!(
            self,
            ApiError::ChangesetClosed {
                origin: ClosedSource::UploadData,
                ..
            }
        )
    }

    /// Check if retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transport { .. } | ApiError::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changeset_full_detection() {
        let full = ApiError::ChangesetClosed {
            changeset_id: 3,
            origin: ClosedSource::UploadData,
        };
        let update = ApiError::ChangesetClosed {
            changeset_id: 3,
            origin: ClosedSource::UpdateChangeset,
        };
        assert!(full.is_changeset_full());
        assert!(!update.is_changeset_full());
        assert_eq!(full.to_string(), "Changeset 3 was closed (upload data)");
    }

    #[test]
    fn test_gone_message() {
        let known = ApiError::ObjectGone {
            object: Some(ObjectId::way(8)),
        };
        assert_eq!(known.to_string(), "Way 8 is already deleted on the server");
        assert_eq!(known.error_code(), "OBJECT_GONE");
    }
}
