//! Terminal result of one upload or save task

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Result of running one task against one layer
#[derive(Debug, Clone)]
pub enum Outcome {
    Ok,
    Failed(Arc<SyncError>),
    Canceled,
}

impl Outcome {
    pub fn failed(error: SyncError) -> Self {
        Outcome::Failed(Arc::new(error))
    }

    /// Map an error to FAILED, or CANCELED if it reports a cancellation
    pub fn from_error(error: SyncError) -> Self {
        if error.is_cancellation() {
            Outcome::Canceled
        } else {
            Outcome::failed(error)
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled)
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            Outcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Ok => OutcomeKind::Ok,
            Outcome::Failed(_) => OutcomeKind::Failed,
            Outcome::Canceled => OutcomeKind::Canceled,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok => write!(f, "ok"),
            Outcome::Failed(error) => write!(f, "failed: {}", error),
            Outcome::Canceled => write!(f, "canceled"),
        }
    }
}

/// Outcome without the attached error, for reports and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Ok,
    Failed,
    Canceled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;

    #[test]
    fn test_from_error_separates_cancellation() {
        assert!(Outcome::from_error(SyncError::Api(ApiError::Canceled)).is_canceled());
        let failed = Outcome::from_error(SyncError::Internal("boom".to_string()));
        assert!(failed.is_failed());
        assert_eq!(failed.error().map(|e| e.error_code()), Some("INTERNAL_ERROR"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Outcome::Ok.to_string(), "ok");
        assert_eq!(Outcome::Canceled.kind(), OutcomeKind::Canceled);
        assert_eq!(
            Outcome::failed(SyncError::Canceled).to_string(),
            "failed: Operation canceled"
        );
    }
}
