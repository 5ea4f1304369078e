//! Session summary

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::action::LayerActionInfo;
use crate::error::SyncError;
use crate::outcome::{Outcome, OutcomeKind};

/// Result of one layer in a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub upload: Option<OutcomeKind>,
    pub save: Option<OutcomeKind>,
    pub upload_error: Option<String>,
    pub save_error: Option<String>,
    pub uploaded: usize,
    pub residual: usize,
    pub changeset_id: u64,

    /// Every unfinished action can be picked up again later
    pub resumable: bool,

    /// Recovery hints for the recorded errors
    pub suggestions: Vec<String>,
}

impl LayerSummary {
    fn from_info(info: &LayerActionInfo) -> Self {
        let error = |outcome: &Option<Outcome>| {
            outcome
                .as_ref()
                .and_then(Outcome::error)
                .map(ToString::to_string)
        };
        let errors: Vec<&SyncError> = [&info.upload_outcome, &info.save_outcome]
            .into_iter()
            .flatten()
            .filter_map(Outcome::error)
            .collect();
        let mut suggestions: Vec<String> = Vec::new();
        for hint in errors.iter().flat_map(|err| err.recovery_suggestions()) {
            if !suggestions.iter().any(|known| known == hint) {
                suggestions.push(hint.to_string());
            }
        }
        Self {
            name: info.name.clone(),
            upload: info.upload_outcome.as_ref().map(Outcome::kind),
            save: info.save_outcome.as_ref().map(Outcome::kind),
            upload_error: error(&info.upload_outcome),
            save_error: error(&info.save_outcome),
            uploaded: info.uploaded,
            residual: info.residual.len(),
            changeset_id: info.changeset.id,
            resumable: errors.iter().all(|err| err.is_resumable()),
            suggestions,
        }
    }
}

/// Aggregate outcome counts of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ok: usize,
    pub failed: usize,
    pub canceled: usize,
    pub layers: Vec<LayerSummary>,
}

impl Summary {
    pub fn from_infos(session_id: Uuid, started_at: DateTime<Utc>, infos: &[LayerActionInfo]) -> Self {
        let mut summary = Self {
            session_id,
            started_at,
            finished_at: Utc::now(),
            ok: 0,
            failed: 0,
            canceled: 0,
            layers: infos.iter().map(LayerSummary::from_info).collect(),
        };
        let outcomes = infos
            .iter()
            .flat_map(|info| [&info.upload_outcome, &info.save_outcome])
            .flatten();
        for outcome in outcomes {
            match outcome.kind() {
                OutcomeKind::Ok => summary.ok += 1,
                OutcomeKind::Failed => summary.failed += 1,
                OutcomeKind::Canceled => summary.canceled += 1,
            }
        }
        summary
    }

    /// Failed plus canceled actions
    pub fn num_problems(&self) -> usize {
        self.failed + self.canceled
    }

    pub fn has_unsaved_data(&self) -> bool {
        self.num_problems() > 0
    }

    pub fn total(&self) -> usize {
        self.ok + self.failed + self.canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::data::{share_layer, DataLayer, ObjectId};

    #[test]
    fn test_counts() {
        let settings = SyncSettings::default();
        let mut a = LayerActionInfo::from_layer(share_layer(DataLayer::new("a")), &settings).unwrap();
        a.upload_outcome = Some(Outcome::Ok);
        a.save_outcome = Some(Outcome::Canceled);
        let mut b = LayerActionInfo::from_layer(share_layer(DataLayer::new("b")), &settings).unwrap();
        b.upload_outcome = Some(Outcome::failed(SyncError::Canceled));
        b.residual = vec![ObjectId::node(1), ObjectId::node(2)];

        let summary = Summary::from_infos(Uuid::new_v4(), Utc::now(), &[a, b]);
        assert_eq!((summary.ok, summary.failed, summary.canceled), (1, 1, 1));
        assert_eq!(summary.num_problems(), 2);
        assert!(summary.has_unsaved_data());
        assert_eq!(summary.layers[1].residual, 2);
        assert_eq!(summary.layers[1].save, None);
        assert_eq!(
            summary.layers[1].upload_error.as_deref(),
            Some("Operation canceled")
        );
        assert!(summary.layers[0].resumable);
        assert!(summary.layers[0].suggestions.is_empty());
    }

    #[test]
    fn test_layer_hints() {
        let settings = SyncSettings::default();
        let mut full = LayerActionInfo::from_layer(share_layer(DataLayer::new("full")), &settings).unwrap();
        full.upload_outcome = Some(Outcome::failed(SyncError::ChangesetFull {
            changeset_id: 3,
            remaining: 20,
            choice: None,
        }));
        let mut blocked = LayerActionInfo::from_layer(share_layer(DataLayer::new("blocked")), &settings).unwrap();
        blocked.save_outcome = Some(Outcome::failed(SyncError::SaveConditionsNotMet {
            layer: "blocked".to_string(),
        }));

        let summary = Summary::from_infos(Uuid::new_v4(), Utc::now(), &[full, blocked]);
        assert!(summary.layers[0].resumable);
        assert_eq!(summary.layers[0].suggestions.len(), 2);
        assert!(summary.layers[0].suggestions[1].contains("smaller chunk size"));
        assert!(!summary.layers[1].resumable);
        assert!(summary.layers[1].suggestions[0].contains("conflicts"));
    }
}
