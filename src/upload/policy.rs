//! Changeset capacity policy
//!
//! Decides what happens when the server reports the current changeset as
//! full. The decision itself comes from an injected source (a prompt, a
//! preset from the settings, a test closure) and is cached for the run.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// What to do when the changeset cannot take more objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowChoice {
    /// Stop the upload and keep the remaining objects pending
    Abort,
    /// Open a new changeset with the same tags and continue
    ReopenAndContinue,
    /// Stop and hand control back so the caller can adjust the settings
    ReturnToCaller,
}

impl fmt::Display for OverflowChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowChoice::Abort => write!(f, "abort"),
            OverflowChoice::ReopenAndContinue => write!(f, "reopen and continue"),
            OverflowChoice::ReturnToCaller => write!(f, "return to caller"),
        }
    }
}

/// Source of overflow decisions, e.g. an interactive prompt
pub trait OverflowDecisionSource: Send + Sync {
    fn resolve_capacity_overflow(&self, remaining: usize) -> OverflowChoice;
}

impl<F> OverflowDecisionSource for F
where
    F: Fn(usize) -> OverflowChoice + Send + Sync,
{
    fn resolve_capacity_overflow(&self, remaining: usize) -> OverflowChoice {
        self(remaining)
    }
}

/// Decision source that always answers the same
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision(pub OverflowChoice);

impl OverflowDecisionSource for FixedDecision {
    fn resolve_capacity_overflow(&self, _remaining: usize) -> OverflowChoice {
        self.0
    }
}

/// Cached overflow policy shared by the upload tasks of one run
#[derive(Clone)]
pub struct ChangesetCapacityPolicy {
    source: Arc<dyn OverflowDecisionSource>,
    preset: Option<OverflowChoice>,
    cached: Arc<Mutex<Option<OverflowChoice>>>,
}

impl ChangesetCapacityPolicy {
    pub fn new(source: impl OverflowDecisionSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            preset: None,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Policy whose decision is already made and survives [`reset`](Self::reset)
    pub fn preset(choice: OverflowChoice) -> Self {
        Self {
            source: Arc::new(FixedDecision(choice)),
            preset: Some(choice),
            cached: Arc::new(Mutex::new(Some(choice))),
        }
    }

    /// Decide for `remaining` pending objects, asking the source only once.
    pub fn decide(&self, remaining: usize) -> OverflowChoice {
        if let Some(choice) = self.cached() {
            return choice;
        }
        let choice = self.source.resolve_capacity_overflow(remaining);
        tracing::debug!(remaining, %choice, "Capacity overflow decision made");
        self.store(Some(choice));
        choice
    }

    pub fn cached(&self) -> Option<OverflowChoice> {
        match self.cached.lock() {
            Ok(cached) => *cached,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Forget the decision of the last run so the source is asked again.
    /// A preset decision is kept.
    pub fn reset(&self) {
        self.store(self.preset);
    }

    fn store(&self, choice: Option<OverflowChoice>) {
        match self.cached.lock() {
            Ok(mut cached) => *cached = choice,
            Err(poisoned) => *poisoned.into_inner() = choice,
        }
    }
}

impl fmt::Debug for ChangesetCapacityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangesetCapacityPolicy")
            .field("preset", &self.preset)
            .field("cached", &self.cached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_source_is_asked_once_per_run() {
        let asked = Arc::new(AtomicUsize::new(0));
        let counter = asked.clone();
        let policy = ChangesetCapacityPolicy::new(move |_remaining: usize| {
            counter.fetch_add(1, Ordering::SeqCst);
            OverflowChoice::ReopenAndContinue
        });

        assert_eq!(policy.decide(50), OverflowChoice::ReopenAndContinue);
        assert_eq!(policy.decide(10), OverflowChoice::ReopenAndContinue);
        assert_eq!(asked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clones_share_the_cache() {
        let policy = ChangesetCapacityPolicy::new(FixedDecision(OverflowChoice::Abort));
        let clone = policy.clone();
        policy.decide(1);
        assert_eq!(clone.cached(), Some(OverflowChoice::Abort));
    }

    #[test]
    fn test_reset_asks_again() {
        let answers = Arc::new(Mutex::new(vec![
            OverflowChoice::ReturnToCaller,
            OverflowChoice::Abort,
        ]));
        let source = answers.clone();
        let policy = ChangesetCapacityPolicy::new(move |_remaining: usize| {
            source.lock().unwrap().pop().unwrap()
        });

        assert_eq!(policy.decide(3), OverflowChoice::Abort);
        policy.reset();
        assert_eq!(policy.cached(), None);
        assert_eq!(policy.decide(3), OverflowChoice::ReturnToCaller);
    }

    #[test]
    fn test_preset_is_cached() {
        let policy = ChangesetCapacityPolicy::preset(OverflowChoice::ReopenAndContinue);
        assert_eq!(policy.cached(), Some(OverflowChoice::ReopenAndContinue));
    }

    #[test]
    fn test_preset_survives_reset() {
        let policy = ChangesetCapacityPolicy::preset(OverflowChoice::ReturnToCaller);
        policy.reset();
        assert_eq!(policy.cached(), Some(OverflowChoice::ReturnToCaller));
        assert_eq!(policy.decide(4), OverflowChoice::ReturnToCaller);
    }
}
