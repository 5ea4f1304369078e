//! Cooperative cancellation
//!
//! A [`CancelToken`] is a shared flag that long-running code checks between
//! steps. Code blocked inside an I/O call registers an abort hook with
//! [`CancelToken::on_cancel`] so a cancel request can wake it up.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type AbortHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Inner {
    canceled: AtomicBool,
    next_hook_id: AtomicU64,
    hooks: Mutex<Vec<(u64, AbortHook)>>,
}

/// Shared cancellation flag with abort hooks
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and fire every registered abort hook once.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks = match self.inner.hooks.lock() {
            Ok(mut hooks) => std::mem::take(&mut *hooks),
            Err(_) => return,
        };
        for (_, hook) in hooks {
            hook();
        }
    }

    /// Check if cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// Register a hook that aborts a blocking call.
    ///
    /// The hook runs immediately if the token is already canceled. Dropping
    /// the returned registration removes a hook that has not fired.
    pub fn on_cancel<F>(&self, hook: F) -> AbortRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.inner.next_hook_id.fetch_add(1, Ordering::SeqCst);
        let mut hook: Option<AbortHook> = Some(Box::new(hook));
        if let Ok(mut hooks) = self.inner.hooks.lock() {
            // Checked under the lock so a concurrent cancel() cannot miss the hook.
            if !self.is_canceled() {
                if let Some(hook) = hook.take() {
                    hooks.push((id, hook));
                }
            }
        }
        if let Some(hook) = hook {
            hook();
        }
        AbortRegistration {
            token: self.clone(),
            id,
        }
    }

    fn remove_hook(&self, id: u64) {
        if let Ok(mut hooks) = self.inner.hooks.lock() {
            hooks.retain(|(hook_id, _)| *hook_id != id);
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Keeps an abort hook registered while a blocking call is in flight
#[must_use = "dropping the registration removes the abort hook"]
pub struct AbortRegistration {
    token: CancelToken,
    id: u64,
}

impl Drop for AbortRegistration {
    fn drop(&mut self) {
        self.token.remove_hook(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_canceled());
        token.cancel();
        assert!(clone.is_canceled());
    }

    #[test]
    fn test_hooks_fire_once() {
        let token = CancelToken::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _registration = token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel();
        token.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hook_runs_immediately_when_already_canceled() {
        let token = CancelToken::new();
        token.cancel();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let _registration = token.on_cancel(move || flag.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_dropped_registration_does_not_fire() {
        let token = CancelToken::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        drop(token.on_cancel(move || flag.store(true, Ordering::SeqCst)));
        token.cancel();
        assert!(!fired.load(Ordering::SeqCst));
    }
}
