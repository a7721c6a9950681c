//! Apply context, cancellation and per-path write serialisation
//!
//! These types let the executor stay independent of any particular UI or
//! resource kind.

use crate::types::{ApplyResult, PlanOutcome};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Progress callback for execution operations
///
/// Plans run on worker threads, so callbacks take `&self` and must be `Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Called once before any plan starts
    fn on_start(&self, plans: usize);

    /// Called when a worker picks up a plan
    fn on_plan_start(&self, id: &str);

    /// Called when a resource application completes
    fn on_resource_complete(&self, plan: &str, resource: &str, result: &ApplyResult);

    /// Called when a plan finishes (or is cancelled)
    fn on_plan_complete(&self, outcome: &PlanOutcome);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&self, _plans: usize) {}
    fn on_plan_start(&self, _id: &str) {}
    fn on_resource_complete(&self, _plan: &str, _resource: &str, _result: &ApplyResult) {}
    fn on_plan_complete(&self, _outcome: &PlanOutcome) {}
}

/// Cooperative cancellation flag shared between the caller and the executor
///
/// Checked between plans only: a plan that has started always runs to
/// completion, so no resource is interrupted half-way.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Registry of per-path locks
///
/// Two plans that happen to target the same file never write it at the same
/// time; plans touching distinct paths never contend.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Run `f` while holding the lock for `path`
    pub fn with_lock<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(path);
        let _guard: MutexGuard<'_, ()> = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f()
    }
}

/// Context passed to resource apply operations
pub struct ApplyContext<'a> {
    /// Whether this is a dry run (no actual changes)
    pub dry_run: bool,
    /// Whether to output verbose information
    pub verbose: bool,
    /// Shared per-path locks for the whole run
    pub locks: &'a PathLocks,
    warnings: RefCell<Vec<String>>,
}

impl<'a> ApplyContext<'a> {
    /// Create a new apply context
    pub fn new(dry_run: bool, verbose: bool, locks: &'a PathLocks) -> Self {
        Self {
            dry_run,
            verbose,
            locks,
            warnings: RefCell::new(Vec::new()),
        }
    }

    /// Record a non-fatal problem against the resource being applied
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.warnings.borrow_mut().push(message);
    }

    /// Take the warnings recorded since the last call
    pub fn take_warnings(&self) -> Vec<String> {
        self.warnings.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_path_lock_serialises_writers() {
        let locks = Arc::new(PathLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    locks.with_lock(Path::new("/srv/shared.conf"), || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_warnings_are_drained() {
        let locks = PathLocks::new();
        let ctx = ApplyContext::new(false, false, &locks);
        ctx.warn("group www-data not found");
        assert_eq!(ctx.take_warnings(), vec!["group www-data not found"]);
        assert!(ctx.take_warnings().is_empty());
    }
}
