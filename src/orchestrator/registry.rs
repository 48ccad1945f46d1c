use std::sync::{Mutex, MutexGuard};

use tracing::{info, warn};

use super::error::ShutdownError;
use super::process::{HandleSummary, ProcessHandle};

/// The live set of processes this run has started, in registration order.
///
/// Names are unique: registering a name that is already present replaces the
/// old entry and terminates the process behind it. The lock is never held
/// across an `.await`.
#[derive(Default)]
pub struct ProcessRegistry {
    handles: Mutex<Vec<ProcessHandle>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> MutexGuard<'_, Vec<ProcessHandle>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a handle. Returns the summary of the entry it displaced, if any.
    pub async fn register(&self, handle: ProcessHandle) -> Option<HandleSummary> {
        let displaced = {
            let mut handles = self.handles();
            let existing = handles.iter().position(|h| h.name() == handle.name());
            let old = existing.map(|idx| handles.remove(idx));
            handles.push(handle);
            old
        };

        let old = displaced?;
        warn!(process = %old.name(), pid = ?old.pid(), "replacing registered process");
        if let Err(e) = old.terminate().await {
            warn!(error = %e, "failed to terminate replaced process");
        }
        Some(old.summary())
    }

    pub fn get(&self, name: &str) -> Option<HandleSummary> {
        self.handles()
            .iter()
            .find(|h| h.name() == name)
            .map(ProcessHandle::summary)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles().iter().any(|h| h.name() == name)
    }

    pub fn list(&self) -> Vec<HandleSummary> {
        self.handles().iter().map(ProcessHandle::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.handles().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }

    /// Take a handle out of the registry without stopping it.
    pub fn remove(&self, name: &str) -> Option<ProcessHandle> {
        let mut handles = self.handles();
        let idx = handles.iter().position(|h| h.name() == name)?;
        Some(handles.remove(idx))
    }

    /// Remove and terminate a single process. Returns `Ok(false)` when no
    /// process is registered under `name`.
    pub async fn stop(&self, name: &str) -> Result<bool, ShutdownError> {
        let Some(handle) = self.remove(name) else {
            return Ok(false);
        };
        info!(process = %name, "stopping");
        handle.terminate().await.map(|()| true)
    }

    /// Empty the registry, terminating every process newest-first.
    ///
    /// Best effort: every handle is attempted and the failures are returned.
    pub async fn kill_all(&self) -> Vec<ShutdownError> {
        let drained: Vec<ProcessHandle> = std::mem::take(&mut *self.handles());

        let mut errors = Vec::new();
        for handle in drained.into_iter().rev() {
            info!(process = %handle.name(), pid = ?handle.pid(), "stopping");
            if let Err(e) = handle.terminate().await {
                warn!(error = %e, "terminate failed");
                errors.push(e);
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::testing::{FakeProcess, TerminationLog};

    #[tokio::test]
    async fn duplicate_name_replaces_and_terminates_previous() {
        let registry = ProcessRegistry::new();
        let a = FakeProcess::new();
        let b = FakeProcess::new();

        assert!(registry
            .register(ProcessHandle::new("db", Some(4661), a.clone()).with_pid(Some(1)))
            .await
            .is_none());
        let displaced = registry
            .register(ProcessHandle::new("db", Some(4661), b.clone()).with_pid(Some(2)))
            .await
            .expect("first handle should be displaced");

        assert_eq!(displaced.pid, Some(1));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("db").unwrap().pid, Some(2));
        assert_eq!(a.terminations(), 1);
        assert_eq!(b.terminations(), 0);
    }

    #[tokio::test]
    async fn names_stay_unique_across_register_sequences() {
        let registry = ProcessRegistry::new();
        let names = ["l1", "l2", "db", "l1", "storage", "db", "db", "l2", "gateway"];
        let fakes: Vec<FakeProcess> = names.iter().map(|_| FakeProcess::new()).collect();

        for (name, fake) in names.iter().zip(&fakes) {
            registry
                .register(ProcessHandle::new(*name, None, fake.clone()))
                .await;

            let listed: Vec<String> = registry.list().into_iter().map(|h| h.name).collect();
            let mut deduped = listed.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(listed.len(), deduped.len(), "duplicate names in {listed:?}");
        }

        assert_eq!(registry.len(), 5);
        // Every displaced handle was terminated exactly once, survivors never.
        let total: usize = fakes.iter().map(FakeProcess::terminations).sum();
        assert_eq!(total, names.len() - registry.len());
        assert!(fakes.iter().all(|f| f.terminations() <= 1));
    }

    #[tokio::test]
    async fn concurrent_registration_under_one_name_keeps_one() {
        let registry = ProcessRegistry::new();
        let a = FakeProcess::new();
        let b = FakeProcess::new();

        tokio::join!(
            registry.register(ProcessHandle::new("storage", None, a.clone())),
            registry.register(ProcessHandle::new("storage", None, b.clone())),
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(a.terminations() + b.terminations(), 1);
    }

    #[tokio::test]
    async fn list_preserves_registration_order() {
        let registry = ProcessRegistry::new();
        for name in ["database", "storage", "l1"] {
            registry
                .register(ProcessHandle::new(name, None, FakeProcess::new()))
                .await;
        }
        let names: Vec<String> = registry.list().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["database", "storage", "l1"]);
    }

    #[tokio::test]
    async fn remove_does_not_terminate() {
        let registry = ProcessRegistry::new();
        let fake = FakeProcess::new();
        registry
            .register(ProcessHandle::new("tunnel", None, fake.clone()))
            .await;

        let handle = registry.remove("tunnel").expect("registered");
        assert_eq!(handle.name(), "tunnel");
        assert!(registry.is_empty());
        assert_eq!(fake.terminations(), 0);
        assert!(registry.remove("tunnel").is_none());
    }

    #[tokio::test]
    async fn stop_terminates_and_removes() {
        let registry = ProcessRegistry::new();
        let fake = FakeProcess::new();
        registry
            .register(ProcessHandle::new("proxy", None, fake.clone()))
            .await;

        assert!(registry.stop("proxy").await.unwrap());
        assert!(!registry.contains("proxy"));
        assert_eq!(fake.terminations(), 1);
        assert!(!registry.stop("proxy").await.unwrap());
    }

    #[tokio::test]
    async fn kill_all_goes_newest_first_and_continues_past_failures() {
        let registry = ProcessRegistry::new();
        let log = TerminationLog::default();
        registry
            .register(ProcessHandle::new("database", None, FakeProcess::logged(&log, "database")))
            .await;
        registry
            .register(ProcessHandle::new("l1", None, FakeProcess::failing(&log, "l1")))
            .await;
        registry
            .register(ProcessHandle::new("gateway", None, FakeProcess::logged(&log, "gateway")))
            .await;

        let errors = registry.kill_all().await;

        assert_eq!(log.entries(), vec!["gateway", "l1", "database"]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("l1"));
        assert!(registry.is_empty());
    }
}
