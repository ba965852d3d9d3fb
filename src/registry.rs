//! Process-wide task registry with cooperative cancellation flags
//!
//! The registry is the only state shared between the control plane's
//! connections: a task is registered when a download with a `task_id`
//! starts, its cancel flag is polled from the engine's callback adapters,
//! and the entry is removed unconditionally when the task terminates.
//! Entries never outlive their task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared registry mapping task identifiers to cancellation flags
///
/// Cloning is cheap and every clone refers to the same underlying map; the
/// registry is constructed once at bridge start and injected into both
/// dispatchers rather than living in an ambient global.
///
/// Cancellation is cooperative and poll-based: [`request_cancel`] only sets
/// a flag, and the running task observes it at the next engine callback.
/// Cancellation latency therefore equals the interval between callbacks.
///
/// [`request_cancel`]: TaskRegistry::request_cancel
#[derive(Clone, Debug, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means another thread panicked mid-operation;
    // every operation on the map is a single insert/remove/load, so the
    // map itself is always consistent and safe to keep using.
    fn guard(&self) -> MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a task with a cleared cancellation flag
    ///
    /// No-op for an empty id (anonymous tasks are legal but cannot be
    /// cancelled by id). Re-registering an id overwrites the previous entry
    /// with a cleared flag; in-flight id uniqueness is the caller's contract.
    pub fn register(&self, task_id: &str) {
        if task_id.is_empty() {
            return;
        }
        self.guard()
            .insert(task_id.to_string(), Arc::new(AtomicBool::new(false)));
        tracing::debug!(task_id, "task registered");
    }

    /// Request cancellation of a task
    ///
    /// Safe to call from any connection or thread. Returns `true` when the
    /// id was registered (the flag is now set), `false` when no such task is
    /// in flight.
    pub fn request_cancel(&self, task_id: &str) -> bool {
        let found = self
            .guard()
            .get(task_id)
            .map(|flag| flag.store(true, Ordering::SeqCst));
        if found.is_some() {
            tracing::info!(task_id, "cancellation requested");
        } else {
            tracing::debug!(task_id, "cancellation requested for unknown task");
        }
        found.is_some()
    }

    /// Whether cancellation has been requested for a task
    ///
    /// Unknown (or already deregistered) ids report `false`.
    pub fn is_cancelled(&self, task_id: &str) -> bool {
        self.guard()
            .get(task_id)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Remove a task's entry
    ///
    /// Idempotent: deregistering an id twice (success path, then a late
    /// duplicate callback) is harmless.
    pub fn deregister(&self, task_id: &str) {
        if self.guard().remove(task_id).is_some() {
            tracing::debug!(task_id, "task deregistered");
        }
    }

    /// Whether a task id is currently registered
    pub fn contains(&self, task_id: &str) -> bool {
        self.guard().contains_key(task_id)
    }

    /// Number of in-flight registered tasks
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Whether the registry has no in-flight tasks
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Register a task for the lifetime of the returned guard
    ///
    /// This is the guaranteed-cleanup path used by the task runner: the
    /// entry is removed when the guard drops, on every exit (success, error,
    /// or cancellation). `None` or an empty id yields an inert guard.
    pub fn register_scoped(&self, task_id: Option<&str>) -> RegistrationGuard {
        let task_id = task_id.filter(|id| !id.is_empty()).map(String::from);
        if let Some(id) = &task_id {
            self.register(id);
        }
        RegistrationGuard {
            registry: self.clone(),
            task_id,
        }
    }
}

/// RAII guard that deregisters a task on drop
///
/// Returned by [`TaskRegistry::register_scoped`].
#[must_use = "dropping the guard immediately would deregister the task"]
pub struct RegistrationGuard {
    registry: TaskRegistry,
    task_id: Option<String>,
}

impl RegistrationGuard {
    /// The registered task id, if any
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if let Some(id) = &self.task_id {
            self.registry.deregister(id);
        }
    }
}
