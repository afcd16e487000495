//! In-flight execution registry, shared by manual and scheduled runs so a
//! stop request reaches whichever one is running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use hub_core::errors::CoreError;

#[derive(Debug)]
struct Running {
    execution_id: String,
    token: CancellationToken,
}

#[derive(Debug, Default)]
pub struct CancellationRegistry {
    running: Mutex<HashMap<String, Running>>,
}

impl CancellationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run of `task_id`. The entry lives as long as the guard.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Conflict` if the task already has a run in this
    /// process.
    pub fn register(
        self: &Arc<Self>,
        task_id: &str,
        execution_id: &str,
    ) -> Result<RunGuard, CoreError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = running.get(task_id) {
            return Err(CoreError::Conflict(format!(
                "sync task {task_id} is already running as {}",
                existing.execution_id
            )));
        }
        let token = CancellationToken::new();
        running.insert(
            task_id.to_string(),
            Running {
                execution_id: execution_id.to_string(),
                token: token.clone(),
            },
        );
        Ok(RunGuard {
            registry: Arc::clone(self),
            task_id: task_id.to_string(),
            token,
        })
    }

    /// Signal the task's in-flight run. Returns whether one was found.
    pub fn cancel(&self, task_id: &str) -> bool {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.get(task_id) {
            Some(run) => {
                debug!(task_id, execution_id = %run.execution_id, "cancellation requested");
                run.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every registered run.
    pub fn cancel_all(&self) -> usize {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        for run in running.values() {
            run.token.cancel();
        }
        running.len()
    }

    #[must_use]
    pub fn is_running(&self, task_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(task_id)
    }
}

/// Deregisters its run on drop.
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<CancellationRegistry>,
    task_id: String,
    token: CancellationToken,
}

impl RunGuard {
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_the_registered_token() {
        let registry = Arc::new(CancellationRegistry::new());
        let guard = registry.register("stk-1", "exe-1").unwrap();
        let token = guard.token();
        assert!(registry.is_running("stk-1"));
        assert!(registry.cancel("stk-1"));
        assert!(token.is_cancelled());
        assert!(!registry.cancel("stk-2"));
    }

    #[test]
    fn second_registration_conflicts_until_guard_drops() {
        let registry = Arc::new(CancellationRegistry::new());
        let guard = registry.register("stk-1", "exe-1").unwrap();
        assert!(matches!(
            registry.register("stk-1", "exe-2"),
            Err(CoreError::Conflict(_))
        ));
        drop(guard);
        assert!(!registry.is_running("stk-1"));
        assert!(registry.register("stk-1", "exe-2").is_ok());
    }

    #[test]
    fn cancel_all_counts_runs() {
        let registry = Arc::new(CancellationRegistry::new());
        let a = registry.register("a", "exe-a").unwrap();
        let b = registry.register("b", "exe-b").unwrap();
        assert_eq!(registry.cancel_all(), 2);
        assert!(a.token().is_cancelled() && b.token().is_cancelled());
    }
}
