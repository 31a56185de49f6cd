//! Session task registry
//!
//! Every task spawned for a session is registered here, giving teardown a
//! deterministic abort-and-join over the whole set instead of scattered
//! handle fields.

use tokio::task::JoinHandle;

/// Owns the JoinHandles of a session's long-lived tasks
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Spawn and register a named task
    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.push((name, tokio::spawn(future)));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort every task and await the cancellations. Cancellation is
    /// expected control flow here, never logged as a failure.
    pub async fn abort_all(&mut self) {
        for (_, task) in &self.tasks {
            task.abort();
        }
        for (name, task) in self.tasks.drain(..) {
            match task.await {
                Ok(()) => {},
                Err(e) if e.is_cancelled() => {},
                Err(e) => tracing::warn!(task = name, error = %e, "Task ended abnormally"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_abort_all_joins_every_task() {
        let mut registry = TaskRegistry::new();
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        registry.spawn("sleeper", async move {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(registry.len(), 1);

        registry.abort_all().await;
        assert!(registry.is_empty());
        assert!(!finished.load(Ordering::SeqCst));
    }
}
