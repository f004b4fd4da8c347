//! Background task registry
//!
//! Every slow operation (saving, reloading, exporting) runs through
//! [`TaskRegistry::launch`] or [`TaskRegistry::launch_async`] so shutdown can
//! find and cancel it. Cancellation is cooperative: each task receives a
//! [`CancellationToken`] and is expected to check it at safe points.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::shutdown::BusinessTeardown;
use super::{TaskExit, panic_message};

/// Entries keyed by launch serial; ids may repeat
type TaskMap = Arc<Mutex<HashMap<u64, TaskEntry>>>;

struct TaskEntry {
    id: String,
    token: CancellationToken,
    started_at: Instant,
}

/// Snapshot of a registered task
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: String,
    pub started_at: Instant,
}

/// Removes the task's entry when dropped, whether the work returned,
/// panicked, or was never started
struct Registration {
    tasks: TaskMap,
    id: String,
    serial: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if lock(&self.tasks).remove(&self.serial).is_some() {
            log::trace!(target: "roster::tasks", "Task '{}' removed from registry", self.id);
        }
    }
}

/// Launches named background work and tracks it for cancellation
pub struct TaskRegistry {
    runtime: Handle,
    tasks: TaskMap,
    closed: AtomicBool,
    next_serial: AtomicU64,
}

impl TaskRegistry {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            closed: AtomicBool::new(false),
            next_serial: AtomicU64::new(1),
        }
    }

    /// Create a registry bound to the tokio runtime of the calling thread
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current().context("Task registry requires a tokio runtime")?;
        Ok(Self::new(runtime))
    }

    /// Run blocking work on a dedicated thread from the runtime's blocking pool
    ///
    /// The task is registered under `id` before the work starts and removed
    /// when it ends for any reason. Errors and panics are logged here and
    /// never reach the caller.
    pub fn launch<F>(&self, id: impl Into<String>, work: F)
    where
        F: FnOnce(CancellationToken) -> Result<()> + Send + 'static,
    {
        let id = id.into();
        let Some((token, registration)) = self.register(&id) else {
            return;
        };

        let spawned = panic::catch_unwind(AssertUnwindSafe(|| {
            self.runtime.spawn_blocking(move || {
                let registration = registration;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(token.clone())));
                let exit = report(&registration.id, &token, outcome);
                drop(registration);
                exit
            })
        }));

        if let Err(payload) = spawned {
            log::error!(
                target: "roster::tasks",
                "Failed to start task '{}': {}",
                id,
                panic_message(payload.as_ref())
            );
        }
    }

    /// Run async work on the tokio runtime
    ///
    /// Same registration and error rules as [`TaskRegistry::launch`].
    pub fn launch_async<F, Fut>(&self, id: impl Into<String>, work: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = id.into();
        let Some((token, registration)) = self.register(&id) else {
            return;
        };

        let spawned = panic::catch_unwind(AssertUnwindSafe(|| {
            self.runtime.spawn(async move {
                let registration = registration;
                let work_token = token.clone();
                let outcome = AssertUnwindSafe(async move { work(work_token).await })
                    .catch_unwind()
                    .await;
                let exit = report(&registration.id, &token, outcome);
                drop(registration);
                exit
            })
        }));

        if let Err(payload) = spawned {
            log::error!(
                target: "roster::tasks",
                "Failed to start task '{}': {}",
                id,
                panic_message(payload.as_ref())
            );
        }
    }

    /// Signal cancellation to every registered task and clear the registry
    ///
    /// Does not wait for the tasks to stop. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<TaskEntry> = lock(&self.tasks).drain().map(|(_, entry)| entry).collect();

        for entry in &drained {
            entry.token.cancel();
            log::debug!(
                target: "roster::tasks",
                "Cancelled task '{}' after {:?}",
                entry.id,
                entry.started_at.elapsed()
            );
        }

        log::info!(target: "roster::tasks", "Signalled cancellation to {} task(s)", drained.len());
        drained.len()
    }

    /// Stop accepting new work; later launches are logged no-ops
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Close the registry and cancel everything still running
    pub fn shutdown(&self) -> usize {
        self.close();
        self.cancel_all()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_running(&self, id: &str) -> bool {
        lock(&self.tasks).values().any(|entry| entry.id == id)
    }

    /// Whether any task whose id starts with `prefix` is registered
    pub fn is_running_prefix(&self, prefix: &str) -> bool {
        lock(&self.tasks).values().any(|entry| entry.id.starts_with(prefix))
    }

    /// Start time of the most recent launch under `id`
    pub fn started_at(&self, id: &str) -> Option<Instant> {
        lock(&self.tasks)
            .values()
            .filter(|entry| entry.id == id)
            .map(|entry| entry.started_at)
            .max()
    }

    pub fn running(&self) -> Vec<TaskInfo> {
        let mut infos: Vec<TaskInfo> = lock(&self.tasks)
            .values()
            .map(|entry| TaskInfo {
                id: entry.id.clone(),
                started_at: entry.started_at,
            })
            .collect();
        infos.sort_by_key(|info| info.started_at);
        infos
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.running().into_iter().map(|info| info.id).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register(&self, id: &str) -> Option<(CancellationToken, Registration)> {
        if self.is_closed() {
            log::info!(target: "roster::tasks", "Registry is shutting down, task '{}' not started", id);
            return None;
        }

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        {
            let mut tasks = lock(&self.tasks);
            if tasks.values().any(|entry| entry.id == id) {
                log::warn!(target: "roster::tasks", "Task id '{}' reused while still running", id);
            }
            tasks.insert(
                serial,
                TaskEntry {
                    id: id.to_string(),
                    token: token.clone(),
                    started_at: Instant::now(),
                },
            );
        }
        log::debug!(target: "roster::tasks", "Launching task '{}'", id);

        let registration = Registration {
            tasks: Arc::clone(&self.tasks),
            id: id.to_string(),
            serial,
        };
        Some((token, registration))
    }
}

impl BusinessTeardown for TaskRegistry {
    fn stop_business(&self) -> Result<()> {
        let cancelled = self.shutdown();
        log::info!(target: "roster::shutdown", "Cancelled {} background task(s)", cancelled);
        Ok(())
    }
}

fn report(
    id: &str,
    token: &CancellationToken,
    outcome: std::thread::Result<Result<()>>,
) -> TaskExit {
    match outcome {
        Ok(Ok(())) if token.is_cancelled() => {
            log::info!(target: "roster::tasks", "Task '{}' stopped after cancellation", id);
            TaskExit::Cancelled
        }
        Ok(Ok(())) => {
            log::debug!(target: "roster::tasks", "Task '{}' completed", id);
            TaskExit::Completed
        }
        Ok(Err(err)) if token.is_cancelled() => {
            log::info!(target: "roster::tasks", "Task '{}' ended after cancellation: {:#}", id, err);
            TaskExit::Cancelled
        }
        Ok(Err(err)) => {
            log::error!(target: "roster::tasks", "Task '{}' failed: {:#}", id, err);
            TaskExit::Failed
        }
        Err(payload) => {
            log::error!(
                target: "roster::tasks",
                "Task '{}' panicked: {}",
                id,
                panic_message(payload.as_ref())
            );
            TaskExit::Panicked
        }
    }
}

fn lock(tasks: &Mutex<HashMap<u64, TaskEntry>>) -> MutexGuard<'_, HashMap<u64, TaskEntry>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    async fn wait_until_empty(registry: &TaskRegistry) {
        for _ in 0..200 {
            if registry.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("registry still holds {:?}", registry.running_ids());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_is_registered_before_work_runs() {
        let registry = Arc::new(TaskRegistry::current().unwrap());
        let (tx, rx) = mpsc::channel();
        let observer = registry.clone();

        registry.launch("snapshot", move |_| {
            tx.send(observer.is_running("snapshot")).unwrap();
            Ok(())
        });

        let seen = tokio::task::spawn_blocking(move || rx.recv().unwrap()).await.unwrap();
        assert!(seen, "work ran before its registration was visible");
        wait_until_empty(&registry).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_and_panicking_tasks_are_removed() {
        let registry = TaskRegistry::current().unwrap();

        registry.launch("fails", |_| anyhow::bail!("disk full"));
        registry.launch("panics", |_| panic!("bad row"));
        registry.launch_async("async-fails", |_| async { Err::<(), _>(anyhow::anyhow!("timeout")) });

        wait_until_empty(&registry).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_all_signals_and_clears() {
        let registry = TaskRegistry::current().unwrap();
        let (tx, rx) = mpsc::channel();

        registry.launch("export", move |token| {
            while !token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(2));
            }
            tx.send(()).unwrap();
            Ok(())
        });
        registry.launch_async("sync", |token| async move {
            token.cancelled().await;
            anyhow::Ok(())
        });

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.cancel_all(), 2);
        assert!(registry.is_empty());

        tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_closed_registry_ignores_launch() {
        let registry = TaskRegistry::current().unwrap();
        assert_eq!(registry.shutdown(), 0);
        assert!(registry.is_closed());

        let (tx, rx) = mpsc::channel::<()>();
        registry.launch("late", move |_| {
            tx.send(()).unwrap();
            Ok(())
        });

        assert!(registry.is_empty());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stale_completion_does_not_evict_reused_id() {
        let registry = TaskRegistry::current().unwrap();
        let (release_first, first_gate) = mpsc::channel::<()>();
        let (release_second, second_gate) = mpsc::channel::<()>();

        registry.launch("save", move |_| {
            first_gate.recv().ok();
            Ok(())
        });
        registry.launch("save", move |_| {
            second_gate.recv().ok();
            Ok(())
        });

        release_first.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.is_running("save"));

        release_second.send(()).unwrap();
        wait_until_empty(&registry).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_all_reaches_every_launch_of_a_reused_id() {
        let registry = TaskRegistry::current().unwrap();
        let (tx, rx) = mpsc::channel();

        for launch in 0..2 {
            let tx = tx.clone();
            registry.launch("export", move |token| {
                while !token.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(2));
                }
                tx.send(launch).unwrap();
                Ok(())
            });
        }
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.cancel_all(), 2);

        let mut stopped = tokio::task::spawn_blocking(move || {
            (0..2)
                .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();
        stopped.sort();
        assert_eq!(stopped, vec![0, 1]);
        wait_until_empty(&registry).await;
    }
}
