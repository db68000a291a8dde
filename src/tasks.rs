//! Supervised task groups: one per isolated scope, plus a process-wide
//! background group for detached spawns.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

enum Outcome<T> {
    Done(T),
    Cancelled,
    Panicked,
}

#[derive(Debug)]
enum Report {
    Done,
    Cancelled,
    Panicked,
}

/// Handle to a single spawned task.
pub struct TaskHandle<T> {
    join: tokio::task::JoinHandle<Outcome<T>>,
    cancellation: CancellationToken,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Request cooperative cancellation of this task.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Await the task's result, detaching group bookkeeping (the group's
    /// own exit-time wait has already happened or will happen
    /// independently; this is for callers who want the value directly).
    pub async fn join(self) -> Result<T, CoreError> {
        match self.join.await {
            Ok(Outcome::Done(value)) => Ok(value),
            Ok(Outcome::Cancelled) => Err(CoreError::Cancelled),
            Ok(Outcome::Panicked) => Err(CoreError::TaskFailure("task panicked".into())),
            Err(join_err) if join_err.is_cancelled() => Err(CoreError::Cancelled),
            Err(join_err) => Err(CoreError::TaskFailure(join_err.to_string())),
        }
    }

    /// Release the handle without awaiting; the task keeps running under
    /// its group's supervision.
    pub fn detach(self) {
        drop(self);
    }
}

/// A supervised group of tasks. Cancelling the group cancels every task
/// spawned into it (and, transitively, any child group created from its
/// token). Exit waits for every spawned task to report completion and
/// aggregates failures.
pub struct TaskGroup {
    cancellation: CancellationToken,
    report_tx: mpsc::UnboundedSender<Report>,
    report_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Report>>,
    spawned: AtomicUsize,
}

impl TaskGroup {
    pub fn new_root() -> Arc<TaskGroup> {
        Self::with_parent_token(CancellationToken::new())
    }

    pub fn child_of(&self) -> Arc<TaskGroup> {
        Self::with_parent_token(self.cancellation.child_token())
    }

    fn with_parent_token(cancellation: CancellationToken) -> Arc<TaskGroup> {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        Arc::new(TaskGroup {
            cancellation,
            report_tx,
            report_rx: tokio::sync::Mutex::new(report_rx),
            spawned: AtomicUsize::new(0),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel_all(&self) {
        self.cancellation.cancel();
    }

    /// Spawn `future` under this group's supervision. The returned future
    /// races against the group's (or an ancestor's) cancellation token; on
    /// cancellation, `future` is dropped without completing, which is the
    /// cooperative half of the crate's cancellation model. The group's own
    /// `AbortHandle`-driven drain at scope exit is the forceful fallback
    /// for tasks that never reach a suspension point.
    pub fn spawn<F, T>(self: &Arc<Self>, future: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_with(move |_token| future)
    }

    /// Like [`TaskGroup::spawn`], but hands the callback this task's own
    /// child cancellation token before it builds the future — used by the
    /// `ctx` facade to install that token into the ambient bundle the task
    /// sees, so `ctx::cancel()` can reach it.
    pub fn spawn_with<F, Fut, T>(self: &Arc<Self>, make_future: F) -> TaskHandle<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let child_token = self.cancellation.child_token();
        let race_token = child_token.clone();
        let report_tx = self.report_tx.clone();
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let future = make_future(child_token.clone());

        let wrapped = async move {
            let outcome = tokio::select! {
                biased;
                _ = race_token.cancelled() => Outcome::Cancelled,
                result = AssertUnwindSafe(future).catch_unwind() => match result {
                    Ok(value) => Outcome::Done(value),
                    Err(_) => Outcome::Panicked,
                },
            };
            let report = match &outcome {
                Outcome::Done(_) => Report::Done,
                Outcome::Cancelled => Report::Cancelled,
                Outcome::Panicked => Report::Panicked,
            };
            let _ = report_tx.send(report);
            outcome
        };

        TaskHandle {
            join: tokio::spawn(wrapped),
            cancellation: child_token,
        }
    }

    /// Wait for every task spawned so far to report completion, cancelling
    /// the group first if `cancel_first` is set. Aggregates task failures;
    /// a cancellation among them always wins (see [`CoreError::combine`]).
    ///
    /// The first failing report cancels the group's remaining siblings —
    /// a task raising is not allowed to leave the others running unsupervised
    /// while this call blocks waiting for them.
    pub async fn wait_all(&self, cancel_first: bool) -> Result<(), CoreError> {
        if cancel_first {
            self.cancellation.cancel();
        }
        let expected = self.spawned.swap(0, Ordering::SeqCst);
        let mut rx = self.report_rx.lock().await;
        let mut failures = Vec::new();
        for _ in 0..expected {
            match rx.recv().await {
                Some(Report::Done) => {}
                Some(Report::Cancelled) => {
                    failures.push(CoreError::Cancelled);
                    self.cancellation.cancel();
                }
                Some(Report::Panicked) => {
                    failures.push(CoreError::TaskFailure("task panicked".into()));
                    self.cancellation.cancel();
                }
                None => break,
            }
        }
        match CoreError::combine(None, failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

static BACKGROUND: OnceLock<Arc<TaskGroup>> = OnceLock::new();

/// The process-wide group used when `ctx::spawn` is called with no active
/// scope task group. Installs best-effort OS shutdown signal handling on
/// first access.
pub fn background_group() -> Arc<TaskGroup> {
    BACKGROUND
        .get_or_init(|| {
            let group = TaskGroup::new_root();
            install_shutdown_handlers(Arc::clone(&group));
            group
        })
        .clone()
}

fn install_shutdown_handlers(group: Arc<TaskGroup>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(_) => return,
            };
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(windows)]
        {
            let mut ctrl_c = match tokio::signal::windows::ctrl_c() {
                Ok(s) => s,
                Err(_) => return,
            };
            ctrl_c.recv().await;
        }
        group.cancel_all();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_all_succeeds_with_no_tasks() {
        let group = TaskGroup::new_root();
        group.wait_all(false).await.unwrap();
    }

    #[tokio::test]
    async fn wait_all_collects_single_task_result() {
        let group = TaskGroup::new_root();
        let handle = group.spawn(async { 42 });
        group.wait_all(false).await.unwrap();
        assert_eq!(handle.join().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn cancel_propagates_to_spawned_task() {
        let group = TaskGroup::new_root();
        let handle = group.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        handle.cancel();
        let result = handle.join().await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[tokio::test]
    async fn group_cancel_all_stops_siblings() {
        let group = TaskGroup::new_root();
        let a = group.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let b = group.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let wait = group.wait_all(true);
        let result = wait.await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(a.is_cancelled() || a.join().await.is_err());
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn failing_task_cancels_siblings_during_wait_all() {
        let group = TaskGroup::new_root();
        let a = group.spawn(async {
            panic!("boom");
        });
        let b = group.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let result = tokio::time::timeout(Duration::from_secs(5), group.wait_all(false)).await;
        assert!(result.is_ok(), "wait_all hung instead of cancelling siblings");
        assert!(result.unwrap().is_err());
        let _ = a.join().await;
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn child_group_inherits_parent_cancellation() {
        let parent = TaskGroup::new_root();
        let child = parent.child_of();
        let handle = child.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        parent.cancel_all();
        let result = handle.join().await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }
}
