//! Scope composer: assembles identifier, observability, state, and
//! (for isolated scopes) a task group and events bus into one guarded
//! unit of execution.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use crate::ambient::{self, Ambient};
use crate::disposable::DisposableBundle;
use crate::error::CoreError;
use crate::events::EventsBus;
use crate::identifier::Identifier;
use crate::observability::{Observability, ObservabilityHandle};
use crate::state::Snapshot;
use crate::tasks::TaskGroup;

type AnyRecord = Arc<dyn Any + Send + Sync>;

/// Builds and runs a single scope.
///
/// Rust has no async `Drop`, so unlike the `async with` pattern this
/// crate's design is modeled on, teardown is driven by [`ScopeBuilder::run`]
/// rather than a guard's destructor — entry, the body, and exit all happen
/// inside one `await`ed call, which is what guarantees ordering even when
/// the body panics or returns early via `?`.
pub struct ScopeBuilder {
    label: &'static str,
    records: Vec<AnyRecord>,
    disposables: DisposableBundle,
    observability: Option<Arc<dyn Observability>>,
    isolated: bool,
}

impl ScopeBuilder {
    pub fn new(label: &'static str) -> Self {
        ScopeBuilder {
            label,
            records: Vec::new(),
            disposables: DisposableBundle::empty(),
            observability: None,
            isolated: false,
        }
    }

    pub fn with_state(mut self, records: Vec<AnyRecord>) -> Self {
        self.records = records;
        self
    }

    pub fn with_disposables(mut self, disposables: DisposableBundle) -> Self {
        self.disposables = disposables;
        self
    }

    pub fn with_observability(mut self, observability: Arc<dyn Observability>) -> Self {
        self.observability = Some(observability);
        self
    }

    pub fn isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }

    /// Enter the scope, run `body`, and unconditionally tear the scope
    /// down, returning the body's result or whatever error entry/exit
    /// produced (aggregated per [`CoreError::combine`]).
    pub async fn run<T, F, Fut>(mut self, body: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let parent = ambient::try_current().ok();

        let identifier = Identifier::for_scope(self.label, parent.as_ref().map(|p| &p.identifier));

        let observability = match self.observability.take() {
            Some(binding) => ObservabilityHandle::new(binding),
            None => parent
                .as_ref()
                .map(|p| p.observability.clone())
                .unwrap_or_else(ObservabilityHandle::default_backend),
        };
        observability.scope_entering(&identifier);

        let disposable_records = match self.disposables.prepare().await {
            Ok(records) => records,
            Err(err) => {
                observability.scope_exiting(&identifier, Some(&err));
                return Err(err);
            }
        };

        let parent_snapshot = parent
            .as_ref()
            .map(|p| Arc::clone(&p.state))
            .unwrap_or_else(Snapshot::empty);
        let mut merged = disposable_records;
        merged.append(&mut self.records);
        let snapshot = parent_snapshot.updated(merged);

        let is_isolated = self.isolated || parent.is_none();
        let (events, task_group) = if is_isolated {
            (EventsBus::new(), TaskGroup::new_root())
        } else {
            let parent = parent.as_ref().expect("non-isolated scope always has a parent");
            (parent.events.clone(), Arc::clone(&parent.task_group))
        };

        let ambient = Ambient {
            identifier: identifier.clone(),
            state: snapshot,
            observability: observability.clone(),
            events,
            task_group: Arc::clone(&task_group),
            current_task_cancellation: parent.and_then(|p| p.current_task_cancellation),
        };

        let body_result = ambient::scope_with(ambient, body()).await;

        let mut exit_errors = Vec::new();
        if is_isolated
            && let Err(err) = task_group.wait_all(body_result.is_err()).await
        {
            exit_errors.push(err);
        }
        if let Err(err) = self.disposables.dispose(body_result.as_ref().err()).await {
            exit_errors.push(err);
        }

        // `CoreError` isn't `Clone` (it wraps arbitrary boxed causes), so the
        // exit-time log is given a `Display`-equivalent value rather than
        // the original; the observability callback only reads text here.
        let exit_exception = exit_errors
            .first()
            .or(body_result.as_ref().err())
            .map(|err| CoreError::TaskFailure(err.to_string()));
        observability.scope_exiting(&identifier, exit_exception.as_ref());

        let (value, body_err) = match body_result {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err)),
        };

        match CoreError::combine(body_err, exit_errors) {
            Some(err) => Err(err),
            None => Ok(value.expect("value present whenever no error was produced")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::erase;
    use crate::{ctx, disposable::Disposable};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default, Debug, PartialEq, Clone)]
    struct Counter(i32);

    #[tokio::test]
    async fn nested_scope_shadows_then_restores() {
        let result = ScopeBuilder::new("root")
            .with_state(vec![erase(Counter(1))])
            .run(|| async {
                let child_result = ScopeBuilder::new("child")
                    .with_state(vec![erase(Counter(2))])
                    .run(|| async {
                        let inner = ctx::state::<Counter>(None)?;
                        Ok::<_, CoreError>(inner.0)
                    })
                    .await?;
                assert_eq!(child_result, 2);
                let outer = ctx::state::<Counter>(None)?;
                Ok::<_, CoreError>(outer.0)
            })
            .await
            .unwrap();
        assert_eq!(result, 1);
    }

    #[tokio::test]
    async fn task_spawned_in_scope_sees_snapshot_then_updating_overlay() {
        let result = ScopeBuilder::new("root")
            .with_state(vec![erase(Counter(10))])
            .run(|| async {
                let handle = ctx::spawn(async {
                    let first = ctx::state::<Counter>(None).unwrap().0;
                    let second = ctx::updating(vec![erase(Counter(20))], || async {
                        Ok::<_, CoreError>(ctx::state::<Counter>(None).unwrap().0)
                    })
                    .await
                    .unwrap();
                    (first, second)
                });
                let (first, second) = handle.join().await.unwrap();
                assert_eq!(first, 10);
                assert_eq!(second, 20);
                let outer = ctx::state::<Counter>(None)?;
                Ok::<_, CoreError>(outer.0)
            })
            .await
            .unwrap();
        assert_eq!(result, 10);
    }

    struct Recording {
        name: &'static str,
        log: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Disposable for Recording {
        async fn acquire(&mut self) -> Result<Vec<AnyRecord>, CoreError> {
            self.log.lock().unwrap().push(format!("{}_open", self.name));
            Ok(vec![])
        }
        async fn release(&mut self, _exception: Option<&CoreError>) -> Result<(), CoreError> {
            self.log.lock().unwrap().push(format!("{}_close", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn disposables_release_in_reverse_around_body() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let mk = |name| {
            Box::new(Recording {
                name,
                log: Arc::clone(&log),
            }) as Box<dyn Disposable>
        };
        let bundle = DisposableBundle::new(vec![mk("a"), mk("b"), mk("c")]);
        let log_for_body = Arc::clone(&log);
        ScopeBuilder::new("root")
            .with_disposables(bundle)
            .run(|| async move {
                log_for_body.lock().unwrap().push("body".into());
                Ok::<_, CoreError>(())
            })
            .await
            .unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a_open", "b_open", "c_open", "body", "c_close", "b_close", "a_close"]
        );
    }

    #[tokio::test]
    async fn exit_time_release_failure_aggregates_with_body_error() {
        struct FailingRelease;
        #[async_trait]
        impl Disposable for FailingRelease {
            async fn acquire(&mut self) -> Result<Vec<AnyRecord>, CoreError> {
                Ok(vec![])
            }
            async fn release(&mut self, _exception: Option<&CoreError>) -> Result<(), CoreError> {
                Err(CoreError::TaskFailure("release failed".into()))
            }
        }
        let bundle = DisposableBundle::new(vec![Box::new(FailingRelease)]);
        let result = ScopeBuilder::new("root")
            .with_disposables(bundle)
            .run(|| async { Err::<(), _>(CoreError::TaskFailure("body failed".into())) })
            .await;
        match result {
            Err(CoreError::Aggregate(errs)) => assert_eq!(errs.len(), 2),
            other => panic!("expected aggregate, got {other:?}"),
        }
    }
}
