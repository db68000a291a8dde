//! Ambient facade: the public surface most callers use day to day.
//!
//! Every function here resolves against the bundle installed by the
//! nearest enclosing [`crate::scope::ScopeBuilder::run`] (or, for `spawn`,
//! the bundle captured at submission time).

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures::Stream;

use crate::ambient::{self, Ambient};
use crate::attributes::AttributeSet;
use crate::error::CoreError;
use crate::observability::LogLevel;
use crate::scope::ScopeBuilder;
use crate::state::erase;
use crate::tasks::{self, TaskHandle};

/// Start building a new scope named `label`.
pub fn scope(label: &'static str) -> ScopeBuilder {
    ScopeBuilder::new(label)
}

/// Erase `value` into the form the state registry and `with_state` accept.
pub fn record<T: Any + Send + Sync + 'static>(value: T) -> Arc<dyn Any + Send + Sync> {
    erase(value)
}

/// Fetch the current record of concrete type `T`, falling through to
/// ancestors, then `default`, then `T::default()` (synthesized once).
pub fn state<T>(default: Option<T>) -> Result<Arc<T>, CoreError>
where
    T: Any + Send + Sync + Default + 'static,
{
    ambient::try_current()?.state.state(default)
}

pub fn contains<T: Any + 'static>() -> Result<bool, CoreError> {
    Ok(ambient::try_current()?.state.contains::<T>())
}

/// Run `body` with `records` merged on top of the current snapshot for the
/// duration of the returned future. The overlay is gone once `body`
/// completes, regardless of how it returns.
pub async fn updating<T, F, Fut>(records: Vec<Arc<dyn Any + Send + Sync>>, body: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let current = ambient::try_current()?;
    let mut next = current.clone();
    next.state = current.state.updated(records);
    ambient::scope_with(next, body()).await
}

/// Submit `future` to the active scope's task group, or to the process-wide
/// background group if no scope is active. The ambient bundle visible at
/// the moment of this call is snapshotted and reinstalled for the new
/// task; later mutations on the caller's side are never observed by it.
pub fn spawn<F, T>(future: F) -> TaskHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match ambient::try_current() {
        Ok(current) => {
            let group = Arc::clone(&current.task_group);
            group.spawn_with(move |token| {
                let mut task_ambient = current;
                task_ambient.current_task_cancellation = Some(token);
                ambient::scope_with(task_ambient, future)
            })
        }
        Err(_) => tasks::background_group().spawn(future),
    }
}

/// Cancel the task currently executing, i.e. the nearest `ctx::spawn`
/// frame. Fails with `InvariantViolation` when called outside any task
/// spawned through this crate.
pub fn cancel() -> Result<(), CoreError> {
    let current = ambient::try_current()?;
    match current.current_task_cancellation {
        Some(token) => {
            token.cancel();
            Ok(())
        }
        None => Err(CoreError::InvariantViolation(
            "ctx::cancel called outside any task spawned via ctx::spawn".into(),
        )),
    }
}

/// Publish `payload` on the active root scope's events bus. Discarded
/// silently if nobody has ever subscribed to this payload type.
pub fn send<T: Any + Send + Sync + 'static>(payload: T) -> Result<(), CoreError> {
    ambient::try_current()?.events.send(payload);
    Ok(())
}

/// Subscribe to payloads of type `T` published on the active scope's
/// events bus from this point forward.
pub fn subscribe<T>() -> Result<impl Stream<Item = Result<T, CoreError>>, CoreError>
where
    T: Any + Send + Sync + Clone + 'static,
{
    Ok(ambient::try_current()?.events.subscribe::<T>())
}

fn observability() -> Option<Ambient> {
    ambient::try_current().ok()
}

pub fn log_debug(message: &str) {
    log(LogLevel::Debug, message, &AttributeSet::new(), None);
}

pub fn log_info(message: &str) {
    log(LogLevel::Info, message, &AttributeSet::new(), None);
}

pub fn log_warning(message: &str) {
    log(LogLevel::Warn, message, &AttributeSet::new(), None);
}

pub fn log_error(message: &str, exception: Option<&CoreError>) {
    log(LogLevel::Error, message, &AttributeSet::new(), exception);
}

pub fn log(level: LogLevel, message: &str, attributes: &AttributeSet, exception: Option<&CoreError>) {
    if let Some(current) = observability() {
        current.observability.log(level, message, attributes, exception);
    }
}

pub fn record_event(name: &str, level: LogLevel, attributes: &AttributeSet) {
    if let Some(current) = observability() {
        current.observability.record_event(name, level, attributes);
    }
}

pub fn record_metric(
    name: &str,
    value: f64,
    unit: Option<&str>,
    kind: crate::observability::MetricKind,
    attributes: &AttributeSet,
) {
    if let Some(current) = observability() {
        current.observability.record_metric(name, value, unit, kind, attributes);
    }
}

pub fn record_attributes(attributes: &AttributeSet) {
    if let Some(current) = observability() {
        current.observability.record_attributes(attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_outside_any_task_fails() {
        let result = scope("root")
            .run(|| async { Ok::<_, CoreError>(cancel()) })
            .await
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn contains_reflects_installed_records() {
        #[derive(Default)]
        struct Marker;
        let seen = scope("root")
            .with_state(vec![record(Marker)])
            .run(|| async { Ok::<_, CoreError>(contains::<Marker>().unwrap()) })
            .await
            .unwrap();
        assert!(seen);
    }
}
