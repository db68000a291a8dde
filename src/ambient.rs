//! Per-flow ambient storage: the bundle `ctx` resolves against.
//!
//! Held in a [`tokio::task_local!`] cell so it is inherited by nested
//! `.scope()` calls (dynamic scoping, restored on exit) but is NOT
//! automatically inherited across `tokio::spawn` — callers that want
//! snapshot-on-spawn semantics must explicitly re-install the captured
//! bundle in the new task, which is exactly what [`crate::ctx::spawn`]
//! does.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::events::EventsBus;
use crate::identifier::Identifier;
use crate::observability::ObservabilityHandle;
use crate::state::Snapshot;
use crate::tasks::TaskGroup;

#[derive(Clone)]
pub struct Ambient {
    pub identifier: Identifier,
    pub state: Arc<Snapshot>,
    pub observability: ObservabilityHandle,
    pub events: EventsBus,
    pub task_group: Arc<TaskGroup>,
    pub current_task_cancellation: Option<CancellationToken>,
}

tokio::task_local! {
    static CURRENT: Ambient;
}

/// The ambient bundle visible to the caller, if any scope is active.
pub fn try_current() -> Result<Ambient, CoreError> {
    CURRENT
        .try_with(|ambient| ambient.clone())
        .map_err(|_| CoreError::MissingAmbient { type_name: "scope" })
}

/// Run `future` with `ambient` installed as the current bundle, restoring
/// whatever was current beforehand once `future` completes.
pub async fn scope_with<F>(ambient: Ambient, future: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT.scope(ambient, future).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_current_fails_outside_any_scope() {
        assert!(try_current().is_err());
    }
}
