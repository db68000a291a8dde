//! Error taxonomy for scope entry, exit, and ambient access failures.

/// Errors raised by scope lifecycle, state lookup, disposables, and task
/// supervision.
///
/// `InvariantViolation` is reserved for conditions this crate treats as
/// programming errors elsewhere (unbalanced enter/exit, reentrant
/// single-use bundles) — those `panic!` rather than construct this variant,
/// per the fatal/recoverable split in the design notes. The variant still
/// exists here because `EventsBus::subscribe` surfaces a lagging
/// subscriber as a recoverable `InvariantViolation` rather than a panic.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("no active scope provides `{type_name}`")]
    MissingAmbient { type_name: &'static str },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("failed to acquire disposable: {0}")]
    ResourceAcquireFailure(Box<CoreError>),

    #[error("failed to release disposable(s)")]
    ResourceReleaseFailure(#[source] Box<CoreError>),

    #[error("task failed: {0}")]
    TaskFailure(String),

    #[error("scope cancelled")]
    Cancelled,

    #[error("{} errors occurred: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<CoreError>),
}

fn join_errors(errors: &[CoreError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    /// Combine a body error with exit-time errors into a single value.
    ///
    /// Cancellation always wins: the distilled spec requires that a
    /// cancellation surfacing during exit propagate unchanged rather than
    /// be buried inside an aggregate.
    pub fn combine(body: Option<CoreError>, mut exit_errors: Vec<CoreError>) -> Option<CoreError> {
        if let Some(CoreError::Cancelled) = body {
            return Some(CoreError::Cancelled);
        }
        if exit_errors.iter().any(|e| matches!(e, CoreError::Cancelled)) {
            return Some(CoreError::Cancelled);
        }
        let mut all: Vec<CoreError> = body.into_iter().collect();
        all.append(&mut exit_errors);
        match all.len() {
            0 => None,
            1 => all.pop(),
            _ => Some(CoreError::Aggregate(all)),
        }
    }

    pub fn missing_ambient<T: 'static>() -> Self {
        CoreError::MissingAmbient {
            type_name: std::any::type_name::<T>(),
        }
    }
}
