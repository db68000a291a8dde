//! Uniform observability surface: logs, metrics, events, scope enter/exit.
//!
//! A scope inherits its parent's binding unless it supplies its own. A root
//! scope with no explicit binding falls back to [`TracingObservability`],
//! the crate's `tracing`-backed default.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::attributes::AttributeSet;
use crate::error::CoreError;
use crate::identifier::Identifier;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// Observability sink consulted by the scope composer and the `ctx` facade.
///
/// Implementations return `()`; the only failure mode the crate guards
/// against is a panic, which is caught at each call site (see
/// [`ObservabilityHandle`]) so a broken telemetry backend never interrupts
/// business logic.
pub trait Observability: Send + Sync + 'static {
    fn log(&self, level: LogLevel, message: &str, attributes: &AttributeSet, exception: Option<&CoreError>);
    fn record_event(&self, name: &str, level: LogLevel, attributes: &AttributeSet);
    fn record_metric(&self, name: &str, value: f64, unit: Option<&str>, kind: MetricKind, attributes: &AttributeSet);
    fn record_attributes(&self, attributes: &AttributeSet);
    fn scope_entering(&self, identifier: &Identifier);
    fn scope_exiting(&self, identifier: &Identifier, exception: Option<&CoreError>);
}

/// `tracing`-backed default binding used by root scopes with no explicit
/// observability supplied.
#[derive(Default)]
pub struct TracingObservability;

impl Observability for TracingObservability {
    fn log(&self, level: LogLevel, message: &str, attributes: &AttributeSet, exception: Option<&CoreError>) {
        let attrs = format!("{attributes:?}");
        match (level, exception) {
            (LogLevel::Debug, _) => tracing::debug!(%attrs, "{message}"),
            (LogLevel::Info, _) => tracing::info!(%attrs, "{message}"),
            (LogLevel::Warn, _) => tracing::warn!(%attrs, "{message}"),
            (LogLevel::Error, Some(err)) => tracing::error!(%attrs, error = %err, "{message}"),
            (LogLevel::Error, None) => tracing::error!(%attrs, "{message}"),
        }
    }

    fn record_event(&self, name: &str, level: LogLevel, attributes: &AttributeSet) {
        self.log(level, &format!("event: {name}"), attributes, None);
    }

    fn record_metric(&self, name: &str, value: f64, unit: Option<&str>, kind: MetricKind, attributes: &AttributeSet) {
        tracing::info!(
            metric = name,
            value,
            unit = unit.unwrap_or(""),
            kind = ?kind,
            attrs = ?attributes,
            "metric"
        );
    }

    fn record_attributes(&self, attributes: &AttributeSet) {
        tracing::info!(attrs = ?attributes, "attributes");
    }

    fn scope_entering(&self, identifier: &Identifier) {
        tracing::debug!(scope = %identifier, "scope entering");
    }

    fn scope_exiting(&self, identifier: &Identifier, exception: Option<&CoreError>) {
        match exception {
            Some(err) => tracing::error!(scope = %identifier, error = %err, "scope exit failed"),
            None => tracing::debug!(scope = %identifier, "scope exiting"),
        }
    }
}

/// Panic-isolating wrapper around an `Arc<dyn Observability>`.
///
/// Every outbound call is routed through [`std::panic::catch_unwind`]; a
/// panicking implementation is downgraded to an ERROR log on the crate's
/// built-in tracing backend instead of propagating into the caller, per the
/// "observability never breaks business logic" requirement. Scope
/// enter/exit calls use the same shim so the scope's own lifecycle is
/// unaffected by a broken binding.
#[derive(Clone)]
pub struct ObservabilityHandle(Arc<dyn Observability>);

impl ObservabilityHandle {
    pub fn new(inner: Arc<dyn Observability>) -> Self {
        ObservabilityHandle(inner)
    }

    pub fn default_backend() -> Self {
        ObservabilityHandle(Arc::new(TracingObservability))
    }

    fn guard<F: FnOnce() + panic::UnwindSafe>(&self, call_name: &'static str, f: F) {
        if panic::catch_unwind(f).is_err() {
            let fallback = TracingObservability;
            fallback.log(
                LogLevel::Error,
                &format!("observability call `{call_name}` panicked"),
                &AttributeSet::new(),
                None,
            );
        }
    }

    pub fn log(&self, level: LogLevel, message: &str, attributes: &AttributeSet, exception: Option<&CoreError>) {
        let inner = Arc::clone(&self.0);
        let message = message.to_owned();
        self.guard("log", AssertUnwindSafe(|| inner.log(level, &message, attributes, exception)));
    }

    pub fn record_event(&self, name: &str, level: LogLevel, attributes: &AttributeSet) {
        let inner = Arc::clone(&self.0);
        let name = name.to_owned();
        self.guard("record_event", AssertUnwindSafe(|| inner.record_event(&name, level, attributes)));
    }

    pub fn record_metric(&self, name: &str, value: f64, unit: Option<&str>, kind: MetricKind, attributes: &AttributeSet) {
        let inner = Arc::clone(&self.0);
        let name = name.to_owned();
        let unit = unit.map(str::to_owned);
        self.guard(
            "record_metric",
            AssertUnwindSafe(|| inner.record_metric(&name, value, unit.as_deref(), kind, attributes)),
        );
    }

    pub fn record_attributes(&self, attributes: &AttributeSet) {
        let inner = Arc::clone(&self.0);
        self.guard("record_attributes", AssertUnwindSafe(|| inner.record_attributes(attributes)));
    }

    pub fn scope_entering(&self, identifier: &Identifier) {
        let inner = Arc::clone(&self.0);
        self.guard("scope_entering", AssertUnwindSafe(|| inner.scope_entering(identifier)));
    }

    pub fn scope_exiting(&self, identifier: &Identifier, exception: Option<&CoreError>) {
        let inner = Arc::clone(&self.0);
        self.guard("scope_exiting", AssertUnwindSafe(|| inner.scope_exiting(identifier, exception)));
    }
}
