//! Hierarchical structured-concurrency scopes.
//!
//! A [`scope`](ctx::scope) is the unit of composition: entering one creates
//! a nested child that inherits state, observability, and (unless
//! isolated) the task group and events bus of its parent; exiting one
//! tears it down in the reverse order it was built, waiting for spawned
//! tasks and releasing disposables regardless of how the body returned.
//!
//! The `ctx` module is the surface most callers use. The remaining modules
//! (`identifier`, `state`, `disposable`, `tasks`, `events`, `observability`,
//! `scope`, `ambient`) are the components `ctx` composes, each documented
//! with its own invariants.

pub mod ambient;
pub mod attributes;
pub mod ctx;
pub mod disposable;
pub mod error;
pub mod events;
pub mod identifier;
pub mod observability;
pub mod scope;
pub mod state;
pub mod tasks;

pub use attributes::{AttributeSet, AttributeValue};
pub use disposable::{Disposable, DisposableBundle};
pub use error::CoreError;
pub use identifier::Identifier;
pub use observability::{LogLevel, MetricKind, Observability, TracingObservability};
pub use scope::ScopeBuilder;
pub use tasks::TaskHandle;
