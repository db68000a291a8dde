//! Ordered async-acquired resources with guaranteed, reverse-order release.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::CoreError;

type AnyRecord = Arc<dyn Any + Send + Sync>;

/// A single async-acquirable resource.
///
/// `acquire` may contribute zero or more state records. `release` must be
/// attempted even when an earlier disposable in the same bundle failed to
/// release; the bundle collects every failure rather than stopping at the
/// first.
#[async_trait]
pub trait Disposable: Send + Sync {
    async fn acquire(&mut self) -> Result<Vec<AnyRecord>, CoreError>;
    async fn release(&mut self, exception: Option<&CoreError>) -> Result<(), CoreError>;
}

/// An ordered collection of disposables, acquired forward and released in
/// reverse. Single-use: calling [`DisposableBundle::prepare`] twice, or
/// [`DisposableBundle::dispose`] without a prior `prepare`, is a programming
/// error and panics.
pub struct DisposableBundle {
    items: Vec<Box<dyn Disposable>>,
    prepared: AtomicBool,
    disposed: AtomicBool,
    acquired_count: usize,
}

impl DisposableBundle {
    pub fn new(items: Vec<Box<dyn Disposable>>) -> Self {
        DisposableBundle {
            items,
            prepared: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            acquired_count: 0,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Acquire every disposable in order. On partial failure, releases
    /// everything already acquired (in reverse order) before propagating
    /// the acquire error.
    pub async fn prepare(&mut self) -> Result<Vec<AnyRecord>, CoreError> {
        assert!(
            !self.prepared.swap(true, Ordering::AcqRel),
            "DisposableBundle::prepare called twice on the same bundle"
        );
        let mut records = Vec::new();
        for (index, item) in self.items.iter_mut().enumerate() {
            match item.acquire().await {
                Ok(mut contributed) => {
                    records.append(&mut contributed);
                    self.acquired_count = index + 1;
                }
                Err(err) => {
                    self.rollback(self.acquired_count).await;
                    self.disposed.store(true, Ordering::Release);
                    return Err(CoreError::ResourceAcquireFailure(Box::new(err)));
                }
            }
        }
        Ok(records)
    }

    async fn rollback(&mut self, acquired: usize) {
        for item in self.items[..acquired].iter_mut().rev() {
            let _ = item.release(None).await;
        }
    }

    /// Release every acquired disposable in reverse order, collecting all
    /// failures into a single error (an [`CoreError::Aggregate`] if more
    /// than one disposable failed to release).
    pub async fn dispose(&mut self, exception: Option<&CoreError>) -> Result<(), CoreError> {
        assert!(
            !self.disposed.swap(true, Ordering::AcqRel),
            "DisposableBundle::dispose called twice, or before prepare"
        );
        let mut errors = Vec::new();
        for item in self.items[..self.acquired_count].iter_mut().rev() {
            if let Err(err) = item.release(exception).await {
                errors.push(err);
            }
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(CoreError::ResourceReleaseFailure(Box::new(
                errors.into_iter().next().unwrap(),
            ))),
            _ => Err(CoreError::Aggregate(errors)),
        }
    }
}
