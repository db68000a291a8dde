//! Type-indexed, immutable, hierarchical state registry.

use std::any::{Any, TypeId};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CoreError;

type AnyRecord = Arc<dyn Any + Send + Sync>;

/// An immutable snapshot of records, chained to an optional parent.
///
/// Lookup falls through to the parent when the local overlay has no entry
/// for a type. Default-synthesis results are cached on the snapshot they
/// were synthesized against so a race between callers resolves to a single
/// instance (see [`Snapshot::state`]).
#[derive(Clone)]
pub struct Snapshot {
    parent: Option<Arc<Snapshot>>,
    local: Arc<std::collections::HashMap<TypeId, AnyRecord>>,
    synthesized: Arc<Mutex<std::collections::HashMap<TypeId, AnyRecord>>>,
}

impl Snapshot {
    /// The empty root snapshot.
    pub fn empty() -> Arc<Snapshot> {
        Arc::new(Snapshot {
            parent: None,
            local: Arc::new(std::collections::HashMap::new()),
            synthesized: Arc::new(Mutex::new(std::collections::HashMap::new())),
        })
    }

    /// Overlay `records` on top of `self`, later entries of the same type
    /// overriding earlier ones. Returns `self` unchanged if `records` is
    /// empty, avoiding an unnecessary allocation.
    pub fn updated(self: &Arc<Self>, records: Vec<AnyRecord>) -> Arc<Snapshot> {
        if records.is_empty() {
            return Arc::clone(self);
        }
        let mut local = std::collections::HashMap::with_capacity(records.len());
        for record in records {
            local.insert((*record).type_id(), record);
        }
        Arc::new(Snapshot {
            parent: Some(Arc::clone(self)),
            local: Arc::new(local),
            synthesized: Arc::new(Mutex::new(std::collections::HashMap::new())),
        })
    }

    fn find(&self, type_id: TypeId) -> Option<AnyRecord> {
        if let Some(record) = self.local.get(&type_id) {
            return Some(Arc::clone(record));
        }
        self.parent.as_ref().and_then(|p| p.find(type_id))
    }

    /// Look up a record of concrete type `T`, falling through ancestors
    /// before consulting `default`, and finally synthesizing `T::default()`
    /// exactly once per snapshot chain walk if neither is available.
    pub fn state<T>(self: &Arc<Self>, default: Option<T>) -> Result<Arc<T>, CoreError>
    where
        T: Any + Send + Sync + Default + 'static,
    {
        let type_id = TypeId::of::<T>();
        if let Some(record) = self.find(type_id) {
            return Ok(record
                .downcast::<T>()
                .expect("TypeId lookup guarantees matching concrete type"));
        }
        if let Some(default) = default {
            return Ok(Arc::new(default));
        }
        // No ancestor provided T and no default was given: synthesize once,
        // caching on the snapshot the caller walked from so concurrent
        // callers converge on one instance. The lock is not held across
        // `T::default()` so a recursive `state::<U>()` call from within the
        // Default impl cannot deadlock against this cache.
        if let Some(cached) = self.synthesized.lock().get(&type_id) {
            return Ok(Arc::clone(cached)
                .downcast::<T>()
                .expect("TypeId lookup guarantees matching concrete type"));
        }
        let fresh: AnyRecord = Arc::new(T::default());
        let mut guard = self.synthesized.lock();
        let winner = guard.entry(type_id).or_insert_with(|| fresh).clone();
        drop(guard);
        Ok(winner
            .downcast::<T>()
            .expect("TypeId lookup guarantees matching concrete type"))
    }

    /// Look up a record of concrete type `T` without synthesizing a
    /// default; fails with `MissingAmbient` if absent.
    pub fn require<T>(self: &Arc<Self>) -> Result<Arc<T>, CoreError>
    where
        T: Any + Send + Sync + 'static,
    {
        self.find(TypeId::of::<T>())
            .map(|record| {
                record
                    .downcast::<T>()
                    .expect("TypeId lookup guarantees matching concrete type")
            })
            .ok_or_else(CoreError::missing_ambient::<T>)
    }

    pub fn contains<T: Any + 'static>(&self) -> bool {
        self.find(TypeId::of::<T>()).is_some()
    }
}

/// Helper for erasing a concrete record into the registry's storage type.
pub fn erase<T: Any + Send + Sync + 'static>(value: T) -> AnyRecord {
    Arc::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, PartialEq)]
    struct Counter(i32);

    #[test]
    fn child_overrides_parent() {
        let root = Snapshot::empty().updated(vec![erase(Counter(1))]);
        let child = root.updated(vec![erase(Counter(2))]);
        assert_eq!(*child.state::<Counter>(None).unwrap(), Counter(2));
        assert_eq!(*root.state::<Counter>(None).unwrap(), Counter(1));
    }

    #[test]
    fn child_falls_through_when_not_overridden() {
        #[derive(Default, Debug, PartialEq)]
        struct Other(i32);
        let root = Snapshot::empty().updated(vec![erase(Counter(5)), erase(Other(9))]);
        let child = root.updated(vec![erase(Counter(6))]);
        assert_eq!(*child.state::<Other>(None).unwrap(), Other(9));
    }

    #[test]
    fn default_synthesis_happens_once() {
        let snap = Snapshot::empty();
        let a = snap.state::<Counter>(None).unwrap();
        let b = snap.state::<Counter>(None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn explicit_default_is_not_cached_across_snapshots() {
        let snap = Snapshot::empty();
        let value = snap.state(Some(Counter(42))).unwrap();
        assert_eq!(*value, Counter(42));
    }

    #[test]
    fn require_fails_without_any_provider() {
        #[derive(Debug)]
        struct NoDefault;
        let snap = Snapshot::empty();
        assert!(snap.require::<NoDefault>().is_err());
    }
}
