//! Scope identity: label, unique id, parent linkage.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a single scope instance.
///
/// `parent_id == scope_id` iff this identifier belongs to a root scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identifier {
    label: &'static str,
    scope_id: u64,
    parent_id: u64,
}

impl Identifier {
    /// Allocate a new identifier. `parent` is `None` for a root scope.
    pub fn for_scope(label: &'static str, parent: Option<&Identifier>) -> Self {
        let scope_id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let parent_id = parent.map(|p| p.scope_id).unwrap_or(scope_id);
        Identifier {
            label,
            scope_id,
            parent_id,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn scope_id(&self) -> u64 {
        self.scope_id
    }

    pub fn parent_id(&self) -> u64 {
        self.parent_id
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == self.scope_id
    }

    pub fn unique_name(&self) -> String {
        format!("{}[{:x}]", self.label, self.scope_id)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.unique_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_identifier_is_its_own_parent() {
        let root = Identifier::for_scope("root", None);
        assert!(root.is_root());
        assert_eq!(root.parent_id(), root.scope_id());
    }

    #[test]
    fn child_identifier_points_to_parent() {
        let root = Identifier::for_scope("root", None);
        let child = Identifier::for_scope("child", Some(&root));
        assert!(!child.is_root());
        assert_eq!(child.parent_id(), root.scope_id());
        assert_ne!(child.scope_id(), root.scope_id());
    }

    #[test]
    fn ids_are_unique_across_calls() {
        let a = Identifier::for_scope("a", None);
        let b = Identifier::for_scope("b", None);
        assert_ne!(a.scope_id(), b.scope_id());
    }
}
