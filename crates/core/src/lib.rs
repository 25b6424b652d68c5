//! RedisBroker core types: object keys, store errors and the condition machinery.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod conditions;
pub mod propagate;

pub use conditions::{
    Condition, ConditionAccessor, ConditionManager, ConditionSet, ConditionSetRegistry,
    ConditionStatus, ConditionType, Generational,
};
pub use propagate::{propagate_availability, set_address, AddressableStatus, ChildCondition};

pub mod prelude {
    pub use super::{
        Condition, ConditionAccessor, ConditionSet, ConditionSetRegistry, ConditionStatus,
        ConditionType, Generational, ObjectKey, StoreError,
    };
}

/// Identity of a namespaced object; the unit of work on the reconcile queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Errors surfaced by reads and writes against the resource store.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("store: {0}")]
    Other(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_displays_namespace_slash_name() {
        assert_eq!(ObjectKey::new("ns", "b").to_string(), "ns/b");
    }

    #[test]
    fn store_error_classifies_not_found() {
        assert!(StoreError::NotFound("x".into()).is_not_found());
        assert!(!StoreError::Other("boom".into()).is_not_found());
    }
}
