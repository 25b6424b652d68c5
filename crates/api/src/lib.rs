//! RedisBroker API types.
//!
//! `RedisBroker` is the managed resource: the controller keeps a Redis tier and
//! a broker tier running for it and reports readiness through its conditions.
//! `Trigger` is a referencing resource that names a broker by `KReference`.

#![forbid(unsafe_code)]

pub mod broker;
pub mod lifecycle;
pub mod trigger;

pub use broker::{
    Addressable, BrokerSpec, Observability, RedisBroker, RedisBrokerSpec, RedisBrokerStatus,
    RedisConnection, RedisSpec, SecretKeyRef,
};
pub use lifecycle::{
    default_condition_set, BROKER_DEPLOYMENT_READY, BROKER_SERVICE_READY, REDIS_DEPLOYMENT_READY,
    REDIS_SERVICE_READY,
};
pub use redbroker_core::propagate::ADDRESSABLE;
pub use trigger::{Destination, KReference, Trigger, TriggerSpec};

/// API group shared by both kinds.
pub const GROUP: &str = "eventing.triggermesh.io";
pub const VERSION: &str = "v1alpha1";

/// API group and kind, the part of a type reference that survives versioning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), kind: kind.into() }
    }

    /// Group/kind of any static kube resource type.
    pub fn of<K>() -> Self
    where
        K: kube::Resource<DynamicType = ()>,
    {
        Self::new(K::group(&()), K::kind(&()))
    }

    /// Splits an `apiVersion` (`group/version` or bare `version`) and pairs it
    /// with `kind`.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let group = match api_version.split_once('/') {
            Some((g, _)) => g,
            None => "",
        };
        Self::new(group, kind)
    }
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}
