//! Per-kind filters deciding which RedisBroker a notification belongs to.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use redbroker_api::{GroupKind, KReference};
use redbroker_core::{ObjectKey, StoreError};
use tracing::{error, trace};

/// Looks up whether a managed resource exists.
#[async_trait::async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// `Ok(())` when `key` exists; `StoreError::NotFound` when it does not.
    async fn resolve(&self, key: &ObjectKey) -> Result<(), StoreError>;
}

/// Key of the managed resource controlling an owned object, if the controller
/// owner reference has the managed group and kind.
pub fn controller_of(namespace: Option<&str>, owners: &[OwnerReference], managed: &GroupKind) -> Option<ObjectKey> {
    let namespace = namespace.filter(|ns| !ns.is_empty())?;
    let owner = owners.iter().find(|o| o.controller == Some(true))?;
    if GroupKind::from_api_version(&owner.api_version, &owner.kind) != *managed {
        trace!(owner = %owner.kind, api_version = %owner.api_version, "foreign controller owner");
        return None;
    }
    Some(ObjectKey::new(namespace, owner.name.clone()))
}

/// Kind must match; an unset or empty group matches any group.
pub fn references_kind(reference: &KReference, managed: &GroupKind) -> bool {
    let group_ok = match reference.group.as_deref() {
        None | Some("") => true,
        Some(g) => g == managed.group,
    };
    group_ok && reference.kind == managed.kind
}

/// Resolve the managed resource a referencing object in `namespace` points at.
///
/// Not found drops the notification. Any other lookup failure is logged and
/// dropped as well; a later notification retries.
pub async fn resolve_reference(
    namespace: &str,
    reference: &KReference,
    managed: &GroupKind,
    resolver: &dyn ReferenceResolver,
) -> Option<ObjectKey> {
    if !references_kind(reference, managed) {
        return None;
    }
    let key = ObjectKey::new(namespace, reference.name.clone());
    match resolver.resolve(&key).await {
        Ok(()) => Some(key),
        Err(StoreError::NotFound(_)) => {
            trace!(broker = %key, "referenced broker not found");
            None
        }
        Err(e) => {
            error!(broker = %key, error = %e, "unable to get referenced broker");
            None
        }
    }
}
