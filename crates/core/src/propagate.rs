//! Mapping child readiness and addresses onto dependent conditions.

use crate::conditions::{ConditionAccessor, ConditionManager, ConditionSet, ConditionStatus, ConditionType};

/// Dependent condition raised by [`set_address`].
pub const ADDRESSABLE: ConditionType = ConditionType::from_static("Addressable");

pub const REASON_NO_URL: &str = "NoURL";
pub const REASON_NOT_REPORTED: &str = "NotReported";

/// Readiness condition of a child resource, detached from the child's API type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildCondition {
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
}

impl ChildCondition {
    pub fn new(status: ConditionStatus, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self { status, reason: reason.into(), message: message.into() }
    }

    /// Parses Kubernetes' string statuses; anything but `True`/`False` is Unknown.
    pub fn from_k8s(status: &str, reason: Option<&str>, message: Option<&str>) -> Self {
        let status = match status {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        };
        Self::new(status, reason.unwrap_or_default(), message.unwrap_or_default())
    }
}

/// Tri-state pass-through of a child's readiness onto `own`.
///
/// Safe to call with stale snapshots: the last call wins.
pub fn propagate_availability<S>(
    manager: &mut ConditionManager<'_, S>,
    own: &ConditionType,
    child: Option<&ChildCondition>,
) where
    S: ConditionAccessor + ?Sized,
{
    let Some(child) = child else {
        manager.mark_unknown(own, REASON_NOT_REPORTED, "child has not reported its readiness yet");
        return;
    };
    match child.status {
        ConditionStatus::True => manager.mark_true(own),
        ConditionStatus::False => manager.mark_false(own, child.reason.clone(), child.message.clone()),
        ConditionStatus::Unknown => manager.mark_unknown(own, child.reason.clone(), child.message.clone()),
    }
}

/// Status that carries an externally reachable address.
pub trait AddressableStatus: ConditionAccessor {
    fn address_url(&self) -> Option<&str>;
    fn set_address_url(&mut self, url: Option<String>);
}

/// Records `uri` as the address; an absent or empty uri clears it and marks
/// [`ADDRESSABLE`] False.
pub fn set_address<S>(set: &ConditionSet, status: &mut S, uri: Option<&str>)
where
    S: AddressableStatus + ?Sized,
{
    match uri.filter(|u| !u.is_empty()) {
        Some(u) => {
            status.set_address_url(Some(u.to_string()));
            set.manage(status).mark_true(&ADDRESSABLE);
        }
        None => {
            status.set_address_url(None);
            set.manage(status).mark_false(&ADDRESSABLE, REASON_NO_URL, "address is not yet resolvable");
        }
    }
}
