//! Tri-state conditions and the living condition set that folds them into one
//! top-level readiness verdict.
//!
//! A [`ConditionSet`] declares an ordered list of dependent condition types and
//! one top-level ("happy") type. A [`ConditionManager`] mutates the conditions
//! of any status implementing [`ConditionAccessor`] and recomputes the
//! top-level condition after every mutation:
//!
//! - every dependent True  -> top-level True
//! - otherwise the first False dependent in declaration order wins
//! - otherwise the first Unknown dependent in declaration order wins
//!
//! The winning dependent's reason and message are copied onto the top-level
//! condition. A declared dependent missing from the status reads as Unknown.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::info;

/// Three-valued condition status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Name of a condition, e.g. `Ready` or `Addressable`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ConditionType(Cow<'static, str>);

impl ConditionType {
    /// Conventional top-level type of a living condition set.
    pub const READY: ConditionType = ConditionType::from_static("Ready");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named tri-state fact about a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    /// Short CamelCase code for the last transition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Human readable details.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Some(Utc::now()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Capability of a status object whose conditions can be managed.
pub trait ConditionAccessor {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

/// Generation bookkeeping of a resource: the spec generation and the one the
/// controller last reconciled.
pub trait Generational {
    fn generation(&self) -> Option<i64>;
    fn observed_generation(&self) -> Option<i64>;

    /// False unless both generations are known and equal.
    fn generation_observed(&self) -> bool {
        matches!(
            (self.generation(), self.observed_generation()),
            (Some(g), Some(o)) if g == o
        )
    }
}

fn find<'c>(conditions: &'c [Condition], t: &ConditionType) -> Option<&'c Condition> {
    conditions.iter().find(|c| &c.type_ == t)
}

/// Ordered dependent condition types plus one top-level type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionSet {
    happy: ConditionType,
    dependents: SmallVec<[ConditionType; 8]>,
}

impl ConditionSet {
    /// Living set: top-level `Ready`, dependents in the given order.
    /// Duplicates and the top-level type itself are ignored.
    pub fn living<I>(dependents: I) -> Self
    where
        I: IntoIterator<Item = ConditionType>,
    {
        Self::with_happy(ConditionType::READY, dependents)
    }

    pub fn with_happy<I>(happy: ConditionType, dependents: I) -> Self
    where
        I: IntoIterator<Item = ConditionType>,
    {
        let mut deps: SmallVec<[ConditionType; 8]> = SmallVec::new();
        for t in dependents {
            if t != happy && !deps.contains(&t) {
                deps.push(t);
            }
        }
        Self { happy, dependents: deps }
    }

    pub fn happy_type(&self) -> &ConditionType {
        &self.happy
    }

    pub fn dependent_types(&self) -> &[ConditionType] {
        &self.dependents
    }

    pub fn contains(&self, t: &ConditionType) -> bool {
        &self.happy == t || self.dependents.contains(t)
    }

    /// Top-level type first, then dependents in declaration order.
    pub fn all_types(&self) -> impl Iterator<Item = &ConditionType> {
        std::iter::once(&self.happy).chain(self.dependents.iter())
    }

    pub fn manage<'a, S>(&'a self, status: &'a mut S) -> ConditionManager<'a, S>
    where
        S: ConditionAccessor + ?Sized,
    {
        ConditionManager { set: self, status }
    }

    /// Read-only evaluation of the top-level condition for `status`.
    pub fn top_level_of<S>(&self, status: &S) -> Condition
    where
        S: ConditionAccessor + ?Sized,
    {
        top_level(self, status.conditions())
    }

    pub fn is_happy<S>(&self, status: &S) -> bool
    where
        S: ConditionAccessor + ?Sized,
    {
        self.top_level_of(status).is_true()
    }
}

fn top_level(set: &ConditionSet, conditions: &[Condition]) -> Condition {
    let mut first_unknown: Option<(&str, &str)> = None;
    for t in set.dependent_types() {
        let (status, reason, message) = match find(conditions, t) {
            Some(c) => (c.status, c.reason.as_str(), c.message.as_str()),
            None => (ConditionStatus::Unknown, "", ""),
        };
        match status {
            ConditionStatus::True => {}
            ConditionStatus::False => {
                return stamped(set, conditions, ConditionStatus::False, reason, message);
            }
            ConditionStatus::Unknown => {
                if first_unknown.is_none() {
                    first_unknown = Some((reason, message));
                }
            }
        }
    }
    match first_unknown {
        Some((reason, message)) => stamped(set, conditions, ConditionStatus::Unknown, reason, message),
        None => stamped(set, conditions, ConditionStatus::True, "", ""),
    }
}

// Keeps the stored transition time when the top-level status did not move.
fn stamped(
    set: &ConditionSet,
    conditions: &[Condition],
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> Condition {
    let mut c = Condition::new(set.happy.clone(), status, reason, message);
    if let Some(prev) = find(conditions, &set.happy) {
        if prev.status == status {
            c.last_transition_time = prev.last_transition_time;
        }
    }
    c
}

/// Mutates the conditions of one status under a [`ConditionSet`].
pub struct ConditionManager<'a, S: ?Sized> {
    set: &'a ConditionSet,
    status: &'a mut S,
}

impl<'a, S> ConditionManager<'a, S>
where
    S: ConditionAccessor + ?Sized,
{
    /// Adds an Unknown condition for every declared type not present yet.
    pub fn initialize_conditions(&mut self) {
        let set = self.set;
        let conditions = self.status.conditions_mut();
        let mut inserted = false;
        for t in set.all_types() {
            if find(conditions, t).is_none() {
                conditions.push(Condition::new(t.clone(), ConditionStatus::Unknown, "", ""));
                inserted = true;
            }
        }
        if inserted {
            conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
        }
    }

    pub fn get_condition(&self, t: &ConditionType) -> Option<&Condition> {
        find(self.status.conditions(), t)
    }

    pub fn top_level_condition(&self) -> Condition {
        top_level(self.set, self.status.conditions())
    }

    pub fn is_happy(&self) -> bool {
        self.top_level_condition().is_true()
    }

    pub fn mark_true(&mut self, t: &ConditionType) {
        self.set_condition(Condition::new(t.clone(), ConditionStatus::True, "", ""));
        self.recompute();
    }

    pub fn mark_false(&mut self, t: &ConditionType, reason: impl Into<String>, message: impl Into<String>) {
        self.set_condition(Condition::new(t.clone(), ConditionStatus::False, reason, message));
        self.recompute();
    }

    pub fn mark_unknown(&mut self, t: &ConditionType, reason: impl Into<String>, message: impl Into<String>) {
        self.set_condition(Condition::new(t.clone(), ConditionStatus::Unknown, reason, message));
        self.recompute();
    }

    // The top-level type is derived-only; a direct mark on it is overwritten here.
    fn recompute(&mut self) {
        let top = self.top_level_condition();
        self.set_condition(top);
    }

    fn set_condition(&mut self, next: Condition) {
        let conditions = self.status.conditions_mut();
        match conditions.iter_mut().find(|c| c.type_ == next.type_) {
            Some(existing) => {
                if existing.status == next.status
                    && existing.reason == next.reason
                    && existing.message == next.message
                {
                    return;
                }
                let moved = existing.status != next.status;
                let ltt = if moved { next.last_transition_time } else { existing.last_transition_time };
                *existing = Condition { last_transition_time: ltt, ..next };
            }
            None => {
                conditions.push(next);
                conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
            }
        }
    }
}

/// Holds the active [`ConditionSet`]; swaps are a single atomic pointer store
/// so readers always see either the old or the new set.
pub struct ConditionSetRegistry {
    active: ArcSwap<ConditionSet>,
}

impl ConditionSetRegistry {
    pub fn new(set: ConditionSet) -> Self {
        Self { active: ArcSwap::from_pointee(set) }
    }

    pub fn current(&self) -> Arc<ConditionSet> {
        self.active.load_full()
    }

    /// Replace the active set for all subsequent reconciliations.
    pub fn register(&self, set: ConditionSet) {
        info!(
            happy = %set.happy_type(),
            dependents = set.dependent_types().len(),
            "registering alternate condition set"
        );
        self.active.store(Arc::new(set));
    }
}

impl fmt::Debug for ConditionSetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionSetRegistry").field("active", &*self.active.load()).finish()
    }
}
