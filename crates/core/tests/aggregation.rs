#![forbid(unsafe_code)]

use redbroker_core::propagate::ADDRESSABLE;
use redbroker_core::{
    propagate_availability, set_address, AddressableStatus, ChildCondition, Condition, ConditionAccessor,
    ConditionSet, ConditionStatus, ConditionType, Generational,
};

const WORKLOAD: ConditionType = ConditionType::from_static("WorkloadReady");
const SERVICE: ConditionType = ConditionType::from_static("ServiceReady");
const EXTRA: ConditionType = ConditionType::from_static("ExtraReady");

#[derive(Debug, Default, Clone)]
struct Status {
    conditions: Vec<Condition>,
    url: Option<String>,
    observed_generation: Option<i64>,
}

impl ConditionAccessor for Status {
    fn conditions(&self) -> &[Condition] { &self.conditions }
    fn conditions_mut(&mut self) -> &mut Vec<Condition> { &mut self.conditions }
}

impl AddressableStatus for Status {
    fn address_url(&self) -> Option<&str> { self.url.as_deref() }
    fn set_address_url(&mut self, url: Option<String>) { self.url = url; }
}

struct Resource {
    generation: Option<i64>,
    status: Status,
}

impl Generational for Resource {
    fn generation(&self) -> Option<i64> { self.generation }
    fn observed_generation(&self) -> Option<i64> { self.status.observed_generation }
}

impl Resource {
    fn is_ready(&self, set: &ConditionSet) -> bool {
        self.generation_observed() && set.is_happy(&self.status)
    }
}

#[derive(Clone, Copy)]
enum Mark {
    True,
    False,
    Unknown,
}

fn apply(set: &ConditionSet, st: &mut Status, t: &ConditionType, m: Mark) {
    let reason = format!("{}Reason", t);
    let mut mgr = set.manage(st);
    match m {
        Mark::True => mgr.mark_true(t),
        Mark::False => mgr.mark_false(t, reason, "false"),
        Mark::Unknown => mgr.mark_unknown(t, reason, "unknown"),
    }
}

fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            out.push(tail);
        }
    }
    out
}

#[test]
fn all_dependents_true_is_happy() {
    let set = ConditionSet::living([WORKLOAD, SERVICE, EXTRA]);
    let mut st = Status::default();
    set.manage(&mut st).initialize_conditions();
    for t in set.dependent_types().to_vec() {
        set.manage(&mut st).mark_true(&t);
    }
    let mgr = set.manage(&mut st);
    assert!(mgr.is_happy());
    let top = mgr.top_level_condition();
    assert_eq!(top.status, ConditionStatus::True);
    assert_eq!(top.type_, ConditionType::READY);
}

#[test]
fn earliest_declared_false_wins_under_every_mark_order() {
    let set = ConditionSet::living([WORKLOAD, SERVICE, EXTRA]);
    let marks = vec![
        (WORKLOAD, Mark::Unknown),
        (SERVICE, Mark::False),
        (EXTRA, Mark::False),
    ];
    for order in permutations(&marks) {
        let mut st = Status::default();
        for (t, m) in &order {
            apply(&set, &mut st, t, *m);
        }
        let top = set.top_level_of(&st);
        assert_eq!(top.status, ConditionStatus::False);
        assert_eq!(top.reason, "ServiceReadyReason");
        let stored = st.conditions.iter().find(|c| c.type_ == ConditionType::READY).expect("ready stored");
        assert_eq!(stored.reason, "ServiceReadyReason");
    }
}

#[test]
fn earliest_declared_unknown_wins_when_nothing_is_false() {
    let set = ConditionSet::living([WORKLOAD, SERVICE, EXTRA]);
    let marks = vec![
        (WORKLOAD, Mark::True),
        (SERVICE, Mark::Unknown),
        (EXTRA, Mark::Unknown),
    ];
    for order in permutations(&marks) {
        let mut st = Status::default();
        for (t, m) in &order {
            apply(&set, &mut st, t, *m);
        }
        let top = set.top_level_of(&st);
        assert_eq!(top.status, ConditionStatus::Unknown);
        assert_eq!(top.reason, "ServiceReadyReason");
    }
}

#[test]
fn initialize_conditions_is_idempotent() {
    let set = ConditionSet::living([WORKLOAD, SERVICE, EXTRA]);
    let mut once = Status::default();
    set.manage(&mut once).initialize_conditions();
    let mut twice = once.clone();
    set.manage(&mut twice).initialize_conditions();
    assert_eq!(once.conditions, twice.conditions);
    assert_eq!(twice.conditions.len(), 4);
}

#[test]
fn set_address_empty_then_valid_leaves_single_true_condition() {
    let set = ConditionSet::living([ADDRESSABLE]);
    let mut st = Status::default();
    set_address(&set, &mut st, Some(""));
    let before = st
        .conditions
        .iter()
        .find(|c| c.type_ == ADDRESSABLE)
        .and_then(|c| c.last_transition_time)
        .expect("transition time");
    set_address(&set, &mut st, Some("https://x"));
    let addressable: Vec<_> = st.conditions.iter().filter(|c| c.type_ == ADDRESSABLE).collect();
    assert_eq!(addressable.len(), 1);
    assert_eq!(addressable[0].status, ConditionStatus::True);
    assert!(addressable[0].last_transition_time.expect("time") >= before);
    assert_eq!(st.address_url(), Some("https://x"));
}

#[test]
fn workload_then_service_then_address_becomes_ready() {
    let set = ConditionSet::living([WORKLOAD, SERVICE, ADDRESSABLE]);
    let mut res = Resource { generation: Some(3), status: Status::default() };
    set.manage(&mut res.status).initialize_conditions();
    res.status.observed_generation = Some(3);

    assert_eq!(set.top_level_of(&res.status).status, ConditionStatus::Unknown);
    assert!(!res.is_ready(&set));

    let up = ChildCondition::new(ConditionStatus::True, "", "");
    propagate_availability(&mut set.manage(&mut res.status), &WORKLOAD, Some(&up));
    assert_eq!(set.top_level_of(&res.status).status, ConditionStatus::Unknown);
    assert!(!res.is_ready(&set));

    propagate_availability(&mut set.manage(&mut res.status), &SERVICE, Some(&up));
    // children healthy but no address yet
    assert!(!res.is_ready(&set));

    set_address(&set, &mut res.status, Some("http://b-broker.a.svc.cluster.local"));
    assert_eq!(set.top_level_of(&res.status).status, ConditionStatus::True);
    assert!(res.is_ready(&set));
}

#[test]
fn stale_generation_is_not_ready() {
    let set = ConditionSet::living([WORKLOAD]);
    let mut res = Resource { generation: Some(2), status: Status::default() };
    set.manage(&mut res.status).mark_true(&WORKLOAD);
    res.status.observed_generation = Some(1);
    assert!(set.is_happy(&res.status));
    assert!(!res.is_ready(&set));
}
