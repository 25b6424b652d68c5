#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use redbroker_api::{Destination, KReference, RedisBroker, RedisBrokerSpec, Trigger, TriggerSpec};
use redbroker_core::{ObjectKey, StoreError};
use redbroker_dispatch::{ChangeEvent, ChangeKind, Dispatcher, ReferenceResolver};
use redbroker_queue::WorkQueue;

/// In-memory resolver; `broken` keys fail with a non-NotFound error.
#[derive(Default)]
struct FakeResolver {
    existing: HashSet<ObjectKey>,
    broken: HashSet<ObjectKey>,
    lookups: AtomicUsize,
}

#[async_trait::async_trait]
impl ReferenceResolver for FakeResolver {
    async fn resolve(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.broken.contains(key) {
            return Err(StoreError::Other("connection refused".into()));
        }
        if self.existing.contains(key) {
            Ok(())
        } else {
            Err(StoreError::NotFound(key.to_string()))
        }
    }
}

fn setup(existing: &[(&str, &str)]) -> (WorkQueue<ObjectKey>, Arc<FakeResolver>, Dispatcher) {
    let queue = WorkQueue::new();
    let resolver = Arc::new(FakeResolver {
        existing: existing.iter().map(|(ns, n)| ObjectKey::new(*ns, *n)).collect(),
        ..Default::default()
    });
    let dispatcher = Dispatcher::new(queue.clone(), resolver.clone());
    (queue, resolver, dispatcher)
}

fn trigger(ns: &str, reference: KReference) -> Trigger {
    let mut t = Trigger::new("t1", TriggerSpec { broker: reference, filters: vec![], target: Destination::default() });
    t.metadata.namespace = Some(ns.to_string());
    t
}

fn deployment(ns: &str, owners: Vec<OwnerReference>) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some("b-broker".into()),
            namespace: Some(ns.into()),
            owner_references: Some(owners),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn broker_owner(name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "eventing.triggermesh.io/v1alpha1".into(),
        kind: "RedisBroker".into(),
        name: name.into(),
        uid: "00000000-0000-0000-0000-000000000042".into(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

#[tokio::test]
async fn primary_notifications_always_enqueue_own_key() {
    let (queue, _, d) = setup(&[]);
    let mut rb = RedisBroker::new("b", RedisBrokerSpec::default());
    rb.metadata.namespace = Some("a".into());
    for change in [ChangeKind::Applied, ChangeKind::Deleted] {
        let got = d.dispatch(ChangeEvent::primary(change, &rb)).await;
        assert_eq!(got, Some(ObjectKey::new("a", "b")));
    }
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn owned_child_enqueues_its_controller() {
    let (queue, _, d) = setup(&[]);
    let dep = deployment("a", vec![broker_owner("b")]);
    let got = d.dispatch(ChangeEvent::owned(ChangeKind::Applied, &dep)).await;
    assert_eq!(got, Some(ObjectKey::new("a", "b")));
    assert_eq!(queue.dequeue().await, Some(ObjectKey::new("a", "b")));
}

#[tokio::test]
async fn foreign_or_unowned_children_have_no_side_effects() {
    let (queue, resolver, d) = setup(&[("a", "b")]);
    let foreign = OwnerReference {
        api_version: "apps/v1".into(),
        kind: "ReplicaSet".into(),
        controller: Some(true),
        ..broker_owner("rs")
    };
    let unowned = Service {
        metadata: ObjectMeta { name: Some("plain".into()), namespace: Some("a".into()), ..Default::default() },
        ..Default::default()
    };
    assert_eq!(d.dispatch(ChangeEvent::owned(ChangeKind::Applied, &deployment("a", vec![foreign]))).await, None);
    assert_eq!(d.dispatch(ChangeEvent::owned(ChangeKind::Deleted, &unowned)).await, None);
    assert_eq!(queue.len(), 0);
    assert_eq!(resolver.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn trigger_for_existing_broker_enqueues_the_broker() {
    let (queue, _, d) = setup(&[("a", "b")]);
    let t = trigger("a", KReference::new(Some("eventing.triggermesh.io"), "RedisBroker", "b"));
    let got = d.dispatch(ChangeEvent::referencing(ChangeKind::Applied, &t)).await;
    assert_eq!(got, Some(ObjectKey::new("a", "b")));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.dequeue().await, Some(ObjectKey::new("a", "b")));
}

#[tokio::test]
async fn trigger_for_missing_broker_enqueues_nothing() {
    let (queue, resolver, d) = setup(&[("other", "b")]);
    let t = trigger("a", KReference::new(None, "RedisBroker", "b"));
    assert_eq!(d.dispatch(ChangeEvent::referencing(ChangeKind::Applied, &t)).await, None);
    assert_eq!(queue.len(), 0);
    assert_eq!(resolver.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn trigger_for_other_kind_is_dropped_without_lookup() {
    let (queue, resolver, d) = setup(&[("a", "b")]);
    let t = trigger("a", KReference::new(Some("eventing.knative.dev"), "Broker", "b"));
    assert_eq!(d.dispatch(ChangeEvent::referencing(ChangeKind::Applied, &t)).await, None);
    assert_eq!(queue.len(), 0);
    assert_eq!(resolver.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lookup_failure_fails_open() {
    let queue = WorkQueue::new();
    let resolver = Arc::new(FakeResolver {
        existing: [ObjectKey::new("a", "b")].into_iter().collect(),
        broken: [ObjectKey::new("a", "b")].into_iter().collect(),
        ..Default::default()
    });
    let d = Dispatcher::new(queue.clone(), resolver);
    let t = trigger("a", KReference::new(None, "RedisBroker", "b"));
    assert_eq!(d.dispatch(ChangeEvent::referencing(ChangeKind::Applied, &t)).await, None);
    assert_eq!(queue.len(), 0);
}

#[tokio::test]
async fn run_drains_channel_until_closed() {
    let (queue, _, d) = setup(&[("a", "b")]);
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let handle = tokio::spawn(d.run(rx));
    let t = trigger("a", KReference::new(None, "RedisBroker", "b"));
    tx.send(ChangeEvent::referencing(ChangeKind::Applied, &t)).await.expect("send");
    tx.send(ChangeEvent::owned(ChangeKind::Applied, &deployment("a", vec![broker_owner("c")]))).await.expect("send");
    drop(tx);
    handle.await.expect("dispatcher");
    assert_eq!(queue.len(), 2);
}
