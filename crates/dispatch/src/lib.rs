//! Dispatcher: turns change notifications of the watched kinds into RedisBroker
//! keys on the work queue.
//!
//! - RedisBroker: its own key, always
//! - owned children (Deployment, Service, ServiceAccount, RoleBinding): the
//!   controlling owner's key, when that owner is a RedisBroker
//! - Trigger: the referenced broker's key, when the reference names the
//!   RedisBroker kind and the broker exists in the trigger's namespace

#![forbid(unsafe_code)]

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use metrics::counter;
use redbroker_api::{GroupKind, KReference, RedisBroker, Trigger};
use redbroker_core::ObjectKey;
use redbroker_queue::WorkQueue;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub mod filter;

pub use filter::{controller_of, references_kind, resolve_reference, ReferenceResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Applied,
    Deleted,
}

/// One change notification from a watched kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Primary {
        change: ChangeKind,
        key: ObjectKey,
    },
    Owned {
        change: ChangeKind,
        child_kind: String,
        namespace: Option<String>,
        owners: Vec<OwnerReference>,
    },
    Referencing {
        change: ChangeKind,
        namespace: String,
        reference: KReference,
    },
}

impl ChangeEvent {
    pub fn primary(change: ChangeKind, broker: &RedisBroker) -> Self {
        ChangeEvent::Primary { change, key: broker.key() }
    }

    pub fn owned<K>(change: ChangeKind, obj: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        let meta = obj.meta();
        ChangeEvent::Owned {
            change,
            child_kind: K::kind(&()).to_string(),
            namespace: meta.namespace.clone(),
            owners: meta.owner_references.clone().unwrap_or_default(),
        }
    }

    pub fn referencing(change: ChangeKind, trigger: &Trigger) -> Self {
        ChangeEvent::Referencing {
            change,
            namespace: trigger.namespace().unwrap_or_default(),
            reference: trigger.spec.broker.clone(),
        }
    }

    fn source(&self) -> &'static str {
        match self {
            ChangeEvent::Primary { .. } => "primary",
            ChangeEvent::Owned { .. } => "owned",
            ChangeEvent::Referencing { .. } => "referencing",
        }
    }
}

pub struct Dispatcher {
    queue: WorkQueue<ObjectKey>,
    resolver: Arc<dyn ReferenceResolver>,
    managed: GroupKind,
}

impl Dispatcher {
    pub fn new(queue: WorkQueue<ObjectKey>, resolver: Arc<dyn ReferenceResolver>) -> Self {
        Self::with_managed(queue, resolver, GroupKind::of::<RedisBroker>())
    }

    pub fn with_managed(queue: WorkQueue<ObjectKey>, resolver: Arc<dyn ReferenceResolver>, managed: GroupKind) -> Self {
        Self { queue, resolver, managed }
    }

    /// Key a notification maps to, without enqueuing it.
    pub async fn route(&self, event: &ChangeEvent) -> Option<ObjectKey> {
        match event {
            ChangeEvent::Primary { key, .. } => Some(key.clone()),
            ChangeEvent::Owned { namespace, owners, .. } => controller_of(namespace.as_deref(), owners, &self.managed),
            ChangeEvent::Referencing { namespace, reference, .. } => {
                resolve_reference(namespace, reference, &self.managed, self.resolver.as_ref()).await
            }
        }
    }

    /// Route and enqueue; returns the key that was enqueued, if any.
    pub async fn dispatch(&self, event: ChangeEvent) -> Option<ObjectKey> {
        let source = event.source();
        let routed = self.route(&event).await;
        match &routed {
            Some(key) => {
                debug!(%key, source, "enqueue");
                counter!("dispatch_enqueued", 1u64, "source" => source);
                self.queue.enqueue(key.clone());
            }
            None => {
                counter!("dispatch_dropped", 1u64, "source" => source);
            }
        }
        routed
    }

    /// Drain notifications until every sender is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<ChangeEvent>) {
        info!(managed = %self.managed, "dispatcher started");
        while let Some(event) = rx.recv().await {
            self.dispatch(event).await;
        }
        info!("dispatcher stopped");
    }
}
