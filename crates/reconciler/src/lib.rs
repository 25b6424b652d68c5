//! Reconcile step for a RedisBroker.
//!
//! One pass loads the broker, ensures the Redis tier (unless an external
//! connection is configured) and the broker tier, folds the observed child
//! status into the broker's conditions, publishes the address and writes the
//! status back when it changed. Each pass is level-triggered: it only looks at
//! the current state and never at the notification that caused it.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use metrics::{counter, histogram};
use redbroker_api::lifecycle::service_readiness;
use redbroker_api::{RedisBroker, RedisBrokerStatus};
use redbroker_core::{ConditionSet, ConditionSetRegistry, ConditionStatus, ObjectKey, StoreError};
use redbroker_queue::{Handler, Outcome};
use tracing::{debug, info, info_span, warn, Instrument};

pub mod ports;
pub mod resources;
pub mod validate;

pub use ports::{BrokerStore, ChildApplier};
pub use validate::{validate, InvalidSpec};

use resources::Component;

pub const DEFAULT_REDIS_IMAGE: &str = "redis/redis-stack-server:latest";
pub const DEFAULT_BROKER_IMAGE: &str = "gcr.io/triggermesh/redis-broker:latest";
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
pub const DEFAULT_BROKER_CLUSTER_ROLE: &str = "redbroker-broker";

pub const REASON_APPLY_FAILED: &str = "ApplyFailed";

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Store or child write failed; retried with backoff.
    #[error(transparent)]
    Transient(#[from] StoreError),
    /// Invalid broker configuration; left alone until the object changes.
    #[error("{reason}: {message}")]
    Permanent { reason: String, message: String },
}

impl From<InvalidSpec> for ReconcileError {
    fn from(e: InvalidSpec) -> Self {
        ReconcileError::Permanent { reason: e.reason.to_string(), message: e.message }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub redis_image: String,
    pub broker_image: String,
    pub cluster_domain: String,
    /// ClusterRole bound to each broker's ServiceAccount.
    pub broker_cluster_role: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            redis_image: DEFAULT_REDIS_IMAGE.to_string(),
            broker_image: DEFAULT_BROKER_IMAGE.to_string(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            broker_cluster_role: DEFAULT_BROKER_CLUSTER_ROLE.to_string(),
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn BrokerStore>,
    children: Arc<dyn ChildApplier>,
    conditions: Arc<ConditionSetRegistry>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn BrokerStore>,
        children: Arc<dyn ChildApplier>,
        conditions: Arc<ConditionSetRegistry>,
        config: ReconcilerConfig,
    ) -> Self {
        Self { store, children, conditions, config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn conditions(&self) -> &Arc<ConditionSetRegistry> {
        &self.conditions
    }

    /// Swap the condition set used by subsequent passes.
    pub fn register_condition_set(&self, set: ConditionSet) {
        self.conditions.register(set);
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Outcome {
        let started = Instant::now();
        counter!("reconcile_total", 1u64);
        let outcome = self.reconcile_key(key).await;
        histogram!("reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        outcome
    }

    async fn reconcile_key(&self, key: &ObjectKey) -> Outcome {
        let broker = match self.store.get_broker(key).await {
            Ok(Some(b)) => b,
            Ok(None) | Err(StoreError::NotFound(_)) => {
                debug!("broker no longer exists");
                return Outcome::Forget;
            }
            Err(e) => {
                counter!("reconcile_errors", 1u64, "kind" => "transient");
                warn!(error = %e, "loading broker failed");
                return Outcome::Retry;
            }
        };

        // Read the active set once so a concurrent swap cannot split this pass.
        let set = self.conditions.current();
        let mut status = broker.status.clone().unwrap_or_default();
        status.initialize_conditions(&set);

        let outcome = match self.reconcile_broker(&broker, &set, &mut status).await {
            Ok(()) => {
                status.observed_generation = broker.metadata.generation;
                Outcome::Forget
            }
            Err(ReconcileError::Permanent { reason, message }) => {
                counter!("reconcile_errors", 1u64, "kind" => "permanent");
                warn!(%reason, %message, "broker spec rejected");
                status.observed_generation = broker.metadata.generation;
                Outcome::Forget
            }
            Err(ReconcileError::Transient(e)) => {
                counter!("reconcile_errors", 1u64, "kind" => "transient");
                warn!(error = %e, "reconcile failed; will retry");
                Outcome::Retry
            }
        };

        if broker.status.as_ref() == Some(&status) {
            debug!("status unchanged");
            return outcome;
        }
        let mut updated = broker;
        updated.status = Some(status);
        match self.store.update_status(&updated).await {
            Ok(()) => {
                counter!("status_updates", 1u64);
                info!(ready = updated.is_ready(&set), "status updated");
                outcome
            }
            Err(StoreError::NotFound(_)) => Outcome::Forget,
            Err(e) => {
                warn!(error = %e, "status update failed");
                Outcome::Retry
            }
        }
    }

    async fn reconcile_broker(
        &self,
        broker: &RedisBroker,
        set: &ConditionSet,
        status: &mut RedisBrokerStatus,
    ) -> Result<(), ReconcileError> {
        if let Err(invalid) = validate(&broker.spec) {
            let mut manager = set.manage(status);
            manager.mark_false(&invalid.condition, invalid.reason, invalid.message.clone());
            // An alternate set may not declare the tier's condition; the verdict
            // must still reach the top level through a declared dependent.
            if !set.dependent_types().contains(&invalid.condition) {
                if let Some(first) = set.dependent_types().first() {
                    manager.mark_false(first, invalid.reason, invalid.message.clone());
                }
            }
            return Err(invalid.into());
        }
        let owner = broker
            .controller_owner_ref(&())
            .ok_or_else(|| StoreError::Other("broker has no uid yet".to_string()))?;

        let redis_address = self.ensure_redis(broker, &owner, set, status).await?;
        self.ensure_broker(broker, &owner, set, status, &redis_address).await
    }

    /// Redis tier; returns the address the broker connects to.
    async fn ensure_redis(
        &self,
        broker: &RedisBroker,
        owner: &OwnerReference,
        set: &ConditionSet,
        status: &mut RedisBrokerStatus,
    ) -> Result<String, ReconcileError> {
        if let Some(conn) = broker.spec.external_redis() {
            info!(reason = "ExternalRedis", "using external redis; no redis workload");
            status.mark_redis_external(set);
            return Ok(conn.url.clone());
        }

        let desired = resources::redis_deployment(broker, owner, &self.config);
        let deployment = match self.children.apply_deployment(desired).await {
            Ok(d) => d,
            Err(e) => {
                status.mark_redis_deployment_unknown(set, REASON_APPLY_FAILED, e.to_string());
                return Err(e.into());
            }
        };
        status.propagate_redis_deployment_availability(set, deployment.status.as_ref());

        let service = match self.children.apply_service(resources::redis_service(broker, owner)).await {
            Ok(s) => s,
            Err(e) => {
                status.mark_redis_service_unknown(set, REASON_APPLY_FAILED, e.to_string());
                return Err(e.into());
            }
        };
        status.propagate_redis_service_readiness(set, &service);

        let host = resources::service_host(
            &service.name_any(),
            &broker.namespace().unwrap_or_default(),
            &self.config.cluster_domain,
        );
        Ok(format!("{}:{}", host, resources::REDIS_PORT))
    }

    async fn ensure_broker(
        &self,
        broker: &RedisBroker,
        owner: &OwnerReference,
        set: &ConditionSet,
        status: &mut RedisBrokerStatus,
        redis_address: &str,
    ) -> Result<(), ReconcileError> {
        let workload = async {
            self.children.apply_service_account(resources::broker_service_account(broker, owner)).await?;
            self.children
                .apply_role_binding(resources::broker_role_binding(broker, owner, &self.config))
                .await?;
            let desired = resources::broker_deployment(broker, owner, &self.config, redis_address);
            self.children.apply_deployment(desired).await
        };
        let deployment = match workload.await {
            Ok(d) => d,
            Err(e) => {
                status.mark_broker_deployment_unknown(set, REASON_APPLY_FAILED, e.to_string());
                return Err(e.into());
            }
        };
        status.propagate_broker_deployment_availability(set, deployment.status.as_ref());

        let service = match self.children.apply_service(resources::broker_service(broker, owner)).await {
            Ok(s) => s,
            Err(e) => {
                status.mark_broker_service_unknown(set, REASON_APPLY_FAILED, e.to_string());
                status.set_address(set, None);
                return Err(e.into());
            }
        };
        status.propagate_broker_service_readiness(set, &service);

        if service_readiness(&service).status == ConditionStatus::True {
            let url = resources::broker_url(
                &resources::child_name(&broker.name_any(), Component::Broker),
                &broker.namespace().unwrap_or_default(),
                &self.config.cluster_domain,
                resources::SERVICE_PORT,
            );
            status.set_address(set, Some(&url));
        } else {
            status.set_address(set, None);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Handler<ObjectKey> for Reconciler {
    async fn handle(&self, key: ObjectKey) -> Outcome {
        let span = info_span!("reconcile", key = %key);
        self.reconcile(&key).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_spec_becomes_permanent() {
        let invalid = InvalidSpec {
            condition: redbroker_api::BROKER_DEPLOYMENT_READY,
            reason: "InvalidPort",
            message: "broker port 0 is outside 1..=65535".into(),
        };
        let err = ReconcileError::from(invalid);
        assert!(matches!(err, ReconcileError::Permanent { .. }));
        assert_eq!(err.to_string(), "InvalidPort: broker port 0 is outside 1..=65535");
    }

    #[test]
    fn store_errors_are_transient() {
        let err: ReconcileError = StoreError::Other("timeout".into()).into();
        assert!(matches!(err, ReconcileError::Transient(_)));
    }
}
