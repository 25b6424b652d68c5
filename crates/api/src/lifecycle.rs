//! Status lifecycle of a RedisBroker: condition set and propagation from
//! the child Deployments and Services.

use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::core::v1::Service;
use redbroker_core::propagate::ADDRESSABLE;
use redbroker_core::{
    propagate_availability, set_address, ChildCondition, Condition, ConditionSet, ConditionStatus,
    ConditionType,
};

use crate::broker::RedisBrokerStatus;

pub const REDIS_DEPLOYMENT_READY: ConditionType = ConditionType::from_static("RedisDeploymentReady");
pub const REDIS_SERVICE_READY: ConditionType = ConditionType::from_static("RedisServiceReady");
pub const BROKER_DEPLOYMENT_READY: ConditionType = ConditionType::from_static("BrokerDeploymentReady");
pub const BROKER_SERVICE_READY: ConditionType = ConditionType::from_static("BrokerServiceReady");

const DEPLOYMENT_AVAILABLE: &str = "Available";

pub const REASON_SERVICE_IP_PENDING: &str = "ServiceIPPending";

/// Condition set used unless an alternate one is registered.
pub fn default_condition_set() -> ConditionSet {
    ConditionSet::living([
        REDIS_DEPLOYMENT_READY,
        REDIS_SERVICE_READY,
        BROKER_DEPLOYMENT_READY,
        BROKER_SERVICE_READY,
        ADDRESSABLE,
    ])
}

/// Readiness of a Deployment is its `Available` condition.
pub fn deployment_availability(ds: Option<&DeploymentStatus>) -> Option<ChildCondition> {
    ds?.conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == DEPLOYMENT_AVAILABLE)
        .map(|c| ChildCondition::from_k8s(&c.status, c.reason.as_deref(), c.message.as_deref()))
}

/// A Service is ready once a cluster IP has been allocated, unless one of its
/// own status conditions reports False.
pub fn service_readiness(svc: &Service) -> ChildCondition {
    let failing = svc
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|cs| cs.iter().find(|c| c.status == "False"));
    if let Some(c) = failing {
        return ChildCondition::new(ConditionStatus::False, c.reason.clone(), c.message.clone());
    }
    let allocated = svc
        .spec
        .as_ref()
        .and_then(|s| s.cluster_ip.as_deref())
        .is_some_and(|ip| !ip.is_empty());
    if allocated {
        ChildCondition::new(ConditionStatus::True, "", "")
    } else {
        ChildCondition::new(ConditionStatus::Unknown, REASON_SERVICE_IP_PENDING, "cluster IP not allocated yet")
    }
}

impl RedisBrokerStatus {
    pub fn initialize_conditions(&mut self, set: &ConditionSet) {
        set.manage(self).initialize_conditions();
    }

    pub fn top_level_condition(&self, set: &ConditionSet) -> Condition {
        set.top_level_of(self)
    }

    pub fn get_condition(&self, t: &ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| &c.type_ == t)
    }

    pub fn set_address(&mut self, set: &ConditionSet, url: Option<&str>) {
        set_address(set, self, url);
    }

    pub fn mark_redis_deployment_failed(&mut self, set: &ConditionSet, reason: &str, message: impl Into<String>) {
        set.manage(self).mark_false(&REDIS_DEPLOYMENT_READY, reason, message);
    }

    pub fn mark_redis_deployment_unknown(&mut self, set: &ConditionSet, reason: &str, message: impl Into<String>) {
        set.manage(self).mark_unknown(&REDIS_DEPLOYMENT_READY, reason, message);
    }

    pub fn propagate_redis_deployment_availability(&mut self, set: &ConditionSet, ds: Option<&DeploymentStatus>) {
        let child = deployment_availability(ds);
        propagate_availability(&mut set.manage(self), &REDIS_DEPLOYMENT_READY, child.as_ref());
    }

    pub fn mark_redis_service_ready(&mut self, set: &ConditionSet) {
        set.manage(self).mark_true(&REDIS_SERVICE_READY);
    }

    pub fn mark_redis_service_failed(&mut self, set: &ConditionSet, reason: &str, message: impl Into<String>) {
        set.manage(self).mark_false(&REDIS_SERVICE_READY, reason, message);
    }

    pub fn mark_redis_service_unknown(&mut self, set: &ConditionSet, reason: &str, message: impl Into<String>) {
        set.manage(self).mark_unknown(&REDIS_SERVICE_READY, reason, message);
    }

    pub fn propagate_redis_service_readiness(&mut self, set: &ConditionSet, svc: &Service) {
        let child = service_readiness(svc);
        propagate_availability(&mut set.manage(self), &REDIS_SERVICE_READY, Some(&child));
    }

    /// External Redis: there is no Redis workload to wait for.
    pub fn mark_redis_external(&mut self, set: &ConditionSet) {
        let mut mgr = set.manage(self);
        mgr.mark_true(&REDIS_DEPLOYMENT_READY);
        mgr.mark_true(&REDIS_SERVICE_READY);
    }

    pub fn mark_broker_deployment_failed(&mut self, set: &ConditionSet, reason: &str, message: impl Into<String>) {
        set.manage(self).mark_false(&BROKER_DEPLOYMENT_READY, reason, message);
    }

    pub fn mark_broker_deployment_unknown(&mut self, set: &ConditionSet, reason: &str, message: impl Into<String>) {
        set.manage(self).mark_unknown(&BROKER_DEPLOYMENT_READY, reason, message);
    }

    pub fn propagate_broker_deployment_availability(&mut self, set: &ConditionSet, ds: Option<&DeploymentStatus>) {
        let child = deployment_availability(ds);
        propagate_availability(&mut set.manage(self), &BROKER_DEPLOYMENT_READY, child.as_ref());
    }

    pub fn mark_broker_service_failed(&mut self, set: &ConditionSet, reason: &str, message: impl Into<String>) {
        set.manage(self).mark_false(&BROKER_SERVICE_READY, reason, message);
    }

    pub fn mark_broker_service_unknown(&mut self, set: &ConditionSet, reason: &str, message: impl Into<String>) {
        set.manage(self).mark_unknown(&BROKER_SERVICE_READY, reason, message);
    }

    pub fn propagate_broker_service_readiness(&mut self, set: &ConditionSet, svc: &Service) {
        let child = service_readiness(svc);
        propagate_availability(&mut set.manage(self), &BROKER_SERVICE_READY, Some(&child));
    }
}
