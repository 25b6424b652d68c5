//! The RedisBroker custom resource.

use kube::{CustomResource, ResourceExt};
use redbroker_core::{
    AddressableStatus, Condition, ConditionAccessor, ConditionSet, Generational, ObjectKey,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_STREAM: &str = "triggermesh";
pub const DEFAULT_STREAM_MAX_LEN: i64 = 1000;
pub const DEFAULT_BROKER_PORT: i32 = 8080;

/// Desired topology of a Redis backed broker.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "eventing.triggermesh.io",
    version = "v1alpha1",
    kind = "RedisBroker",
    namespaced,
    status = "RedisBrokerStatus",
    shortname = "rb",
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.address.url"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisBrokerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<BrokerSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    /// External Redis. When set no Redis workload is deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<RedisConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_max_len: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_trimming: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisConnection {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<SecretKeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretKeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_skip_verify: Option<bool>,
}

/// Key inside a Secret in the broker's namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability: Option<Observability>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Observability {
    /// ConfigMap holding logging/metrics settings for the broker process.
    pub config_map_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Addressable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisBrokerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,
}

impl ConditionAccessor for RedisBrokerStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl AddressableStatus for RedisBrokerStatus {
    fn address_url(&self) -> Option<&str> {
        self.address.as_ref().and_then(|a| a.url.as_deref())
    }

    fn set_address_url(&mut self, url: Option<String>) {
        self.address = url.map(|u| Addressable { url: Some(u) });
    }
}

impl RedisBrokerSpec {
    pub fn external_redis(&self) -> Option<&RedisConnection> {
        self.redis.as_ref().and_then(|r| r.connection.as_ref())
    }

    pub fn stream(&self) -> &str {
        self.redis.as_ref().and_then(|r| r.stream.as_deref()).unwrap_or(DEFAULT_STREAM)
    }

    pub fn stream_max_len(&self) -> i64 {
        self.redis.as_ref().and_then(|r| r.stream_max_len).unwrap_or(DEFAULT_STREAM_MAX_LEN)
    }

    pub fn trimming_enabled(&self) -> bool {
        self.redis.as_ref().and_then(|r| r.enable_trimming).unwrap_or(false)
    }

    pub fn broker_port(&self) -> i32 {
        self.broker.as_ref().and_then(|b| b.port).unwrap_or(DEFAULT_BROKER_PORT)
    }
}

impl Generational for RedisBroker {
    fn generation(&self) -> Option<i64> {
        self.metadata.generation
    }

    fn observed_generation(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.observed_generation)
    }
}

impl RedisBroker {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    /// Ready overall and the latest spec generation has been observed.
    pub fn is_ready(&self, set: &ConditionSet) -> bool {
        match &self.status {
            Some(status) => self.generation_observed() && set.is_happy(status),
            None => false,
        }
    }
}
