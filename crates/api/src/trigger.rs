//! The Trigger custom resource: subscribes a destination to a broker.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "eventing.triggermesh.io",
    version = "v1alpha1",
    kind = "Trigger",
    namespaced,
    shortname = "trg",
    printcolumn = r#"{"name":"Broker","type":"string","jsonPath":".spec.broker.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    /// Broker this trigger subscribes to; always in the trigger's namespace.
    pub broker: KReference,
    /// Event filters, evaluated by the broker process.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<serde_json::Value>,
    pub target: Destination,
}

/// Reference to an object by group, kind and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KReference {
    /// Unset or empty matches any group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub kind: String,
    pub name: String,
}

impl KReference {
    pub fn new(group: Option<&str>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self { group: group.map(|g| g.to_string()), kind: kind.into(), name: name.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Destination {
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub ref_: Option<KReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_spec_parses_reference_without_group() {
        let spec: TriggerSpec = serde_json::from_value(serde_json::json!({
            "broker": { "kind": "RedisBroker", "name": "demo" },
            "target": { "uri": "http://sink.default.svc" }
        }))
        .expect("spec");
        assert_eq!(spec.broker, KReference::new(None, "RedisBroker", "demo"));
        assert!(spec.filters.is_empty());
        assert_eq!(spec.target.uri.as_deref(), Some("http://sink.default.svc"));
    }
}
