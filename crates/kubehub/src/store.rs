//! Broker store and child applier backed by the Kubernetes API.

use std::fmt::Debug;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use metrics::counter;
use redbroker_api::{RedisBroker, RedisBrokerStatus};
use redbroker_core::{ObjectKey, StoreError};
use redbroker_dispatch::ReferenceResolver;
use redbroker_reconciler::{BrokerStore, ChildApplier};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

pub const DEFAULT_FIELD_MANAGER: &str = "redbroker";

/// 404 is the only error the callers treat differently.
pub fn classify(err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message),
        other => StoreError::Other(other.to_string()),
    }
}

/// Merge patch for the status subresource. Omitted keys are left untouched
/// by a merge patch, so a cleared address is sent as an explicit null.
pub fn status_patch(status: Option<&RedisBrokerStatus>) -> Value {
    let mut body = json!(status);
    if let Value::Object(fields) = &mut body {
        if status.is_some_and(|s| s.address.is_none()) {
            fields.insert("address".to_string(), Value::Null);
        }
    }
    json!({ "status": body })
}

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self { client, field_manager: field_manager.into() }
    }

    pub async fn try_default(field_manager: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, field_manager))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn brokers(&self, namespace: &str) -> Api<RedisBroker> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Server-side apply with forced ownership of the fields we set.
    async fn apply<K>(&self, desired: K) -> Result<K, StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let name = desired.name_any();
        let namespace = desired
            .namespace()
            .ok_or_else(|| StoreError::Other(format!("{} {} has no namespace", K::kind(&()), name)))?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let pp = PatchParams::apply(&self.field_manager).force();
        match api.patch(&name, &pp, &Patch::Apply(&desired)).await {
            Ok(applied) => {
                counter!("apply_ok", 1u64, "kind" => K::kind(&()).to_string());
                debug!(kind = %K::kind(&()), %namespace, %name, "applied");
                Ok(applied)
            }
            Err(e) => {
                counter!("apply_err", 1u64, "kind" => K::kind(&()).to_string());
                Err(classify(e))
            }
        }
    }
}

#[async_trait::async_trait]
impl BrokerStore for KubeStore {
    async fn get_broker(&self, key: &ObjectKey) -> Result<Option<RedisBroker>, StoreError> {
        self.brokers(&key.namespace).get_opt(&key.name).await.map_err(classify)
    }

    async fn update_status(&self, broker: &RedisBroker) -> Result<(), StoreError> {
        let key = broker.key();
        let patch = status_patch(broker.status.as_ref());
        self.brokers(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

#[async_trait::async_trait]
impl ChildApplier for KubeStore {
    async fn apply_deployment(&self, desired: Deployment) -> Result<Deployment, StoreError> {
        self.apply(desired).await
    }

    async fn apply_service(&self, desired: Service) -> Result<Service, StoreError> {
        self.apply(desired).await
    }

    async fn apply_service_account(&self, desired: ServiceAccount) -> Result<ServiceAccount, StoreError> {
        self.apply(desired).await
    }

    async fn apply_role_binding(&self, desired: RoleBinding) -> Result<RoleBinding, StoreError> {
        self.apply(desired).await
    }
}

#[async_trait::async_trait]
impl ReferenceResolver for KubeStore {
    async fn resolve(&self, key: &ObjectKey) -> Result<(), StoreError> {
        match self.brokers(&key.namespace).get_opt(&key.name).await.map_err(classify)? {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }
}
