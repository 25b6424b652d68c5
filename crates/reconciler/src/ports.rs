use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use redbroker_api::RedisBroker;
use redbroker_core::{ObjectKey, StoreError};

/// Reads and status writes for the managed resource.
#[async_trait::async_trait]
pub trait BrokerStore: Send + Sync {
    /// `Ok(None)` when the broker no longer exists.
    async fn get_broker(&self, key: &ObjectKey) -> Result<Option<RedisBroker>, StoreError>;

    /// Persist `broker.status`; everything else on `broker` is ignored.
    async fn update_status(&self, broker: &RedisBroker) -> Result<(), StoreError>;
}

/// Creates or updates child objects to match the desired descriptor and returns
/// the object as observed afterwards, status included.
#[async_trait::async_trait]
pub trait ChildApplier: Send + Sync {
    async fn apply_deployment(&self, desired: Deployment) -> Result<Deployment, StoreError>;
    async fn apply_service(&self, desired: Service) -> Result<Service, StoreError>;
    async fn apply_service_account(&self, desired: ServiceAccount) -> Result<ServiceAccount, StoreError>;
    async fn apply_role_binding(&self, desired: RoleBinding) -> Result<RoleBinding, StoreError>;
}
