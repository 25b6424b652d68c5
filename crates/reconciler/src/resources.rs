//! Desired child objects of a RedisBroker. Pure builders; applying them is the
//! job of a [`crate::ChildApplier`].

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector, Service,
    ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use redbroker_api::{RedisBroker, SecretKeyRef};

use crate::ReconcilerConfig;

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const MANAGED_BY: &str = "redbroker";

pub const REDIS_PORT: i32 = 6379;
pub const SERVICE_PORT: i32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Redis,
    Broker,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Component::Redis => "redis",
            Component::Broker => "broker",
        }
    }
}

/// Name shared by a component's Deployment and Service (and the broker's
/// ServiceAccount and RoleBinding).
pub fn child_name(broker: &str, component: Component) -> String {
    format!("{}-rb-{}", broker, component.as_str())
}

pub fn labels(broker: &str, component: Component) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
        (LABEL_INSTANCE.to_string(), broker.to_string()),
        (LABEL_COMPONENT.to_string(), component.as_str().to_string()),
    ])
}

fn meta(broker: &RedisBroker, component: Component, owner: &OwnerReference) -> ObjectMeta {
    let name = broker.name_any();
    ObjectMeta {
        name: Some(child_name(&name, component)),
        namespace: broker.namespace(),
        labels: Some(labels(&name, component)),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

/// In-cluster address of a Service.
pub fn service_host(service: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("{}.{}.svc.{}", service, namespace, cluster_domain)
}

/// Broker address as published in status; the port is omitted when it is 80.
pub fn broker_url(service: &str, namespace: &str, cluster_domain: &str, port: i32) -> String {
    let host = service_host(service, namespace, cluster_domain);
    if port == SERVICE_PORT {
        format!("http://{}", host)
    } else {
        format!("http://{}:{}", host, port)
    }
}

fn deployment(
    broker: &RedisBroker,
    component: Component,
    owner: &OwnerReference,
    container: Container,
    service_account: Option<String>,
) -> Deployment {
    let name = broker.name_any();
    let selector = labels(&name, component);
    Deployment {
        metadata: meta(broker, component, owner),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector { match_labels: Some(selector.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(selector), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    service_account_name: service_account,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service(broker: &RedisBroker, component: Component, owner: &OwnerReference, port: i32, target: i32) -> Service {
    let name = broker.name_any();
    Service {
        metadata: meta(broker, component, owner),
        spec: Some(ServiceSpec {
            selector: Some(labels(&name, component)),
            ports: Some(vec![ServicePort {
                name: Some(if component == Component::Redis { "redis" } else { "http" }.to_string()),
                port,
                target_port: Some(IntOrString::Int(target)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn redis_deployment(broker: &RedisBroker, owner: &OwnerReference, cfg: &ReconcilerConfig) -> Deployment {
    let container = Container {
        name: "redis".to_string(),
        image: Some(cfg.redis_image.clone()),
        ports: Some(vec![ContainerPort { name: Some("redis".into()), container_port: REDIS_PORT, ..Default::default() }]),
        ..Default::default()
    };
    deployment(broker, Component::Redis, owner, container, None)
}

pub fn redis_service(broker: &RedisBroker, owner: &OwnerReference) -> Service {
    service(broker, Component::Redis, owner, REDIS_PORT, REDIS_PORT)
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.into()), ..Default::default() }
}

fn env_secret(name: &str, secret: &SecretKeyRef) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.name.clone()),
                key: secret.key.clone(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Broker workload. `redis_address` is either the external connection URL or
/// the in-cluster Redis Service address.
pub fn broker_deployment(
    broker: &RedisBroker,
    owner: &OwnerReference,
    cfg: &ReconcilerConfig,
    redis_address: &str,
) -> Deployment {
    let spec = &broker.spec;
    let port = spec.broker_port();
    let mut envs = vec![
        env("BROKER_NAME", broker.name_any()),
        env("KUBERNETES_NAMESPACE", broker.namespace().unwrap_or_default()),
        env("PORT", port.to_string()),
        env("REDIS_ADDRESS", redis_address),
        env("REDIS_STREAM", spec.stream()),
        env("REDIS_STREAM_MAX_LEN", spec.stream_max_len().to_string()),
        env("REDIS_STREAM_TRIMMING", spec.trimming_enabled().to_string()),
    ];
    if let Some(conn) = spec.external_redis() {
        if let Some(user) = &conn.username {
            envs.push(env_secret("REDIS_USERNAME", user));
        }
        if let Some(pass) = &conn.password {
            envs.push(env_secret("REDIS_PASSWORD", pass));
        }
        envs.push(env("REDIS_TLS_ENABLED", conn.tls_enabled.unwrap_or(false).to_string()));
        envs.push(env("REDIS_TLS_SKIP_VERIFY", conn.tls_skip_verify.unwrap_or(false).to_string()));
    }
    if let Some(obs) = spec.broker.as_ref().and_then(|b| b.observability.as_ref()) {
        envs.push(env("K_CONFIG_OBSERVABILITY", obs.config_map_name.clone()));
    }
    let container = Container {
        name: "broker".to_string(),
        image: Some(cfg.broker_image.clone()),
        env: Some(envs),
        ports: Some(vec![ContainerPort { name: Some("http".into()), container_port: port, ..Default::default() }]),
        ..Default::default()
    };
    let sa = child_name(&broker.name_any(), Component::Broker);
    deployment(broker, Component::Broker, owner, container, Some(sa))
}

pub fn broker_service(broker: &RedisBroker, owner: &OwnerReference) -> Service {
    service(broker, Component::Broker, owner, SERVICE_PORT, broker.spec.broker_port())
}

pub fn broker_service_account(broker: &RedisBroker, owner: &OwnerReference) -> ServiceAccount {
    ServiceAccount { metadata: meta(broker, Component::Broker, owner), ..Default::default() }
}

/// Grants the broker's ServiceAccount the configured ClusterRole within the
/// broker's namespace (reading Triggers).
pub fn broker_role_binding(broker: &RedisBroker, owner: &OwnerReference, cfg: &ReconcilerConfig) -> RoleBinding {
    RoleBinding {
        metadata: meta(broker, Component::Broker, owner),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: cfg.broker_cluster_role.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: child_name(&broker.name_any(), Component::Broker),
            namespace: broker.namespace(),
            api_group: None,
        }]),
    }
}
