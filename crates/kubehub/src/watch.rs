//! List+watch of every kind the dispatcher routes, fanned into one channel.

use std::fmt::Debug;

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource};
use redbroker_api::{RedisBroker, Trigger};
use redbroker_dispatch::{ChangeEvent, ChangeKind};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Only children carrying this label are watched.
pub const CHILD_SELECTOR: &str = "app.kubernetes.io/managed-by=redbroker";

fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Run a list+watch for `K`, mapping each object to a [`ChangeEvent`].
///
/// Returns when the receiving side is gone. Watch errors are retried with the
/// watcher's default backoff.
pub async fn start_watcher<K, F>(api: Api<K>, cfg: watcher::Config, tx: mpsc::Sender<ChangeEvent>, to_event: F) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + 'static,
    F: Fn(ChangeKind, &K) -> ChangeEvent,
{
    let kind = K::kind(&()).to_string();
    let stream = watcher::watcher(api, cfg).default_backoff();
    futures::pin_mut!(stream);
    info!(%kind, "watcher started");
    while let Some(ev) = stream.next().await {
        let events = match ev {
            Ok(Event::Applied(o)) => vec![to_event(ChangeKind::Applied, &o)],
            Ok(Event::Deleted(o)) => vec![to_event(ChangeKind::Deleted, &o)],
            Ok(Event::Restarted(list)) => {
                debug!(%kind, count = list.len(), "watch restart");
                list.iter().map(|o| to_event(ChangeKind::Applied, o)).collect()
            }
            Err(e) => {
                warn!(%kind, error = %e, "watch error");
                continue;
            }
        };
        for event in events {
            if tx.send(event).await.is_err() {
                info!(%kind, "dispatcher gone; watcher stopping");
                return Ok(());
            }
        }
    }
    warn!(%kind, "watcher stream ended");
    Ok(())
}

fn spawn_watcher<K, F>(
    client: &Client,
    namespace: Option<&str>,
    cfg: watcher::Config,
    tx: &mpsc::Sender<ChangeEvent>,
    to_event: F,
) -> JoinHandle<()>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
    F: Fn(ChangeKind, &K) -> ChangeEvent + Send + 'static,
{
    let api = api::<K>(client.clone(), namespace);
    let tx = tx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_watcher(api, cfg, tx, to_event).await {
            error!(kind = %K::kind(&()), error = ?e, "watcher failed");
        }
    })
}

/// Start watchers for the managed kind, its children and Triggers.
pub fn spawn_watchers(client: &Client, namespace: Option<&str>, tx: &mpsc::Sender<ChangeEvent>) -> Vec<JoinHandle<()>> {
    let all = watcher::Config::default;
    let children = || watcher::Config::default().labels(CHILD_SELECTOR);
    vec![
        spawn_watcher::<RedisBroker, _>(client, namespace, all(), tx, ChangeEvent::primary),
        spawn_watcher::<Trigger, _>(client, namespace, all(), tx, ChangeEvent::referencing),
        spawn_watcher::<Deployment, _>(client, namespace, children(), tx, ChangeEvent::owned::<Deployment>),
        spawn_watcher::<Service, _>(client, namespace, children(), tx, ChangeEvent::owned::<Service>),
        spawn_watcher::<ServiceAccount, _>(client, namespace, children(), tx, ChangeEvent::owned::<ServiceAccount>),
        spawn_watcher::<RoleBinding, _>(client, namespace, children(), tx, ChangeEvent::owned::<RoleBinding>),
    ]
}
