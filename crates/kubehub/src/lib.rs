//! kube-rs adapters for the RedisBroker controller: the store/applier/resolver
//! ports backed by the API server, and the watchers feeding the dispatcher.

#![forbid(unsafe_code)]

pub mod store;
pub mod watch;

pub use store::{classify, status_patch, KubeStore, DEFAULT_FIELD_MANAGER};
pub use watch::{spawn_watchers, start_watcher, CHILD_SELECTOR};
