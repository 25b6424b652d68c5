use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kube::CustomResourceExt;
use redbroker_api::{default_condition_set, RedisBroker, Trigger};
use redbroker_core::{ConditionSetRegistry, ObjectKey};
use redbroker_dispatch::Dispatcher;
use redbroker_kubehub::{spawn_watchers, KubeStore, DEFAULT_FIELD_MANAGER};
use redbroker_queue::{WorkQueue, WorkerPool};
use redbroker_reconciler::{
    Reconciler, ReconcilerConfig, DEFAULT_BROKER_CLUSTER_ROLE, DEFAULT_BROKER_IMAGE, DEFAULT_CLUSTER_DOMAIN,
    DEFAULT_REDIS_IMAGE,
};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "redbrokerd", version, about = "RedisBroker controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Yaml,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller until Ctrl-C
    Run(RunArgs),
    /// Print the CustomResourceDefinitions served by this controller
    Crd {
        #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Yaml)]
        output: Output,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Namespace to watch (default: all namespaces)
    #[arg(long = "ns", env = "REDBROKER_NAMESPACE")]
    namespace: Option<String>,

    /// Parallel reconcile workers
    #[arg(long, env = "REDBROKER_WORKERS", default_value_t = 4)]
    workers: usize,

    #[arg(long, env = "REDBROKER_REDIS_IMAGE", default_value = DEFAULT_REDIS_IMAGE)]
    redis_image: String,

    #[arg(long, env = "REDBROKER_BROKER_IMAGE", default_value = DEFAULT_BROKER_IMAGE)]
    broker_image: String,

    /// ClusterRole bound to each broker's ServiceAccount
    #[arg(long, env = "REDBROKER_BROKER_CLUSTER_ROLE", default_value = DEFAULT_BROKER_CLUSTER_ROLE)]
    broker_cluster_role: String,

    #[arg(long, env = "REDBROKER_CLUSTER_DOMAIN", default_value = DEFAULT_CLUSTER_DOMAIN)]
    cluster_domain: String,

    /// Capacity of the watcher -> dispatcher channel
    #[arg(long, env = "REDBROKER_CHANNEL_CAP", default_value_t = 2048)]
    channel_capacity: usize,

    /// Field manager used for server-side apply
    #[arg(long, env = "REDBROKER_FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)]
    field_manager: String,
}

impl RunArgs {
    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            redis_image: self.redis_image.clone(),
            broker_image: self.broker_image.clone(),
            cluster_domain: self.cluster_domain.clone(),
            broker_cluster_role: self.broker_cluster_role.clone(),
        }
    }
}

fn init_tracing() {
    let env = std::env::var("REDBROKER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("REDBROKER_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid REDBROKER_METRICS_ADDR; expected host:port");
        }
    }
}

fn print_crds(output: Output) -> Result<()> {
    let crds = [RedisBroker::crd(), Trigger::crd()];
    match output {
        Output::Yaml => {
            for crd in &crds {
                println!("---");
                print!("{}", serde_yaml::to_string(crd).context("serializing CRD")?);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&crds)?),
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    info!(ns = ?args.namespace, workers = args.workers, "redbrokerd starting");
    let store = Arc::new(KubeStore::try_default(args.field_manager.clone()).await.context("building kube client")?);

    let queue: WorkQueue<ObjectKey> = WorkQueue::new();
    let conditions = Arc::new(ConditionSetRegistry::new(default_condition_set()));
    let reconciler = Arc::new(Reconciler::new(store.clone(), store.clone(), conditions, args.reconciler_config()));
    let pool = WorkerPool::spawn(queue.clone(), args.workers, reconciler);

    let (event_tx, event_rx) = mpsc::channel(args.channel_capacity);
    let dispatcher = tokio::spawn(Dispatcher::new(queue.clone(), store.clone()).run(event_rx));
    let watchers = spawn_watchers(store.client(), args.namespace.as_deref(), &event_tx);
    drop(event_tx);

    signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Ctrl-C received; shutting down");

    // Watchers own the last senders; aborting them ends the dispatcher.
    for w in &watchers {
        w.abort();
    }
    if let Err(e) = dispatcher.await {
        error!(error = %e, "dispatcher task failed");
    }
    queue.shutdown();
    pool.join().await;
    info!("redbrokerd stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Crd { output } => print_crds(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_default_from_constants() {
        let cli = Cli::try_parse_from(["redbrokerd", "run"]).expect("parse");
        let Commands::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.workers, 4);
        assert_eq!(args.namespace, None);
        assert_eq!(args.reconciler_config(), ReconcilerConfig::default());
        assert_eq!(args.field_manager, "redbroker");
    }

    #[test]
    fn run_args_override() {
        let cli = Cli::try_parse_from(["redbrokerd", "run", "--ns", "brokers", "--workers", "8", "--cluster-domain", "corp.local"])
            .expect("parse");
        let Commands::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.namespace.as_deref(), Some("brokers"));
        assert_eq!(args.workers, 8);
        assert_eq!(args.reconciler_config().cluster_domain, "corp.local");
    }

    #[test]
    fn crds_carry_group_and_kinds() {
        let rb = RedisBroker::crd();
        assert_eq!(rb.spec.group, "eventing.triggermesh.io");
        assert_eq!(rb.spec.names.kind, "RedisBroker");
        assert_eq!(Trigger::crd().spec.names.kind, "Trigger");
        assert!(serde_yaml::to_string(&rb).expect("yaml").contains("RedisBroker"));
    }
}
