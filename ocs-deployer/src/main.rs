use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ocs_deployer::{
    Controller, ControllerConfig, DeployerAuditLogger, Reconciler, ReconcilerConfig,
    StorageClusterTemplate,
};
use ocs_store::{DataStore, ManagedOcs, ManagedOcsStore, MemoryStore, ObjectKey, ReconcileStrategy};

#[derive(Parser)]
#[command(name = "ocs-deployer")]
#[command(about = "ManagedOCS deployer - keeps the StorageCluster in line with the ManagedOCS policy")]
struct Args {
    /// Only reconcile ManagedOCS objects in this namespace
    #[arg(short, long)]
    namespace: Option<String>,

    /// Number of reconcile workers
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Name of the StorageCluster created in each namespace
    #[arg(long, default_value = "ocs-storagecluster")]
    storage_cluster_name: String,

    /// Attempts per write before a conflict counts as a failure
    #[arg(long, default_value_t = 5)]
    max_conflict_retries: u32,

    /// First retry delay after a failed pass, in milliseconds
    #[arg(long, default_value_t = 5)]
    backoff_base_ms: u64,

    /// Upper bound of the retry delay, in seconds
    #[arg(long, default_value_t = 300)]
    backoff_max_secs: u64,

    /// Reconcile every ManagedOCS again after this many seconds (0 disables)
    #[arg(long, default_value_t = 300)]
    resync_secs: u64,

    /// StorageCluster template (JSON); flags below override it
    #[arg(long)]
    template: Option<PathBuf>,

    /// Storage class of the device PVCs
    #[arg(long)]
    storage_class: Option<String>,

    /// Size of one device, e.g. 1Ti
    #[arg(long)]
    device_size: Option<String>,

    /// Seed a ManagedOCS into the in-process store (format: namespace/name, can be repeated)
    #[arg(long, value_parser = parse_key)]
    bootstrap: Vec<ObjectKey>,

    /// Reconcile strategy of bootstrapped ManagedOCS objects (strict or none)
    #[arg(long)]
    strategy: Option<ReconcileStrategy>,

    /// Requested capacity of bootstrapped ManagedOCS objects, e.g. 4Ti
    #[arg(long)]
    storage_size: Option<String>,
}

fn parse_key(s: &str) -> Result<ObjectKey, String> {
    let (namespace, name) = s
        .split_once('/')
        .ok_or("Expected format: namespace/name".to_string())?;
    if namespace.is_empty() || name.is_empty() {
        return Err("Namespace and name must not be empty".to_string());
    }
    Ok(ObjectKey::new(namespace, name))
}

async fn load_template(args: &Args) -> Result<StorageClusterTemplate> {
    let mut template = match &args.template {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read template {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid template {}", path.display()))?
        }
        None => StorageClusterTemplate::default(),
    };

    if let Some(class) = &args.storage_class {
        template.storage_class_name = class.clone();
    }
    if let Some(size) = &args.device_size {
        template.device_size = size.clone();
    }
    Ok(template)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ocs_deployer=info".parse()?))
        .init();

    let args = Args::parse();
    let template = load_template(&args).await?;

    info!(
        "Starting ocs-deployer - namespace: {}, workers: {}, StorageCluster: {}",
        args.namespace.as_deref().unwrap_or("*"),
        args.workers,
        args.storage_cluster_name
    );

    let store = Arc::new(MemoryStore::new());
    for key in &args.bootstrap {
        let mut mocs = ManagedOcs::new(&key.namespace, &key.name);
        mocs.spec.reconcile_strategy = args.strategy;
        mocs.spec.storage_size = args.storage_size.clone();
        store
            .create_managed_ocs(mocs)
            .await
            .with_context(|| format!("Failed to bootstrap ManagedOCS {}", key))?;
        info!(%key, "Bootstrapped ManagedOCS");
    }
    let store: Arc<dyn DataStore> = store;

    let audit = Arc::new(DeployerAuditLogger::default());
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&store),
        ReconcilerConfig {
            storage_cluster_name: args.storage_cluster_name.clone(),
            max_conflict_retries: args.max_conflict_retries.max(1),
            template,
            requeue_after: (args.resync_secs > 0).then(|| Duration::from_secs(args.resync_secs)),
        },
        Arc::clone(&audit),
    ));
    let controller = Controller::new(
        store,
        reconciler,
        ControllerConfig {
            namespace: args.namespace.clone(),
            workers: args.workers,
            storage_cluster_name: args.storage_cluster_name.clone(),
            backoff_base: Duration::from_millis(args.backoff_base_ms),
            backoff_max: Duration::from_secs(args.backoff_max_secs),
        },
        audit,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut controller_handle = tokio::spawn(controller.run(shutdown_rx));

    // Wait for shutdown signal, or the controller giving up on its own
    let ctrl_c = signal::ctrl_c();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    let result = tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
            None
        }
        result = &mut controller_handle => Some(result),
    };

    let result = match result {
        Some(result) => result,
        None => {
            let _ = shutdown_tx.send(true);
            controller_handle.await
        }
    };
    result
        .context("Controller task panicked")?
        .context("Controller failed")?;

    info!("Shutdown complete");
    Ok(())
}
