//! agentdeploy - Main Entry Point
//!
//! `serve` runs the HTTP API (optionally with the worker pool in the same
//! process), `worker` runs only the worker pool, `config` validates the
//! configuration file.

use agentdeploy::api;
use agentdeploy::config::{ContentBackendKind, DeployConfig, QueueBackendKind};
use agentdeploy::content::{
    ContentBackend, ContentCache, ContentClient, HttpContentStore, HttpContentStoreConfig,
    MemoryContentStore,
};
use agentdeploy::observability::{init_default_logging, HealthMonitor};
use agentdeploy::pipeline::AgentPipeline;
use agentdeploy::queue::{
    InitialRunHandler, JobQueue, MemoryJobQueue, SqliteJobQueue, WorkerPool, WorkerPoolHandle,
};
use agentdeploy::registry::{JsonRpcRegistry, JsonRpcRegistryConfig, RegistryClient};
use agentdeploy::store::SqliteAgentStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Agent deployment pipeline service
#[derive(Parser)]
#[command(name = "agentdeploy")]
#[command(about = "Pin, register, persist and run agents")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "AGENTDEPLOY_CONFIG",
        default_value = "agentdeploy.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Also run the worker pool in this process
        #[arg(long)]
        in_process_worker: bool,
    },
    /// Run the worker pool only
    Worker,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// Long-lived components built from configuration
struct Services {
    content: ContentClient,
    queue: Arc<dyn JobQueue>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting agentdeploy v{}", env!("CARGO_PKG_VERSION"));

    let config = match DeployConfig::load_from_file(&cli.config) {
        Ok(config) => {
            info!("Loaded configuration from: {}", cli.config.display());
            config
        }
        Err(e) => {
            error!("Failed to load configuration from {}: {}", cli.config.display(), e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve { in_process_worker } => {
            run_server(config, in_process_worker).await
        }
        Commands::Worker => run_worker(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn build_services(config: &DeployConfig) -> Result<Services, Box<dyn std::error::Error>> {
    let backend: Arc<dyn ContentBackend> = match config.content_store.backend {
        ContentBackendKind::Http => {
            let token = config.get_content_token()?;
            let store_config = HttpContentStoreConfig::from_section(&config.content_store, token);
            Arc::new(HttpContentStore::new(store_config)?)
        }
        ContentBackendKind::Memory => {
            warn!("Using the in-memory content store; pinned documents are not durable");
            Arc::new(MemoryContentStore::new())
        }
    };
    let content = ContentClient::new(
        backend,
        Arc::new(ContentCache::new(config.cache_ttl())),
        config.retry_policy(),
    );

    let queue: Arc<dyn JobQueue> = match config.queue.backend {
        QueueBackendKind::Sqlite => Arc::new(SqliteJobQueue::open(
            config.queue_path(),
            config.queue_settings(),
        )?),
        QueueBackendKind::Memory => {
            warn!("Using the in-memory job queue; jobs are lost on restart");
            Arc::new(MemoryJobQueue::with_settings(config.queue_settings()))
        }
    };

    Ok(Services { content, queue })
}

fn start_workers(config: &DeployConfig, services: &Services) -> WorkerPoolHandle {
    let handler = Arc::new(InitialRunHandler::new(services.content.clone()));
    WorkerPool::new(services.queue.clone(), handler, config.worker_config()).start()
}

async fn run_server(
    config: DeployConfig,
    in_process_worker: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_addr()?;
    let services = build_services(&config)?;

    let registry_backend = JsonRpcRegistry::new(JsonRpcRegistryConfig::from_section(&config.registry))?;
    let registry = RegistryClient::new(Arc::new(registry_backend), config.registry_settings());
    let store = Arc::new(SqliteAgentStore::open(&config.database.path)?);

    let pipeline = AgentPipeline::new(
        services.content.clone(),
        registry,
        store,
        services.queue.clone(),
    );
    let health = Arc::new(HealthMonitor::new(env!("CARGO_PKG_NAME")).with_queue(services.queue.clone()));

    let workers = if in_process_worker || config.server.in_process_worker {
        Some(start_workers(&config, &services))
    } else {
        if config.queue.backend == QueueBackendKind::Memory {
            warn!("In-memory queue without an in-process worker; queued jobs will never run");
        }
        None
    };

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(api::serve(addr, pipeline, health, async move {
        let _ = shutdown_rx.changed().await;
    }));

    wait_for_shutdown_signal().await?;

    info!("Application shutdown initiated");
    let _ = shutdown_tx.send(true);

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP server error: {}", e),
        Err(e) => error!("HTTP server task panicked: {}", e),
    }

    if let Some(workers) = workers {
        workers.shutdown().await;
    }

    Ok(())
}

async fn run_worker(config: DeployConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.queue.backend == QueueBackendKind::Memory {
        return Err("the worker command needs a durable queue; set queue.backend = \"sqlite\" \
                    or use `serve --in-process-worker`"
            .into());
    }

    let services = build_services(&config)?;
    let workers = start_workers(&config, &services);

    info!("Worker pool is running and waiting for jobs...");
    wait_for_shutdown_signal().await?;

    info!("Application shutdown initiated");
    workers.shutdown().await;
    Ok(())
}

fn handle_config_command(config: DeployConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    Ok(())
}
