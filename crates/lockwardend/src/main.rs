//! lockwardend - The lockwarden background service
//!
//! This is the main entry point for the lockwardend service.
//! It wires together all the components:
//! - Configuration loading (file plus environment overrides)
//! - Store initialization
//! - Resource-manager adapter
//! - Governance engine and workflow runner
//! - HTTP server
//! - Scheduler tick

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{Args as ClapArgs, Parser};
use lockwarden_api::WorkflowKind;
use lockwarden_arm::{ArmClient, ArmSettings};
use lockwarden_cloud_api::CloudClient;
use lockwarden_config::{config_from_overrides, load_config, EnvOverrides, GovernanceConfig};
use lockwarden_core::GovernanceEngine;
use lockwarden_http::{router, HttpSettings, WorkflowRunner};
use lockwarden_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use lockwarden_util::{default_config_path, default_data_dir, default_db_path};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Workflows the tick evaluates against their windows
const SCHEDULED: [WorkflowKind; 2] = [WorkflowKind::LockCheck, WorkflowKind::TagCleanup];

/// lockwardend - Lock governance and budget enforcement service
#[derive(Parser, Debug)]
#[command(name = "lockwardend")]
#[command(about = "Lock governance and budget enforcement service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/lockwarden/config.toml,
    /// skipped if absent)
    #[arg(short, long, env = "LOCKWARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(short, long, env = "LOCKWARDEN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// HTTP bind address override
    #[arg(short, long, env = "LOCKWARDEN_BIND")]
    bind: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(flatten)]
    overrides: OverrideArgs,
}

/// Settings that may also come from the environment. Each wins over the
/// config file.
#[derive(ClapArgs, Debug)]
struct OverrideArgs {
    #[arg(long, env = "LOCK_CHECK_DAY")]
    lock_check_day: Option<i64>,

    #[arg(long, env = "LOCK_CHECK_HOUR")]
    lock_check_hour: Option<i64>,

    #[arg(long, env = "SHUTDOWN_HOUR")]
    shutdown_hour: Option<i64>,

    #[arg(long, env = "TAG_CHECK_HOUR")]
    tag_check_hour: Option<i64>,

    /// Comma-separated tag keys
    #[arg(long, env = "REQUIRED_TAGS")]
    required_tags: Option<String>,

    #[arg(long, env = "HOLD_LOCK_NAME")]
    hold_lock_name: Option<String>,

    #[arg(long, env = "BUDGET_LOCK_NAME")]
    budget_lock_name: Option<String>,

    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    subscription_id: Option<String>,

    #[arg(long, env = "AZURE_TENANT_ID")]
    tenant_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Allow destructive cleanup (true/false, yes/no, 1/0)
    #[arg(long, env = "LOCKWARDEN_AUTO_DELETE", value_parser = BoolishValueParser::new())]
    auto_delete: Option<bool>,
}

impl OverrideArgs {
    fn to_env_overrides(&self) -> EnvOverrides {
        EnvOverrides {
            lock_check_day: self.lock_check_day,
            lock_check_hour: self.lock_check_hour,
            shutdown_hour: self.shutdown_hour,
            tag_check_hour: self.tag_check_hour,
            required_tags: self.required_tags.clone(),
            hold_lock_name: self.hold_lock_name.clone(),
            budget_lock_name: self.budget_lock_name.clone(),
            subscription_id: self.subscription_id.clone(),
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            auto_delete: self.auto_delete,
        }
    }
}

fn load(args: &Args) -> Result<GovernanceConfig> {
    let overrides = args.overrides.to_env_overrides();

    if let Some(path) = &args.config {
        let config = load_config(path, &overrides)
            .with_context(|| format!("Failed to load config from {:?}", path))?;
        info!(config_path = %path.display(), "Configuration loaded");
        return Ok(config);
    }

    let path = default_config_path();
    if path.exists() {
        let config = load_config(&path, &overrides)
            .with_context(|| format!("Failed to load config from {:?}", path))?;
        info!(config_path = %path.display(), "Configuration loaded");
        Ok(config)
    } else {
        info!(
            config_path = %path.display(),
            "No config file, using defaults and environment"
        );
        config_from_overrides(&overrides).context("Invalid configuration")
    }
}

/// Main service state
struct Service {
    runner: Arc<WorkflowRunner>,
    store: Arc<dyn Store>,
    listener: TcpListener,
    stop: watch::Sender<bool>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let config = Arc::new(load(args)?);
        info!(
            subscription_id = %config.azure.subscription_id,
            lock_check = %config.lock_check_window().describe(),
            tag_check = %config.tag_check_window().describe(),
            auto_delete = config.cleanup.auto_delete,
            "Effective configuration"
        );

        let data_dir = args
            .data_dir
            .clone()
            .or_else(|| config.service.data_dir.clone())
            .unwrap_or_else(default_data_dir);
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = default_db_path(&data_dir);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );
        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;
        store.append_audit(AuditEvent::new(AuditEventType::ConfigLoaded {
            subscription_id: config.azure.subscription_id.clone(),
            auto_delete: config.cleanup.auto_delete,
        }))?;

        if !config.azure.has_credentials() {
            warn!("No client credentials configured, every resource-manager call will fail");
        }
        let cloud: Arc<dyn CloudClient> = Arc::new(
            ArmClient::new(ArmSettings::from_config(&config))
                .context("Failed to build resource-manager client")?,
        );

        let engine = Arc::new(GovernanceEngine::new(config.clone(), cloud));
        let (stop, stop_rx) = watch::channel(false);
        let runner = Arc::new(WorkflowRunner::new(engine, store.clone(), stop_rx));

        let bind = args
            .bind
            .clone()
            .unwrap_or_else(|| config.service.bind_address.clone());
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("Failed to bind {}", bind))?;
        info!(address = %bind, "HTTP server listening");

        Ok(Self {
            runner,
            store,
            listener,
            stop,
        })
    }

    async fn run(self) -> Result<()> {
        let Service {
            runner,
            store,
            listener,
            stop,
        } = self;

        let app = router(runner.clone(), HttpSettings::for_runner(&runner));
        let mut server_stop = stop.subscribe();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = server_stop.wait_for(|stopped| *stopped).await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "HTTP server error");
            }
        });

        // Set up signal handlers
        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        let mut tick_timer = tokio::time::interval(runner.config().service.tick_interval);
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // At most one scheduled run per workflow in flight
        let mut scheduled: HashMap<WorkflowKind, JoinHandle<()>> = HashMap::new();

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                // Tick timer - open schedule windows
                _ = tick_timer.tick() => {
                    let now = lockwarden_util::now();
                    for kind in SCHEDULED {
                        if scheduled.get(&kind).is_some_and(|h| !h.is_finished()) {
                            continue;
                        }
                        let runner = runner.clone();
                        let handle = tokio::spawn(async move {
                            if let Some(report) = runner.run_scheduled(kind, now).await {
                                info!(
                                    workflow = %kind,
                                    run_id = %report.run_id,
                                    success = report.is_success(),
                                    "Scheduled run finished"
                                );
                            }
                        });
                        scheduled.insert(kind, handle);
                    }
                }
            }
        }

        // Graceful shutdown
        info!("Shutting down lockwardend");
        let _ = stop.send(true);

        for (kind, handle) in scheduled {
            if let Err(e) = handle.await {
                warn!(workflow = %kind, error = %e, "Scheduled run task failed");
            }
        }
        if let Err(e) = server.await {
            warn!(error = %e, "HTTP server task failed");
        }

        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped)) {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "lockwardend starting"
    );

    let service = Service::new(&args).await?;
    service.run().await
}
