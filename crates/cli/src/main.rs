//! `orchestrator` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`        start the REST API and the scheduling lanes.
//! - `migrate`      run pending database migrations.
//! - `run-workflow` enqueue one workflow, wait for it and print the report.
//! - `check-config` validate the scheduler configuration and print it.

mod config;
mod logging;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use db::{MemoryStore, PgStore, Store, TenantScope};
use dispatch::HttpDispatcher;
use queue::QueueRouter;

use crate::config::SchedulerArgs;

#[derive(Parser)]
#[command(name = "orchestrator", about = "Multi-tenant task orchestrator", version)]
struct Cli {
    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server and the scheduling lanes.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
        /// Keep all state in memory instead of Postgres.
        #[arg(long)]
        in_memory: bool,
        #[arg(long, default_value_t = 10)]
        max_connections: u32,
        #[command(flatten)]
        scheduler: SchedulerArgs,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Enqueue a workflow, wait for its chain to finish and print the report.
    RunWorkflow {
        id: Uuid,
        #[arg(long)]
        tenant: String,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        #[command(flatten)]
        scheduler: SchedulerArgs,
    },
    /// Validate the scheduler configuration and print the resolved values.
    CheckConfig {
        #[command(flatten)]
        scheduler: SchedulerArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    match cli.command {
        Command::Serve { bind, database_url, in_memory, max_connections, scheduler } => {
            let store: Arc<dyn Store> = if in_memory {
                warn!("running with the in-memory store; state is lost on exit");
                Arc::new(MemoryStore::new())
            } else {
                let Some(url) = database_url else {
                    bail!("--database-url (or DATABASE_URL) is required unless --in-memory is set");
                };
                Arc::new(connect(&url, max_connections).await?)
            };

            let router = QueueRouter::start(scheduler.to_config(), store, Arc::new(http_dispatcher(&scheduler)?))
                .context("failed to start scheduler")?;
            info!("Starting API server on {bind}");
            api::serve(bind, api::AppState::new(router))
                .await
                .context("api server failed")?;
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::RunWorkflow { id, tenant, database_url, scheduler } => {
            let store: Arc<dyn Store> = Arc::new(connect(&database_url, 4).await?);
            let router = QueueRouter::start(scheduler.to_config(), store, Arc::new(http_dispatcher(&scheduler)?))
                .context("failed to start scheduler")?;

            let scope = TenantScope::new(tenant);
            let Some(handle) = router
                .enqueue_workflow_run(&scope, id)
                .await
                .with_context(|| format!("could not enqueue workflow {id}"))?
            else {
                println!("workflow {id} has no tasks; nothing to run");
                return Ok(());
            };
            info!("workflow {} enqueued as job {}", id, handle.job_id());

            let report = handle.wait().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::CheckConfig { scheduler } => {
            let config = scheduler.to_config();
            if let Err(e) = config.validate() {
                bail!("invalid configuration: {e}");
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("configuration is valid");
        }
    }

    Ok(())
}

async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgStore> {
    db::pool::connect_store(database_url, max_connections)
        .await
        .context("failed to connect to database")
}

/// One pooled client shared by every lane worker.
fn http_dispatcher(scheduler: &SchedulerArgs) -> anyhow::Result<HttpDispatcher> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(scheduler.cpu_workers + scheduler.io_workers)
        .build()
        .context("failed to build HTTP client")?;
    Ok(HttpDispatcher::with_client(client))
}
