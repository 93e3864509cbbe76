use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use configuration::{Config, LogFormat};
use core_types::{Campaign, Order, Product, Service, User};
use database::{Accessor, CountArgs, DatabaseService, Entity};
use std::path::PathBuf;
use std::sync::Arc;

mod host;
mod logging;

use host::Host;

/// The main entry point for the Strata database service.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables (DATABASE_URL, RUST_LOG, STRATA__*) from .env, if present.
    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => configuration::load_config_from(path),
        None => configuration::load_config(),
    }
    .context("Failed to load configuration")?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    let _log_guard = logging::init(&config.logging)?;

    // Execute the appropriate command
    match cli.command {
        Commands::Run => handle_run(&config).await,
        Commands::Migrate => handle_migrate(&config).await,
        Commands::Check => handle_check(&config).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// A lifecycle-managed PostgreSQL service with a cached read path.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a configuration file (defaults to ./config.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured log format.
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the service and hold the connection until Ctrl-C or SIGTERM.
    Run,
    /// Apply pending migrations and exit.
    Migrate,
    /// Connect, report row counts per table, and shut down.
    Check,
}

// ==============================================================================
// Command Logic
// ==============================================================================

fn build_service(config: &Config) -> Arc<DatabaseService> {
    Arc::new(DatabaseService::new(config.database.clone(), config.accelerate.clone()))
}

async fn handle_run(config: &Config) -> Result<()> {
    let service = build_service(config);
    let mut host = Host::new();
    host.register(service.clone());

    host.start().await?;
    tracing::info!("Strata is running. Press Ctrl-C to stop.");

    shutdown_signal().await;
    tracing::info!("Shutdown signal received.");

    host.stop().await
}

async fn handle_migrate(config: &Config) -> Result<()> {
    let pool = database::connect(&config.database).await.context("Failed to connect to the database")?;
    let result = database::run_migrations(&pool).await;
    pool.close().await;
    result.context("Failed to run database migrations")?;

    tracing::info!("Migrations are up to date.");
    Ok(())
}

async fn handle_check(config: &Config) -> Result<()> {
    let service = build_service(config);
    let mut host = Host::new();
    host.register(service.clone());
    host.start().await?;

    let report = collect_report(&service).await;
    let stopped = host.stop().await;

    let table = report?;
    println!("{table}");
    stopped
}

async fn collect_report(service: &DatabaseService) -> Result<Table> {
    let pool = service.client().await?;
    database::ping(&pool).await.context("Database did not answer a ping")?;

    let mut table = Table::new();
    table.set_header(vec!["Table", "Rows"]);
    table.add_row(vec![User::TABLE.to_string(), count::<User>(service).await?.to_string()]);
    table.add_row(vec![Product::TABLE.to_string(), count::<Product>(service).await?.to_string()]);
    table.add_row(vec![Order::TABLE.to_string(), count::<Order>(service).await?.to_string()]);
    table.add_row(vec![Campaign::TABLE.to_string(), count::<Campaign>(service).await?.to_string()]);
    table.add_row(vec![Service::TABLE.to_string(), count::<Service>(service).await?.to_string()]);
    Ok(table)
}

async fn count<E: Entity>(service: &DatabaseService) -> Result<i64> {
    let repository = service.repository::<E>().await?;
    repository
        .count(CountArgs::default())
        .await
        .with_context(|| format!("Failed to count rows in `{}`", E::TABLE))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl-C.");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM.");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
