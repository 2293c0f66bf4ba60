//! QueryDeck Server
//!
//! Serves the run control and status API, or executes the expression table
//! once from the command line.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use querydeck_server::{
    config::{AppConfig, DatabaseConfig, LogFormat, StoreBackend},
    db::create_pool,
    engine::RunStart,
    router::build_router,
    state::AppState,
    store::{ExpressionFile, ExpressionStore, MemoryExpressionStore, PgExpressionStore},
};
use querydeck_sources::{SourceRegistry, SourcesConfig};

#[derive(Parser)]
#[command(name = "querydeck")]
#[command(version, about = "QueryDeck dashboard expression engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Execute rows once and print the final status as JSON
    Run {
        /// Comma separated row ids; all rows when omitted
        #[arg(long, value_delimiter = ',')]
        rows: Option<Vec<String>>,
    },
}

/// Initialize tracing/logging. Logs go to stderr so `run` output stays clean.
fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "info,querydeck_server=debug,querydeck_sources=debug,tower_http=debug".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Build the source registry from the sources file.
fn load_sources(config: &AppConfig) -> anyhow::Result<SourceRegistry> {
    if !Path::new(&config.sources_file).exists() {
        tracing::warn!(
            file = %config.sources_file,
            "Sources file not found, starting without data sources"
        );
        return Ok(SourceRegistry::new());
    }

    let sources_config = SourcesConfig::load(&config.sources_file)
        .with_context(|| format!("loading {}", config.sources_file))?;
    let registry = SourceRegistry::from_config(&sources_config)?;

    tracing::info!(
        file = %config.sources_file,
        sources = registry.names().len(),
        "Data sources loaded"
    );
    Ok(registry)
}

/// Read the configured expressions file, if any.
fn load_expressions(config: &AppConfig) -> anyhow::Result<Option<ExpressionFile>> {
    match &config.expressions_file {
        Some(path) => Ok(Some(ExpressionFile::load(path)?)),
        None => Ok(None),
    }
}

/// Open the configured expression store.
async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ExpressionStore>> {
    let seed = load_expressions(config)?;

    match config.store {
        StoreBackend::Memory => {
            let items = seed.map(|file| file.expressions).unwrap_or_default();
            if items.is_empty() {
                tracing::warn!("Expression table is empty");
            }
            tracing::info!(count = items.len(), "Using in-memory expression store");
            Ok(Arc::new(MemoryExpressionStore::with_items(items)?))
        }
        StoreBackend::Postgres => {
            let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load database config, using defaults");
                DatabaseConfig::default()
            });
            let pool = create_pool(&db_config).await?;
            let store = PgExpressionStore::new(pool);
            store.ensure_schema().await?;

            // Seed only an empty table; edits made through the API win.
            if let Some(file) = seed {
                if store.list().await?.is_empty() {
                    let count = file.expressions.len();
                    store.replace_all(file.expressions).await?;
                    tracing::info!(count, "Expression table seeded");
                }
            }

            tracing::info!("Using PostgreSQL expression store");
            Ok(Arc::new(store))
        }
    }
}

async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let sources = load_sources(&config)?;
    let store = open_store(&config).await?;
    Ok(AppState::new(store, Arc::new(sources), config))
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config.bind_address().parse()?;
    let state = build_state(config).await?;
    let app = build_router(state.clone());

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let the row in flight finish before exiting.
    state.engine.stop();
    state.engine.join().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn run_once(config: AppConfig, rows: Option<Vec<String>>) -> anyhow::Result<()> {
    let state = build_state(config).await?;

    let started = match rows {
        Some(rows) if rows.is_empty() => anyhow::bail!("--rows must name at least one row"),
        Some(rows) => state.engine.run(rows),
        None => state.engine.run_all().await?,
    };
    if let RunStart::Started { run_id } = started {
        tracing::debug!(run_id = %run_id, "Waiting for run");
    }

    let join = state.engine.join();
    tokio::pin!(join);
    tokio::select! {
        _ = &mut join => {}
        _ = shutdown_signal() => {
            state.engine.stop();
            join.await;
        }
    }

    let snapshot = state.status.snapshot();
    println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);

    if snapshot.progress.failed > 0 {
        anyhow::bail!("{} of {} rows failed", snapshot.progress.failed, snapshot.progress.total);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let (app_config, config_error) = match AppConfig::from_env() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    init_tracing(app_config.log_format);

    if let Some(e) = config_error {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        server_name = %app_config.server_name,
        store = ?app_config.store,
        debug = app_config.debug,
        "Starting QueryDeck"
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(app_config).await,
        Commands::Run { rows } => run_once(app_config, rows).await,
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
