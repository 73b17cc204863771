//! Storefront Payment Server
//!
//! Checkout payments through the Pesapal gateway: initiation, verification,
//! IPN handling and exactly-once order creation.

mod admin;
mod api;
mod config;
mod rate_limit;
mod server;
mod shutdown;
mod state;

use clap::{Parser, Subcommand};
use config::{ConfigLoader, LoadedConfig, get_database_url};
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use storefront_core::config::IdempotencyBackend;
use storefront_core::events::ipn_received_channel;
use storefront_core::idempotency::{
    IdempotencyLedger, IdempotencyStore, MemoryIdempotencyStore, PgIdempotencyStore,
};
use storefront_core::processors::{IpnProcessor, LedgerSweeper};
use storefront_core::repository::PgPaymentRepository;
use storefront_core::services::PaymentService;
use storefront_sdk::pesapal::PesapalClient;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Storefront payments - Pesapal checkout backend
#[derive(Parser, Debug)]
#[command(name = "storefront-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./storefront-config.toml", global = true)]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    #[command(flatten)]
    Admin(admin::AdminCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let pesapal = &loaded_config.pesapal;
    let client = PesapalClient::new(
        &pesapal.base_url,
        pesapal.consumer_key.clone(),
        pesapal.consumer_secret.clone(),
        pesapal.timeout,
    )
    .map_err(|e| {
        tracing::error!("Failed to build Pesapal client: {}", e);
        e
    })?;

    match args.command {
        Some(Command::Admin(command)) => admin::run(command, &client).await,
        Some(Command::Serve) | None => {
            serve(loaded_config, config_loader, client, args.migrate).await
        }
    }
}

async fn serve(
    loaded_config: LoadedConfig,
    config_loader: Arc<ConfigLoader>,
    client: PesapalClient,
    migrate: bool,
) -> anyhow::Result<()> {
    tracing::info!("Starting storefront-server v{}", env!("CARGO_PKG_VERSION"));
    let listen_addr = loaded_config.server.listen;

    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Run migrations if requested
    if migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let idempotency = loaded_config.idempotency;
    let store: Arc<dyn IdempotencyStore> = match idempotency.backend {
        IdempotencyBackend::Memory => Arc::new(MemoryIdempotencyStore::new()),
        IdempotencyBackend::Postgres => Arc::new(PgIdempotencyStore::new(db_pool.clone())),
    };
    tracing::info!(backend = ?idempotency.backend, ttl_secs = idempotency.ttl.as_secs(), "Idempotency ledger ready");
    let ledger = IdempotencyLedger::new(store, idempotency.ttl);

    let shared_config = loaded_config.shared();
    let payments = Arc::new(PaymentService::new(
        Arc::new(PgPaymentRepository::new(db_pool.clone())),
        Arc::new(client),
        ledger.clone(),
        shared_config.checkout.clone(),
    ));

    // Background processors
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ipn_tx, ipn_rx) = ipn_received_channel();
    let ipn_processor = tokio::spawn(
        IpnProcessor::new(payments.clone(), ipn_rx, shutdown_rx.clone()).run(),
    );
    let ledger_sweeper = tokio::spawn(
        LedgerSweeper::new(ledger, idempotency.sweep_interval, shutdown_rx).run(),
    );

    // Create application state
    let state = AppState::new(payments, shared_config.clone(), ipn_tx);

    // Spawn config reload handler (listens for SIGHUP)
    let shutdown_notify = spawn_config_reload_handler(shared_config, config_loader);

    // Build the router
    let router = build_router(state);

    // Run the server
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr).await;

    // Signal the config reload handler and processors to stop
    shutdown_notify.notify_one();
    let _ = shutdown_tx.send(true);
    for (name, handle) in [("IpnProcessor", ipn_processor), ("LedgerSweeper", ledger_sweeper)] {
        if let Err(e) = handle.await {
            tracing::error!(processor = name, error = %e, "Processor task failed");
        }
    }

    // Close database connections gracefully
    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
///
/// Set `LOG_FORMAT=json` for JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
