//! federad binary: streaming read/write endpoints over the federation engine.

mod config;
mod health;
mod jobs;
mod metrics;
mod reaper;
mod rpc;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use federa_cleanup::{CleanupService, CleanupStore, MemoryCleanupStore, PgCleanupStore, ResourceTeardown};
use federa_connectors::{build_store, DorisWarehouse, S3Config, SqlxProbe, StreamLoadClient, Warehouse};
use federa_provision::{FederationContext, ProvisionSettings};
use federa_stream::{SessionRegistry, StreamSettings};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::{CleanupMode, ServerConfig};
use health::HealthState;
use jobs::AppState;
use metrics::FederaMetrics;

const WAREHOUSE_POOL_SIZE: u32 = 10;
const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const CHANNEL_CAPACITY: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "federad", about = "Federated read/write server")]
struct Cli {
    /// Address of the RPC listener (overrides LISTEN_ADDR)
    #[arg(long)]
    listen: Option<String>,

    /// Port of the health/metrics listener (overrides METRICS_PORT)
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let mut config = ServerConfig::from_env()?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics_port = port;
    }
    info!("Starting federad: {:?}", config);

    let s3 = S3Config::from_env()?;
    let warehouse: Arc<dyn Warehouse> = Arc::new(
        DorisWarehouse::connect(&config.warehouse_url, WAREHOUSE_POOL_SIZE)
            .await
            .context("Failed to connect to the warehouse")?,
    );
    let tls_store = build_store(&s3, &config.tls_bucket)?;
    let export_store = build_store(&s3, &config.export_bucket)?;

    let settings = ProvisionSettings {
        tls_public_base_url: config.tls_public_base_url.clone(),
        keystore_password: config.keystore_password.clone(),
        driver_dir_url: config.driver_dir_url.clone(),
        import_batch_size: config.import_batch_size,
        import_max_retry: config.import_max_retry,
        import_parallelism: config.import_parallelism,
        ..Default::default()
    };
    let probe = Arc::new(SqlxProbe::new(warehouse.clone()));
    let ctx = Arc::new(
        FederationContext::start(warehouse.clone(), tls_store, probe, settings)
            .await
            .context("Failed to initialise the federation context")?,
    );

    let cleanup_store: Arc<dyn CleanupStore> = match (config.cleanup_mode(), &config.database_url) {
        (CleanupMode::Shared, Some(url)) => Arc::new(
            PgCleanupStore::connect(url)
                .await
                .context("Failed to connect to the cleanup database")?,
        ),
        _ => {
            warn!("DATABASE_URL not set: cleanup tasks are kept in memory");
            Arc::new(MemoryCleanupStore::new())
        }
    };
    let teardown = ResourceTeardown::new(warehouse, ctx.tls.clone(), export_store.clone());
    let cleanup = CleanupService::new(cleanup_store, Arc::new(teardown), config.cleanup_max_retries);

    let (user, password) = config.warehouse_credentials()?;
    let loader = StreamLoadClient::new(&config.warehouse_http_url, &user, &password)
        .context("Failed to build the stream-load client")?;

    let metrics = FederaMetrics::new();
    let sessions = Arc::new(SessionRegistry::new());

    let state = Arc::new(AppState {
        ctx,
        export_store,
        s3,
        export_bucket: config.export_bucket.clone(),
        export_format: config.export_format,
        export_max_file_size: config.export_max_file_size.clone(),
        stream: StreamSettings {
            csv_batch_rows: config.stream_csv_batch_rows,
            parquet_batch_rows: config.stream_parquet_batch_rows,
            staging_dir: config.staging_path.clone(),
            ..Default::default()
        },
        send_timeout: SEND_TIMEOUT,
        channel_capacity: CHANNEL_CAPACITY,
        loader: Arc::new(loader),
        cleanup: cleanup.clone(),
        sessions: sessions.clone(),
        metrics: metrics.clone(),
    });

    // Health/readiness state
    let ready = Arc::new(AtomicBool::new(true));
    let health_state = Arc::new(HealthState {
        metrics: metrics.clone(),
        ready: ready.clone(),
    });

    let metrics_addr = format!("0.0.0.0:{}", config.metrics_port);
    let health_router = health::health_router(health_state);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("Failed to bind {}", metrics_addr))?;
    info!("Metrics server listening on {}", metrics_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, health_router).await {
            warn!("Metrics server stopped: {}", e);
        }
    });

    reaper::spawn_reaper(
        cleanup,
        sessions,
        metrics,
        config.reaper_interval_secs,
        reaper::ReaperTimeouts {
            cleanup_running: config.cleanup_running_timeout(),
            session_idle: config.session_idle(),
        },
    );
    info!("Reaper started (interval: {}s)", config.reaper_interval_secs);

    let app = rpc::rpc_router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("RPC server listening on {}", config.listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
