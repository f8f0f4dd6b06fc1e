//! CUBRID exporter binary entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cubrid_exporter::{
    collector::{CubridConnector, Exporter, Metrics, ScraperSet},
    config::ExporterConfig,
    server::{AppState, create_router},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CUBRID exporter for Prometheus.
#[derive(Parser, Debug)]
#[command(name = "cubrid-exporter", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, env = "CUBRID_EXPORTER_CONFIG")]
    config: Option<String>,

    /// Address to listen on for web interface and telemetry (overrides config file).
    #[arg(long, env = "CUBRID_EXPORTER_LISTEN_ADDRESS")]
    listen_address: Option<String>,

    /// Path under which to expose metrics (overrides config file).
    #[arg(long, env = "CUBRID_EXPORTER_TELEMETRY_PATH")]
    telemetry_path: Option<String>,

    /// Offset to subtract from the caller-declared scrape timeout, e.g. "250ms".
    #[arg(long, env = "CUBRID_EXPORTER_TIMEOUT_OFFSET", value_parser = humantime::parse_duration)]
    timeout_offset: Option<Duration>,

    /// Connection DSN for the monitored server (overrides config file).
    #[arg(long, env = "CUBRID_EXPORTER_DSN")]
    dsn: Option<String>,

    /// Name of the monitored database (overrides config file).
    #[arg(long, env = "CUBRID_EXPORTER_DATABASE")]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cubrid_exporter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!(path = %path, "loading configuration");
            ExporterConfig::load(path)?
        }
        None => ExporterConfig::default(),
    };

    // CLI > environment > config file > defaults.
    if let Some(listen_address) = cli.listen_address {
        config.web.listen_address = listen_address;
    }
    if let Some(telemetry_path) = cli.telemetry_path {
        config.web.telemetry_path = telemetry_path;
    }
    if let Some(timeout_offset) = cli.timeout_offset {
        config.web.timeout_offset = timeout_offset;
    }
    if let Some(dsn) = cli.dsn {
        config.database.dsn = dsn;
    }
    if let Some(database) = cli.database {
        config.database.database = database;
    }
    config.validate()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        database = %config.database.database,
        "starting cubrid-exporter"
    );

    let scrapers = ScraperSet::from_config(&config.scrapers);
    for kind in scrapers.default_enabled() {
        tracing::info!(collector = kind.name(), "scraper enabled");
    }

    let connector = CubridConnector::new(&config.database);
    let exporter = Exporter::new(
        Arc::new(connector),
        scrapers,
        config.database.database.clone(),
        Metrics::new(),
    );

    let state = AppState {
        exporter: Arc::new(exporter),
        timeout_offset: config.web.timeout_offset,
        telemetry_path: config.web.telemetry_path.clone(),
    };
    let app = create_router(state);

    let addr: SocketAddr = config.web.listen_address.parse()?;
    tracing::info!(
        "listening on http://{addr}{}",
        config.web.telemetry_path
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("received terminate signal");
        }
    }
}
