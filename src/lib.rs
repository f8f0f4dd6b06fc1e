//! CUBRID metrics exporter.
//!
//! Republishes operational metrics of a CUBRID database server in the
//! OpenMetrics exposition format, one scrape cycle per inbound request.
//!
//! # Architecture
//!
//! - **Collector**: the scraper contract, the static scraper registry, the
//!   bounded per-cycle connection, and the scrape orchestrator.
//! - **Server**: the Axum HTTP surface (landing page + telemetry path).
//! - **Config**: layered YAML/CLI configuration with validation.

pub mod collector;
pub mod config;
pub mod server;

pub use collector::{
    ConnectionFactory, CubridConnector, Exporter, Metrics, Sample, SampleKind, SampleSink,
    ScrapeContext, ScrapeError, Scraper, ScraperKind, ScraperSet, ServerConnection,
};
pub use config::{ConfigError, ExporterConfig};
pub use server::{AppState, create_router};
