//! Core scraper contract and sample types.
//!
//! A [`Scraper`] is one pluggable unit of data extraction: it runs a fixed
//! query against the monitored CUBRID server and converts the result rows
//! into [`Sample`]s pushed onto a shared [`SampleSink`]. Scrapers are fanned
//! out concurrently by the [`Exporter`](exporter::Exporter) once per inbound
//! metrics request.

pub mod broker_status;
pub mod connection;
pub mod exporter;
pub mod registry;
pub mod spacedb;
pub mod statdump;

use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;

pub use broker_status::BrokerStatus;
pub use connection::{ConnectionFactory, CubridConnector, ServerConnection};
pub use exporter::{Exporter, Metrics};
pub use registry::{ScraperKind, ScraperSet};
pub use spacedb::SpaceDb;
pub use statdump::Statdump;

/// Errors that can occur while scraping the monitored server.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Query or connection-level database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The scrape deadline elapsed before the operation finished.
    #[error("scrape deadline elapsed")]
    Timeout,

    /// A value that must be numeric could not be parsed.
    #[error("malformed numeric value for {field}: {value:?}")]
    Parse {
        /// Column the value came from.
        field: &'static str,
        /// The raw text that failed to parse.
        value: String,
    },

    /// A result row did not have the expected number of columns.
    #[error("unexpected row shape for {query:?}: got {got} columns, want {want}")]
    RowShape {
        /// The query that produced the row.
        query: String,
        /// Columns received.
        got: usize,
        /// Columns expected.
        want: usize,
    },
}

/// Whether a sample is a monotonic counter or a point-in-time gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Monotonically increasing value.
    Counter,
    /// Point-in-time observation.
    Gauge,
}

/// One emitted metric observation.
///
/// Immutable once constructed; produced by a scraper (or by the exporter's
/// own bookkeeping) and consumed exactly once by the exposition encoder.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Full metric name, without a type suffix.
    pub name: &'static str,
    /// Help text for the metric family.
    pub help: &'static str,
    /// Counter or gauge.
    pub kind: SampleKind,
    /// Ordered label key/value pairs.
    pub labels: Vec<(&'static str, String)>,
    /// Observed value.
    pub value: f64,
}

impl Sample {
    /// Create a gauge sample.
    pub fn gauge(
        name: &'static str,
        help: &'static str,
        labels: Vec<(&'static str, String)>,
        value: f64,
    ) -> Self {
        Self {
            name,
            help,
            kind: SampleKind::Gauge,
            labels,
            value,
        }
    }

    /// Create a counter sample.
    pub fn counter(
        name: &'static str,
        help: &'static str,
        labels: Vec<(&'static str, String)>,
        value: f64,
    ) -> Self {
        Self {
            name,
            help,
            kind: SampleKind::Counter,
            labels,
            value,
        }
    }
}

/// Multi-producer sample stream fed by concurrently running scrapers.
///
/// Backed by an unbounded channel: producers never block, and the consumer
/// drains only after every producer has finished and dropped its sender.
#[derive(Clone)]
pub struct SampleSink {
    tx: mpsc::UnboundedSender<Sample>,
}

impl SampleSink {
    /// Create a sink together with the receiving half of the stream.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Sample>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Push one sample onto the stream.
    ///
    /// The receiver outlives every producer within a scrape cycle, so a send
    /// can only fail if the cycle was torn down early; the sample is dropped
    /// and the condition logged.
    pub fn emit(&self, sample: Sample) {
        if let Err(e) = self.tx.send(sample) {
            tracing::warn!(metric = %e.0.name, "sample dropped: stream already closed");
        }
    }
}

impl std::fmt::Debug for SampleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleSink").finish_non_exhaustive()
    }
}

/// Per-request scrape parameters shared by all scrapers of one cycle.
#[derive(Debug, Clone)]
pub struct ScrapeContext {
    /// Absolute deadline derived from the caller's timeout budget, if any.
    pub deadline: Option<Instant>,
    /// Name of the monitored database, interpolated into per-database queries.
    pub database: String,
}

impl ScrapeContext {
    /// Create a context for one scrape cycle.
    pub fn new(deadline: Option<Instant>, database: impl Into<String>) -> Self {
        Self {
            deadline,
            database: database.into(),
        }
    }
}

/// Contract implemented by every data extractor.
///
/// Implementations must not retain the connection beyond the `scrape` call.
/// Deadline enforcement happens in the exporter, which wraps each `scrape`
/// invocation in a timeout bound to the cycle's [`ScrapeContext`].
#[async_trait::async_trait]
pub trait Scraper: Send + Sync {
    /// Unique name, used for request-level selection and error labeling.
    fn name(&self) -> &'static str;

    /// Human-readable description of what this scraper collects.
    fn help(&self) -> &'static str;

    /// Lowest CUBRID server version this scraper is valid for. Advisory:
    /// a lower server version is logged, never enforced as a hard gate.
    fn min_server_version(&self) -> f64;

    /// Run the scraper's queries against `conn` and emit samples to `sink`.
    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        conn: &dyn ServerConnection,
        sink: &SampleSink,
    ) -> Result<(), ScrapeError>;
}

/// Parse an optional diagnostic field, treating malformed text as zero.
pub(crate) fn parse_or_zero(field: &'static str, value: &str) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            tracing::debug!(field, value, "non-numeric value treated as 0");
            0.0
        }
    }
}

/// Parse a field that must be numeric, failing the scrape otherwise.
pub(crate) fn parse_strict(field: &'static str, value: &str) -> Result<f64, ScrapeError> {
    value.trim().parse::<f64>().map_err(|_| ScrapeError::Parse {
        field,
        value: value.to_string(),
    })
}
