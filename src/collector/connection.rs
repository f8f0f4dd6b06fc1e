//! Connection lifecycle management for the monitored server.
//!
//! Each scrape cycle opens exactly one bounded connection through a
//! [`ConnectionFactory`] and releases it when the cycle completes, whatever
//! the outcome. The production implementation is backed by a sqlx [`AnyPool`]
//! capped at a single connection with a bounded maximum lifetime, so no
//! connection outlives its usefulness server-side.

use std::str::FromStr;
use std::sync::Once;

use sqlx::any::{AnyConnectOptions, AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use crate::config::DatabaseConfig;

use super::ScrapeError;

/// Query probing the monitored server's version.
const VERSION_QUERY: &str = "SELECT @@version";

/// Version reported when the server's version string cannot be parsed.
/// Large enough to satisfy every scraper's floor.
pub const FALLBACK_SERVER_VERSION: f64 = 999.0;

static DRIVERS: Once = Once::new();

/// One open channel to the monitored server, exclusive to a scrape cycle.
///
/// Values arrive as text: result columns are decoded to strings and parsed
/// downstream according to each scraper's numeric policy.
#[async_trait::async_trait]
pub trait ServerConnection: Send + Sync {
    /// Run a query and return all result rows as text columns.
    async fn fetch_rows(&self, query: &str) -> Result<Vec<Vec<String>>, ScrapeError>;

    /// Release the connection. Called exactly once per cycle.
    async fn close(&self);

    /// Probe the server version as `major.minor`.
    ///
    /// Best-effort: an unreachable server or unparseable version string
    /// yields [`FALLBACK_SERVER_VERSION`] so that version floors stay
    /// advisory rather than blocking the cycle.
    async fn server_version(&self) -> f64 {
        let raw = match self.fetch_rows(VERSION_QUERY).await {
            Ok(rows) => rows.into_iter().next().and_then(|r| r.into_iter().next()),
            Err(e) => {
                tracing::debug!(error = %e, "server version probe failed");
                None
            }
        };
        raw.as_deref()
            .and_then(parse_server_version)
            .filter(|v| *v > 0.0)
            .unwrap_or(FALLBACK_SERVER_VERSION)
    }
}

/// Opens the per-cycle connection.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a fresh bounded connection for one scrape cycle.
    async fn open(&self) -> Result<std::sync::Arc<dyn ServerConnection>, ScrapeError>;
}

/// Production [`ConnectionFactory`] for a CUBRID DSN.
#[derive(Debug, Clone)]
pub struct CubridConnector {
    config: DatabaseConfig,
}

impl CubridConnector {
    /// Create a connector from the database configuration.
    pub fn new(config: &DatabaseConfig) -> Self {
        DRIVERS.call_once(sqlx::any::install_default_drivers);
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for CubridConnector {
    async fn open(&self) -> Result<std::sync::Arc<dyn ServerConnection>, ScrapeError> {
        let pool = CubridPool::connect(&self.config).await?;
        Ok(std::sync::Arc::new(pool))
    }
}

/// sqlx-backed connection with the per-cycle capacity limits applied.
pub struct CubridPool {
    pool: AnyPool,
}

impl CubridPool {
    /// Open a pool capped at one connection with a bounded lifetime.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, ScrapeError> {
        let options = AnyConnectOptions::from_str(&config.dsn)?;

        // One connection per scrape cycle; a stale connection is discarded
        // once max_lifetime elapses rather than accumulating server-side state.
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .max_lifetime(config.max_lifetime)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }
}

impl std::fmt::Debug for CubridPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubridPool").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ServerConnection for CubridPool {
    async fn fetch_rows(&self, query: &str) -> Result<Vec<Vec<String>>, ScrapeError> {
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| column_text(row, i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(ScrapeError::from)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Decode one column as text, tolerating numeric column types.
fn column_text(row: &AnyRow, idx: usize) -> Result<String, sqlx::Error> {
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Ok(v.to_string());
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Ok(v.to_string());
    }
    // Surface the driver's own error for genuinely undecodable columns.
    row.try_get::<String, _>(idx)
}

/// Parse the leading `major.minor` of a server version string.
fn parse_server_version(raw: &str) -> Option<f64> {
    let end = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let mut parts = raw[..end].split('.');
    let major = parts.next().filter(|s| !s.is_empty())?;
    let minor = parts.next().filter(|s| !s.is_empty())?;
    format!("{major}.{minor}").parse().ok()
}
