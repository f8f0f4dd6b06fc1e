//! Server statistics scraper.
//!
//! Runs `show statdump <database>` and republishes every key/value pair as a
//! gauge keyed by statistic name.

use super::{
    parse_strict, Sample, SampleSink, ScrapeContext, ScrapeError, Scraper, ServerConnection,
};

const INFO_NAME: &str = "cubrid_statdump_info";
const INFO_HELP: &str = "Information about CUBRID server statistics.";

/// Columns of `show statdump`: key, value.
const COLUMN_COUNT: usize = 2;

/// Scrapes the server statistics dump.
///
/// Numeric policy: strict. Every statdump value is expected to be numeric,
/// so a malformed one fails the scrape instead of being silently zeroed.
#[derive(Debug, Clone, Copy)]
pub struct Statdump;

#[async_trait::async_trait]
impl Scraper for Statdump {
    fn name(&self) -> &'static str {
        "statdump"
    }

    fn help(&self) -> &'static str {
        "Collect server statistics from `show statdump`."
    }

    fn min_server_version(&self) -> f64 {
        10.2
    }

    async fn scrape(
        &self,
        ctx: &ScrapeContext,
        conn: &dyn ServerConnection,
        sink: &SampleSink,
    ) -> Result<(), ScrapeError> {
        let query = format!("show statdump {}", ctx.database);
        let rows = conn.fetch_rows(&query).await?;

        for row in rows {
            if row.len() != COLUMN_COUNT {
                return Err(ScrapeError::RowShape {
                    query,
                    got: row.len(),
                    want: COLUMN_COUNT,
                });
            }

            let value = parse_strict("value", &row[1])?;
            sink.emit(Sample::gauge(
                INFO_NAME,
                INFO_HELP,
                vec![("key", row[0].clone())],
                value,
            ));
        }

        Ok(())
    }
}
