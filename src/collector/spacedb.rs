//! Database volume usage scraper.
//!
//! Runs `show spacedb <database>` and emits per-volume page usage gauges,
//! including a derived used-percentage.

use super::{
    parse_or_zero, parse_strict, Sample, SampleSink, ScrapeContext, ScrapeError, Scraper,
    ServerConnection,
};

const INFO_NAME: &str = "cubrid_spacedb_info";
const INFO_HELP: &str = "Information about CUBRID database volumes.";

/// Columns of `show spacedb`: vol_no, type, purpose, count, used_pages, free_pages.
const COLUMN_COUNT: usize = 6;

/// Scrapes per-volume page usage.
///
/// Numeric policy: `used_pages` and `free_pages` feed the derived ratio and
/// are parsed strictly; the remaining columns are diagnostic and parsed
/// best-effort.
#[derive(Debug, Clone, Copy)]
pub struct SpaceDb;

#[async_trait::async_trait]
impl Scraper for SpaceDb {
    fn name(&self) -> &'static str {
        "spacedb"
    }

    fn help(&self) -> &'static str {
        "Collect per-volume page usage from `show spacedb`."
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
        let query = format!("show spacedb {}", ctx.database);
        let rows = conn.fetch_rows(&query).await?;

        for row in rows {
            if row.len() != COLUMN_COUNT {
                return Err(ScrapeError::RowShape {
                    query,
                    got: row.len(),
                    want: COLUMN_COUNT,
                });
            }

            let vol_no = &row[0];
            let emit = |key: &'static str, value: f64| {
                sink.emit(Sample::gauge(
                    INFO_NAME,
                    INFO_HELP,
                    vec![("vol_no", vol_no.clone()), ("key", key.to_string())],
                    value,
                ));
            };

            emit("type", parse_or_zero("type", &row[1]));
            emit("purpose", parse_or_zero("purpose", &row[2]));
            emit("count", parse_or_zero("count", &row[3]));

            let used = parse_strict("used_pages", &row[4])?;
            let free = parse_strict("free_pages", &row[5])?;
            emit("used_pages", used);
            emit("free_pages", free);
            emit("used_percentage", used_percentage(used, free));
        }

        Ok(())
    }
}

/// Fraction of pages in use, as a percentage.
///
/// Clamped to 0 when nothing is used so an empty volume reports 0 rather
/// than a division-by-zero artifact.
fn used_percentage(used: f64, free: f64) -> f64 {
    if used == 0.0 {
        0.0
    } else {
        used / (used + free) * 100.0
    }
}
