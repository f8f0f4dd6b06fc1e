//! Broker status scraper.
//!
//! Runs `show brokers` and emits one gauge per broker and numeric column.

use super::{
    parse_or_zero, Sample, SampleSink, ScrapeContext, ScrapeError, Scraper, ServerConnection,
};

const BROKER_STATUS_QUERY: &str = "show brokers";

const INFO_NAME: &str = "cubrid_broker_status_info";
const INFO_HELP: &str = "Information about CUBRID broker status.";

/// Numeric columns of `show brokers`, in result order after the broker name.
const BROKER_FIELDS: [&str; 14] = [
    "num_as",
    "pid",
    "port",
    "qsize",
    "num_select",
    "num_insert",
    "num_update",
    "num_delete",
    "num_trans",
    "num_query",
    "num_conns",
    "num_long_query",
    "num_error_query",
    "num_uniq_error",
];

/// Scrapes per-broker request counters and process information.
///
/// Numeric policy: best-effort. Broker columns are diagnostic counters, so a
/// value the server renders non-numerically is reported as 0 rather than
/// failing the whole scrape.
#[derive(Debug, Clone, Copy)]
pub struct BrokerStatus;

#[async_trait::async_trait]
impl Scraper for BrokerStatus {
    fn name(&self) -> &'static str {
        "broker_status"
    }

    fn help(&self) -> &'static str {
        "Collect per-broker counters from `show brokers`."
    }

    fn min_server_version(&self) -> f64 {
        10.2
    }

    async fn scrape(
        &self,
        _ctx: &ScrapeContext,
        conn: &dyn ServerConnection,
        sink: &SampleSink,
    ) -> Result<(), ScrapeError> {
        let rows = conn.fetch_rows(BROKER_STATUS_QUERY).await?;

        for row in rows {
            if row.len() != BROKER_FIELDS.len() + 1 {
                return Err(ScrapeError::RowShape {
                    query: BROKER_STATUS_QUERY.to_string(),
                    got: row.len(),
                    want: BROKER_FIELDS.len() + 1,
                });
            }

            let broker_name = &row[0];
            for (field, raw) in BROKER_FIELDS.into_iter().zip(&row[1..]) {
                sink.emit(Sample::gauge(
                    INFO_NAME,
                    INFO_HELP,
                    vec![
                        ("broker_name", broker_name.clone()),
                        ("key", field.to_string()),
                    ],
                    parse_or_zero(field, raw),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::connection::mock::{Respond, ScriptedFactory};
    use crate::collector::ConnectionFactory;
    use std::collections::HashMap;

    fn broker_row(name: &str) -> Vec<String> {
        let mut row: Vec<String> = [
            "5", "1234", "33000", "0", "10", "2", "3", "1", "16", "20", "4", "0", "0", "0",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        row.insert(0, name.to_string());
        row
    }

    async fn scrape_with(script: HashMap<String, Respond>) -> Result<Vec<Sample>, ScrapeError> {
        let factory = ScriptedFactory::new(script);
        let conn = factory.open().await.unwrap();
        let (sink, mut rx) = SampleSink::channel();
        let ctx = ScrapeContext::new(None, "demodb");

        let result = BrokerStatus.scrape(&ctx, conn.as_ref(), &sink).await;
        drop(sink);

        let mut samples = Vec::new();
        while let Some(s) = rx.recv().await {
            samples.push(s);
        }
        result.map(|()| samples)
    }

    #[tokio::test]
    async fn test_emits_one_gauge_per_field() {
        let mut script = HashMap::new();
        script.insert(
            BROKER_STATUS_QUERY.to_string(),
            Respond::Rows(vec![broker_row("query_editor"), broker_row("broker1")]),
        );

        let samples = scrape_with(script).await.unwrap();
        assert_eq!(samples.len(), 2 * BROKER_FIELDS.len());
        assert!(samples.iter().all(|s| s.name == INFO_NAME));

        let num_as = samples
            .iter()
            .find(|s| {
                s.labels.contains(&("broker_name", "query_editor".to_string()))
                    && s.labels.contains(&("key", "num_as".to_string()))
            })
            .unwrap();
        assert_eq!(num_as.value, 5.0);
    }

    #[tokio::test]
    async fn test_non_numeric_field_reported_as_zero() {
        let mut row = broker_row("broker1");
        row[4] = "OFF".to_string();
        let mut script = HashMap::new();
        script.insert(BROKER_STATUS_QUERY.to_string(), Respond::Rows(vec![row]));

        let samples = scrape_with(script).await.unwrap();
        let qsize = samples
            .iter()
            .find(|s| s.labels.contains(&("key", "qsize".to_string())))
            .unwrap();
        assert_eq!(qsize.value, 0.0);
    }

    #[tokio::test]
    async fn test_short_row_fails_the_scrape() {
        let mut script = HashMap::new();
        script.insert(
            BROKER_STATUS_QUERY.to_string(),
            Respond::Rows(vec![vec!["broker1".to_string(), "5".to_string()]]),
        );

        let err = scrape_with(script).await.unwrap_err();
        assert!(matches!(err, ScrapeError::RowShape { got: 2, .. }));
    }
}
