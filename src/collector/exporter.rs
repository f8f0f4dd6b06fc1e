//! Scrape orchestration.
//!
//! [`Exporter`] drives one scrape cycle per inbound metrics request: it opens
//! the bounded per-cycle connection, fans the selected scrapers out as
//! concurrent tasks sharing that connection and one sample stream, joins
//! every task before the stream is closed, and encodes the drained samples
//! together with the process-wide bookkeeping metrics.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use prometheus_client::collector::Collector;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{DescriptorEncoder, EncodeLabelSet, NoLabelSet};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::Registry;
use tokio::task::JoinSet;

use super::connection::{ConnectionFactory, FALLBACK_SERVER_VERSION};
use super::registry::{ScraperKind, ScraperSet};
use super::{Sample, SampleKind, SampleSink, ScrapeContext, ScrapeError};

const DURATION_NAME: &str = "cubrid_exporter_collector_duration_seconds";
const DURATION_HELP: &str = "Collector time duration.";

/// Label set keying per-scraper bookkeeping metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CollectorLabels {
    /// Collector phase, `connection` or `collect.<scraper>`.
    pub collector: String,
}

/// Process-wide bookkeeping metrics, carried across requests.
///
/// All handles are internally synchronized; clones share state.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// Total number of scrape cycles started.
    pub scrapes_total: Counter,
    /// Scrape failures keyed by collector phase.
    pub scrape_errors: Family<CollectorLabels, Counter>,
    /// Whether the last scrape cycle saw any error (1) or none (0).
    pub last_scrape_error: Gauge,
    /// Whether the monitored server was reachable on the last cycle.
    pub up: Gauge,
}

impl Metrics {
    /// Create a fresh set of bookkeeping metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register clones of the handles into a per-request registry.
    fn register_into(&self, registry: &mut Registry) {
        registry.register(
            "cubrid_exporter_scrapes",
            "Total number of times CUBRID was scraped for metrics.",
            self.scrapes_total.clone(),
        );
        registry.register(
            "cubrid_exporter_scrape_errors",
            "Total number of times an error occurred scraping a CUBRID.",
            self.scrape_errors.clone(),
        );
        registry.register(
            "cubrid_exporter_last_scrape_error",
            "Whether the last scrape of metrics from CUBRID resulted in an error (1 for error, 0 for success).",
            self.last_scrape_error.clone(),
        );
        registry.register(
            "cubrid_up",
            "Whether the CUBRID server is up.",
            self.up.clone(),
        );
        registry.register(
            "cubrid_exporter_build",
            "Build information of the exporter.",
            Info::new(vec![("version", env!("CARGO_PKG_VERSION"))]),
        );
    }
}

/// One scrape cycle's samples, exposed to the encoder as a collector.
#[derive(Debug)]
struct SampleReport {
    samples: Vec<Sample>,
}

impl Collector for SampleReport {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        // One descriptor per metric family, however many scrapers fed it.
        let mut families: BTreeMap<&'static str, Vec<&Sample>> = BTreeMap::new();
        for sample in &self.samples {
            families.entry(sample.name).or_default().push(sample);
        }

        for samples in families.values() {
            let first = samples[0];
            let metric_type = match first.kind {
                SampleKind::Counter => MetricType::Counter,
                SampleKind::Gauge => MetricType::Gauge,
            };
            let mut family = encoder.encode_descriptor(first.name, first.help, None, metric_type)?;
            for sample in samples {
                match sample.kind {
                    SampleKind::Gauge => family
                        .encode_family(&sample.labels)?
                        .encode_gauge(&sample.value)?,
                    SampleKind::Counter => family
                        .encode_family(&sample.labels)?
                        .encode_counter::<NoLabelSet, f64, f64>(&sample.value, None)?,
                }
            }
        }
        Ok(())
    }
}

/// Scrape orchestrator: one instance per process, one cycle per request.
pub struct Exporter {
    factory: Arc<dyn ConnectionFactory>,
    scrapers: ScraperSet,
    metrics: Metrics,
    database: String,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("scrapers", &self.scrapers)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Exporter {
    /// Create an exporter over the given connection factory and registry.
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        scrapers: ScraperSet,
        database: impl Into<String>,
        metrics: Metrics,
    ) -> Self {
        Self {
            factory,
            scrapers,
            metrics,
            database: database.into(),
        }
    }

    /// The process-wide bookkeeping metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// The scraper registry.
    pub fn scrapers(&self) -> &ScraperSet {
        &self.scrapers
    }

    /// Run one scrape cycle and encode the result as OpenMetrics text.
    ///
    /// `requested` is the raw `collect[]` selection; `budget` the effective
    /// timeout derived from the caller's hint, if any.
    pub async fn handle_scrape(
        &self,
        requested: &[String],
        budget: Option<std::time::Duration>,
    ) -> Result<String, std::fmt::Error> {
        let selection = self.scrapers.select(requested);
        tracing::debug!(
            selected = ?selection.iter().map(|k| k.name()).collect::<Vec<_>>(),
            budget = ?budget,
            "starting scrape cycle"
        );

        let ctx = ScrapeContext::new(budget.map(|b| Instant::now() + b), self.database.clone());
        let samples = self.run_cycle(&selection, ctx).await;

        let mut registry = Registry::default();
        self.metrics.register_into(&mut registry);
        registry.register_collector(Box::new(SampleReport { samples }));

        let mut body = String::new();
        encode(&mut body, &registry)?;
        Ok(body)
    }

    /// Execute one cycle: open the connection, fan out, join, drain.
    async fn run_cycle(&self, selection: &[ScraperKind], ctx: ScrapeContext) -> Vec<Sample> {
        self.metrics.scrapes_total.inc();

        let (sink, mut rx) = SampleSink::channel();
        let connect_start = Instant::now();
        let conn = match with_deadline(ctx.deadline, self.factory.open()).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "error opening connection to database");
                self.metrics.up.set(0);
                self.metrics.last_scrape_error.set(1);
                return Vec::new();
            }
        };

        self.metrics.up.set(1);
        self.metrics.last_scrape_error.set(0);
        sink.emit(Sample::gauge(
            DURATION_NAME,
            DURATION_HELP,
            vec![("collector", "connection".to_string())],
            connect_start.elapsed().as_secs_f64(),
        ));

        let version = match ctx.deadline {
            Some(d) => tokio::time::timeout_at(d.into(), conn.server_version())
                .await
                .unwrap_or(FALLBACK_SERVER_VERSION),
            None => conn.server_version().await,
        };
        for kind in selection {
            let floor = kind.scraper().min_server_version();
            if version < floor {
                tracing::warn!(
                    collector = kind.name(),
                    server_version = version,
                    minimum = floor,
                    "server older than the scraper's supported floor"
                );
            }
        }

        let ctx = Arc::new(ctx);
        let mut tasks = JoinSet::new();
        for &kind in selection {
            let conn = Arc::clone(&conn);
            let sink = sink.clone();
            let ctx = Arc::clone(&ctx);
            let metrics = self.metrics.clone();

            tasks.spawn(async move {
                let scraper = kind.scraper();
                let phase = format!("collect.{}", scraper.name());
                let scrape_start = Instant::now();

                let result =
                    with_deadline(ctx.deadline, scraper.scrape(&ctx, conn.as_ref(), &sink)).await;
                if let Err(e) = result {
                    tracing::error!(collector = %phase, error = %e, "error scraping");
                    metrics
                        .scrape_errors
                        .get_or_create(&CollectorLabels {
                            collector: phase.clone(),
                        })
                        .inc();
                    metrics.last_scrape_error.set(1);
                }

                // Emitted after the scraper's own work, whatever the outcome.
                sink.emit(Sample::gauge(
                    DURATION_NAME,
                    DURATION_HELP,
                    vec![("collector", phase)],
                    scrape_start.elapsed().as_secs_f64(),
                ));
            });
        }

        // Completion barrier: no sample may arrive after the stream closes.
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "scraper task failed");
                self.metrics.last_scrape_error.set(1);
            }
        }

        conn.close().await;

        drop(sink);
        let mut samples = Vec::new();
        while let Some(sample) = rx.recv().await {
            samples.push(sample);
        }
        samples
    }
}

/// Bound a scrape operation to the cycle deadline, if one is set.
async fn with_deadline<T>(
    deadline: Option<Instant>,
    fut: impl Future<Output = Result<T, ScrapeError>>,
) -> Result<T, ScrapeError> {
    match deadline {
        Some(d) => match tokio::time::timeout_at(d.into(), fut).await {
            Ok(result) => result,
            Err(_) => Err(ScrapeError::Timeout),
        },
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::connection::mock::{healthy_script, Respond, ScriptedFactory};
    use std::time::Duration;

    fn exporter_with(factory: ScriptedFactory) -> (Exporter, Arc<ScriptedFactory>) {
        let factory = Arc::new(factory);
        let exporter = Exporter::new(
            Arc::clone(&factory) as Arc<dyn ConnectionFactory>,
            ScraperSet::default(),
            "demodb",
            Metrics::new(),
        );
        (exporter, factory)
    }

    fn duration_phases(samples: &[Sample]) -> Vec<String> {
        let mut phases: Vec<String> = samples
            .iter()
            .filter(|s| s.name == DURATION_NAME)
            .map(|s| s.labels[0].1.clone())
            .collect();
        phases.sort();
        phases
    }

    #[tokio::test]
    async fn test_cycle_opens_and_closes_exactly_once() {
        let (exporter, factory) = exporter_with(ScriptedFactory::new(healthy_script("demodb")));

        let selection = exporter.scrapers().default_enabled();
        let ctx = ScrapeContext::new(None, "demodb");
        exporter.run_cycle(&selection, ctx).await;

        assert_eq!(factory.open_count(), 1);
        assert_eq!(factory.close_count(), 1);
        assert_eq!(exporter.metrics().up.get(), 1);
        assert_eq!(exporter.metrics().last_scrape_error.get(), 0);
        assert_eq!(exporter.metrics().scrapes_total.get(), 1);
    }

    #[tokio::test]
    async fn test_cycle_emits_duration_per_phase() {
        let (exporter, _factory) = exporter_with(ScriptedFactory::new(healthy_script("demodb")));

        let selection = exporter.scrapers().default_enabled();
        let ctx = ScrapeContext::new(None, "demodb");
        let samples = exporter.run_cycle(&selection, ctx).await;

        assert_eq!(
            duration_phases(&samples),
            vec![
                "collect.broker_status",
                "collect.spacedb",
                "collect.statdump",
                "connection"
            ]
        );
    }

    #[tokio::test]
    async fn test_open_failure_is_cycle_fatal() {
        let (exporter, factory) = exporter_with(ScriptedFactory::failing_open());

        let selection = exporter.scrapers().default_enabled();
        let ctx = ScrapeContext::new(None, "demodb");
        let samples = exporter.run_cycle(&selection, ctx).await;

        assert!(samples.is_empty());
        assert_eq!(exporter.metrics().up.get(), 0);
        assert_eq!(exporter.metrics().last_scrape_error.get(), 1);
        assert_eq!(factory.open_count(), 1);
        assert_eq!(factory.close_count(), 0);
    }

    #[tokio::test]
    async fn test_one_scraper_failure_does_not_stop_siblings() {
        let mut script = healthy_script("demodb");
        script.insert("show statdump demodb".to_string(), Respond::Fail);
        let (exporter, factory) = exporter_with(ScriptedFactory::new(script));

        let selection = exporter.scrapers().default_enabled();
        let ctx = ScrapeContext::new(None, "demodb");
        let samples = exporter.run_cycle(&selection, ctx).await;

        // Sibling samples survive, and the failing phase still reports its
        // duration.
        assert!(samples.iter().any(|s| s.name == "cubrid_broker_status_info"));
        assert!(samples.iter().any(|s| s.name == "cubrid_spacedb_info"));
        assert!(!samples.iter().any(|s| s.name == "cubrid_statdump_info"));
        assert!(duration_phases(&samples).contains(&"collect.statdump".to_string()));

        let errors = exporter
            .metrics()
            .scrape_errors
            .get_or_create(&CollectorLabels {
                collector: "collect.statdump".to_string(),
            })
            .get();
        assert_eq!(errors, 1);
        assert_eq!(exporter.metrics().last_scrape_error.get(), 1);
        assert_eq!(exporter.metrics().up.get(), 1);
        assert_eq!(factory.close_count(), 1);
    }

    #[tokio::test]
    async fn test_deadline_counts_as_scraper_failure() {
        let mut script = healthy_script("demodb");
        script.insert("show statdump demodb".to_string(), Respond::Hang);
        let (exporter, factory) = exporter_with(ScriptedFactory::new(script));

        let selection = exporter.scrapers().default_enabled();
        let ctx = ScrapeContext::new(Some(Instant::now() + Duration::from_millis(100)), "demodb");
        let samples = exporter.run_cycle(&selection, ctx).await;

        // The hung scraper is cut off at the deadline and counted as an
        // ordinary failure; completed siblings keep their samples.
        assert!(samples.iter().any(|s| s.name == "cubrid_broker_status_info"));
        let errors = exporter
            .metrics()
            .scrape_errors
            .get_or_create(&CollectorLabels {
                collector: "collect.statdump".to_string(),
            })
            .get();
        assert_eq!(errors, 1);
        assert_eq!(exporter.metrics().last_scrape_error.get(), 1);
        assert_eq!(factory.close_count(), 1);
    }

    #[tokio::test]
    async fn test_error_counter_accumulates_across_cycles() {
        let mut script = healthy_script("demodb");
        script.insert("show statdump demodb".to_string(), Respond::Fail);
        let (exporter, _factory) = exporter_with(ScriptedFactory::new(script));

        let selection = vec![ScraperKind::Statdump];
        for _ in 0..3 {
            let ctx = ScrapeContext::new(None, "demodb");
            exporter.run_cycle(&selection, ctx).await;
        }

        let errors = exporter
            .metrics()
            .scrape_errors
            .get_or_create(&CollectorLabels {
                collector: "collect.statdump".to_string(),
            })
            .get();
        assert_eq!(errors, 3);
        assert_eq!(exporter.metrics().scrapes_total.get(), 3);
    }

    #[tokio::test]
    async fn test_handle_scrape_encodes_bookkeeping_and_samples() {
        let (exporter, _factory) = exporter_with(ScriptedFactory::new(healthy_script("demodb")));

        let body = exporter.handle_scrape(&[], None).await.unwrap();

        assert!(body.contains("cubrid_up 1"));
        assert!(body.contains("cubrid_exporter_scrapes_total 1"));
        assert!(body.contains("cubrid_exporter_last_scrape_error 0"));
        assert!(body.contains("cubrid_broker_status_info"));
        assert!(body.contains("cubrid_spacedb_info"));
        assert!(body.contains("cubrid_statdump_info"));
        assert!(body.contains(r#"collector="connection""#));
        assert!(body.contains(r#"collector="collect.broker_status""#));
        assert!(body.ends_with("# EOF\n"));
    }

    #[tokio::test]
    async fn test_handle_scrape_selection_filters_scrapers() {
        let (exporter, _factory) = exporter_with(ScriptedFactory::new(healthy_script("demodb")));

        let requested = vec!["statdump".to_string()];
        let body = exporter.handle_scrape(&requested, None).await.unwrap();

        assert!(body.contains("cubrid_statdump_info"));
        assert!(!body.contains("cubrid_broker_status_info"));
        assert!(!body.contains(r#"collector="collect.broker_status""#));
    }

    #[tokio::test]
    async fn test_handle_scrape_with_failed_connection_still_reports() {
        let (exporter, _factory) = exporter_with(ScriptedFactory::failing_open());

        let body = exporter.handle_scrape(&[], None).await.unwrap();

        assert!(body.contains("cubrid_up 0"));
        assert!(body.contains("cubrid_exporter_last_scrape_error 1"));
        assert!(!body.contains("cubrid_broker_status_info"));
    }
}
