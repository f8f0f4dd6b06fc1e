//! HTTP surface of the exporter.
//!
//! One GET on the telemetry path drives one scrape cycle. Failures never
//! surface as HTTP error statuses: they are reported as metric values for
//! the caller's monitoring system to alert on. The only 500 path is a
//! failure to encode the response body itself.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::collector::Exporter;

/// Request header carrying the caller's scrape timeout in seconds.
pub const SCRAPE_TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";

const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The scrape orchestrator.
    pub exporter: Arc<Exporter>,
    /// Offset subtracted from the caller-declared timeout.
    pub timeout_offset: Duration,
    /// Path under which metrics are exposed.
    pub telemetry_path: String,
}

/// Create the Axum router with the landing page and telemetry routes.
pub fn create_router(state: AppState) -> Router {
    let telemetry_path = state.telemetry_path.clone();

    Router::new()
        .route("/", get(landing_handler))
        .route(&telemetry_path, get(metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(Arc::new(state))
}

/// Static landing page linking to the telemetry path.
async fn landing_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>CUBRID exporter</title></head>\n<body>\n\
         <h1>CUBRID exporter</h1>\n<p><a href='{}'>Metrics</a></p>\n</body>\n</html>\n",
        state.telemetry_path
    ))
}

/// Telemetry handler: one scrape cycle per request.
async fn metrics_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    let requested: Vec<String> = params
        .into_iter()
        .filter(|(key, _)| key == "collect[]")
        .map(|(_, value)| value)
        .collect();
    tracing::debug!(collect = ?requested, "collect query");

    let budget = scrape_budget(&headers, state.timeout_offset);

    match state.exporter.handle_scrape(&requested, budget).await {
        Ok(body) => ([(CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Derive the effective scrape budget from the caller's timeout hint.
///
/// The configured offset is subtracted so the exporter answers before the
/// caller gives up. When the offset would consume the whole hint, the hint
/// is used unadjusted rather than producing a non-positive deadline. A
/// missing or malformed header yields no budget at all.
fn scrape_budget(headers: &HeaderMap, offset: Duration) -> Option<Duration> {
    let raw = headers.get(SCRAPE_TIMEOUT_HEADER)?;
    let raw = match raw.to_str() {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!("ignoring non-ASCII scrape timeout header");
            return None;
        }
    };

    let seconds = match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => v,
        _ => {
            tracing::warn!(value = raw, "ignoring malformed scrape timeout header");
            return None;
        }
    };
    let hint = Duration::from_secs_f64(seconds);

    if offset < hint {
        Some(hint - offset)
    } else {
        tracing::warn!(
            offset_secs = offset.as_secs_f64(),
            timeout_secs = seconds,
            "timeout offset should be lower than the scrape timeout; using the timeout unadjusted"
        );
        Some(hint)
    }
}
