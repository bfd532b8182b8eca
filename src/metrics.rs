//! Prometheus metrics for assetpipe.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "assetpipe_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "assetpipe_http_request_duration_seconds";

/// Alias table and import map writes (counter). Labels: document.
pub const DOCUMENT_WRITES_TOTAL: &str = "assetpipe_document_writes_total";

/// Published artifacts (counter). Labels: type.
pub const ARTIFACTS_PUBLISHED_TOTAL: &str = "assetpipe_artifacts_published_total";

/// Total bytes received in multipart request bodies (counter).
pub const BYTES_RECEIVED_TOTAL: &str = "assetpipe_bytes_received_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("a global metrics recorder was already installed");
        }
        handle
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(DOCUMENT_WRITES_TOTAL, "Alias table and import map writes");
    describe_counter!(ARTIFACTS_PUBLISHED_TOTAL, "Published package artifacts");
    describe_counter!(BYTES_RECEIVED_TOTAL, "Total bytes received (multipart bodies)");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation.  Must be the outermost
/// layer so it captures the full request lifecycle.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// Examples:
/// - `/health` -> `/health`
/// - `/a/acme/js/widget/stable` -> `/a/{org}/{type}/{name}/{alias}`
/// - `/import-map/acme/js/@lit/reactive` -> `/import-map/{org}/{type}/{specifier}`
/// - `/pkg/acme/js/widget/1.0.0` -> `/pkg/{org}/{type}/{name}/{version}`
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/openapi.json" | "/metrics" => return path.to_string(),
        _ => {}
    }
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let template = match (segments[0], segments.len()) {
        ("a", 5) => "/a/{org}/{type}/{name}/{alias}",
        ("import-map", 3) => "/import-map/{org}/{type}",
        ("import-map", n) if n > 3 => "/import-map/{org}/{type}/{specifier}",
        ("pkg", 5) => "/pkg/{org}/{type}/{name}/{version}",
        ("pkg", 7) => "/pkg/{org}/{type}/{name}/{version}/{subtype}/{file}",
        _ => "/{unmatched}",
    };
    template.to_string()
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics are disabled").into_response(),
    }
}

// -- Tests --------------------------------------------------------------------
