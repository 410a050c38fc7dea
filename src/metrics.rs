// =============================================================================
// METRICS MODULE
// =============================================================================
// Prometheus metrics for the device directory, scraped from GET /metrics.
// =============================================================================

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// METRIC NAMES
// =============================================================================

/// Labels: method, endpoint, status
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// Labels: method, endpoint
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Labels: operation (select/insert/update)
pub const DB_QUERY_DURATION_SECONDS: &str = "db_query_duration_seconds";

/// Labels: field
pub const DEVICE_VALIDATION_FAILURES_TOTAL: &str = "device_validation_failures_total";

/// Labels: event (created/updated/deactivated)
pub const DEVICE_LIFECYCLE_EVENTS_TOTAL: &str = "device_lifecycle_events_total";

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

// =============================================================================
// SETUP
// =============================================================================
/// Install the global Prometheus recorder and return its render handle.
pub fn setup_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(DB_QUERY_DURATION_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )?
        .install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds");
    describe_histogram!(DB_QUERY_DURATION_SECONDS, "Database query latency in seconds");
    describe_counter!(
        DEVICE_VALIDATION_FAILURES_TOTAL,
        "Device submissions rejected by field validation"
    );
    describe_counter!(
        DEVICE_LIFECYCLE_EVENTS_TOTAL,
        "Devices created, updated and soft-deleted"
    );

    Ok(handle)
}

/// Handle for a recorder that is not installed globally.
///
/// Used where a handle is needed but the process-wide recorder must not be
/// touched (tests build many routers in one process).
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

pub fn record_db_query(operation: &str, duration_secs: f64) {
    histogram!(
        DB_QUERY_DURATION_SECONDS,
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

pub fn record_validation_failure(field: &str) {
    counter!(
        DEVICE_VALIDATION_FAILURES_TOTAL,
        "field" => field.to_string()
    )
    .increment(1);
}

pub fn record_lifecycle_event(event: &str) {
    counter!(
        DEVICE_LIFECYCLE_EVENTS_TOTAL,
        "event" => event.to_string()
    )
    .increment(1);
}
