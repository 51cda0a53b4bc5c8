use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "enclii_http_requests_total",
        "Total HTTP requests by route and status class",
        &["method", "route", "status"]
    )
    .unwrap();
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "enclii_http_request_duration_seconds",
        "HTTP request latency",
        &["method", "route"]
    )
    .unwrap();
    pub static ref CACHE_HITS_TOTAL: CounterVec =
        register_counter_vec!("enclii_cache_hits_total", "Cache hit/miss count", &["outcome"]).unwrap();
    pub static ref BUILD_QUEUE_LENGTH: GaugeVec = register_gauge_vec!(
        "enclii_build_queue_length",
        "Queued build jobs",
        &["priority_band"]
    )
    .unwrap();
    pub static ref BUILDS_TOTAL: CounterVec = register_counter_vec!(
        "enclii_builds_total",
        "Completed builds by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref BUILD_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "enclii_build_duration_seconds",
        "Build duration from dispatch to terminal state",
        &["outcome"]
    )
    .unwrap();
    pub static ref RECONCILE_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "enclii_reconcile_duration_seconds",
        "Reconciler apply latency",
        &["result"]
    )
    .unwrap();
    pub static ref DEPLOYMENT_REPLICAS: GaugeVec = register_gauge_vec!(
        "enclii_deployment_ready_replicas",
        "Ready replica count per deployment",
        &["service", "environment"]
    )
    .unwrap();
    pub static ref AUDIT_WRITER_CRITICAL_TOTAL: CounterVec = register_counter_vec!(
        "enclii_audit_writer_critical_total",
        "Audit entries that spilled to the disk fallback after a channel timeout",
        &["reason"]
    )
    .unwrap();
    pub static ref SLOW_CONSUMER_TOTAL: CounterVec = register_counter_vec!(
        "enclii_slow_consumer_total",
        "Log stream subscribers dropped for falling behind",
        &["stream"]
    )
    .unwrap();
}

/// Rendered once per `GET /metrics` request in Prometheus text exposition format.
pub fn render() -> anyhow::Result<String> {
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
