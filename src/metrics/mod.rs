//! Prometheus metrics for the churn inference service.
//!
//! Metrics live in a process-wide registry and are exported in text format
//! by the `/metrics` endpoint.
//!
//! ```no_run
//! use churn_bank_service::metrics::{self, PREDICTIONS_TOTAL};
//!
//! metrics::init_metrics().unwrap();
//! PREDICTIONS_TOTAL.with_label_values(&["single", "ok"]).inc();
//! ```

mod middleware;

pub use middleware::track_metrics;

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry,
};

const NAMESPACE: &str = "churn_bank";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Labels: method, path, status_code
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests")
            .namespace(NAMESPACE),
        &["method", "path", "status_code"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    // ============================================================================
    // Inference Metrics
    // ============================================================================

    /// Labels: mode (single/batch), outcome (ok/error)
    pub static ref PREDICTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("predictions_total", "Total number of prediction requests")
            .namespace(NAMESPACE),
        &["mode", "outcome"]
    ).expect("Failed to create PREDICTIONS_TOTAL metric");

    /// Labels: mode
    pub static ref PREDICTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "prediction_duration_seconds",
            "Time spent scoring a request, explanations included"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0]),
        &["mode"]
    ).expect("Failed to create PREDICTION_DURATION_SECONDS metric");

    /// Distribution of predicted churn probabilities
    pub static ref CHURN_PROBABILITY: Histogram = Histogram::with_opts(
        HistogramOpts::new("churn_probability", "Predicted churn probability")
            .namespace(NAMESPACE)
            .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0])
    ).expect("Failed to create CHURN_PROBABILITY metric");

    pub static ref BATCH_ROWS_SCORED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("batch_rows_scored_total", "Rows scored through batch uploads")
            .namespace(NAMESPACE)
    ).expect("Failed to create BATCH_ROWS_SCORED_TOTAL metric");

    /// Labels: reason (missing_columns, null_values, invalid_values, empty, too_many_rows)
    pub static ref BATCH_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("batch_rejections_total", "Batch uploads rejected before scoring")
            .namespace(NAMESPACE),
        &["reason"]
    ).expect("Failed to create BATCH_REJECTIONS_TOTAL metric");

    pub static ref EXPLANATION_FAILURES_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new(
            "explanation_failures_total",
            "Predictions served without local attributions"
        )
        .namespace(NAMESPACE)
    ).expect("Failed to create EXPLANATION_FAILURES_TOTAL metric");

    /// 1 while a verified artifact bundle is loaded
    pub static ref MODEL_LOADED: IntGauge = IntGauge::with_opts(
        Opts::new("model_loaded", "Whether a model bundle is loaded")
            .namespace(NAMESPACE)
    ).expect("Failed to create MODEL_LOADED metric");

    // ============================================================================
    // Error Metrics
    // ============================================================================

    /// Labels: component, error_type
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("errors_total", "Total number of errors")
            .namespace(NAMESPACE),
        &["component", "error_type"]
    ).expect("Failed to create ERRORS_TOTAL metric");
}

fn register<C>(collector: C) -> Result<(), prometheus::Error>
where
    C: prometheus::core::Collector + 'static,
{
    match PROMETHEUS_REGISTRY.register(Box::new(collector)) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; already registered metrics are skipped.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    register(HTTP_REQUESTS_TOTAL.clone())?;
    register(HTTP_REQUEST_DURATION_SECONDS.clone())?;

    register(PREDICTIONS_TOTAL.clone())?;
    register(PREDICTION_DURATION_SECONDS.clone())?;
    register(CHURN_PROBABILITY.clone())?;
    register(BATCH_ROWS_SCORED_TOTAL.clone())?;
    register(BATCH_REJECTIONS_TOTAL.clone())?;
    register(EXPLANATION_FAILURES_TOTAL.clone())?;
    register(MODEL_LOADED.clone())?;

    register(ERRORS_TOTAL.clone())?;

    tracing::debug!("Prometheus metrics registered");
    Ok(())
}

/// Generate Prometheus text format metrics
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
