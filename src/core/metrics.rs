//! Prometheus metrics for monitoring the orchestrator.
//!
//! This module provides a centralized metrics registry tracking HTTP traffic,
//! backend dispatches, per-service load and conversation store failures.

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, GaugeVec, HistogramVec,
    IntCounterVec,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of HTTP requests by method, endpoint and status
    pub request_count: IntCounterVec,

    /// HTTP request duration histogram in seconds
    pub request_duration: HistogramVec,

    /// Dispatches by service and outcome (success, error, timeout, no_service)
    pub dispatch_count: IntCounterVec,

    /// Backend dispatch latency in seconds
    pub dispatch_duration: HistogramVec,

    /// In-flight dispatches per service
    pub in_flight_requests: GaugeVec,

    /// Service health status (1=healthy, 0=unhealthy)
    pub service_health: GaugeVec,

    /// Conversation store failures by operation
    pub conversation_store_errors: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// Safe to call more than once; later calls return the same instance.
///
/// # Examples
///
/// ```no_run
/// use bot_orchestrator::core::metrics::init_metrics;
///
/// let metrics = init_metrics();
/// metrics.dispatch_count.with_label_values(&["echo", "success"]).inc();
/// ```
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "orchestrator_http_requests_total",
            "Total number of HTTP requests",
            &["method", "endpoint", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "orchestrator_http_request_duration_seconds",
            "HTTP request duration in seconds",
            &["method", "endpoint"],
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
        )
        .expect("Failed to register request_duration metric");

        let dispatch_count = register_int_counter_vec!(
            "orchestrator_dispatch_total",
            "Total number of query dispatches by outcome",
            &["service", "outcome"]
        )
        .expect("Failed to register dispatch_count metric");

        let dispatch_duration = register_histogram_vec!(
            "orchestrator_dispatch_duration_seconds",
            "Backend dispatch latency in seconds",
            &["service"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
        )
        .expect("Failed to register dispatch_duration metric");

        let in_flight_requests = register_gauge_vec!(
            "orchestrator_in_flight_requests",
            "Number of in-flight dispatches per service",
            &["service"]
        )
        .expect("Failed to register in_flight_requests metric");

        let service_health = register_gauge_vec!(
            "orchestrator_service_health",
            "Service health status (1=healthy, 0=unhealthy)",
            &["service"]
        )
        .expect("Failed to register service_health metric");

        let conversation_store_errors = register_int_counter_vec!(
            "orchestrator_conversation_store_errors_total",
            "Conversation store failures by operation",
            &["operation"]
        )
        .expect("Failed to register conversation_store_errors metric");

        Metrics {
            request_count,
            request_duration,
            dispatch_count,
            dispatch_duration,
            in_flight_requests,
            service_health,
            conversation_store_errors,
        }
    })
}

/// Get the global metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}
