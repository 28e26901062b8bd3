use axum::http::{Method, StatusCode};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::time::Instant;

lazy_static! {
    // Request metrics
    pub static ref REQUEST_COUNTER: IntCounterVec = register_int_counter_vec!(
        "mohawk_requests_total",
        "Requests served by method and response status",
        &["method", "status"]
    ).unwrap();

    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "mohawk_request_duration_seconds",
        "Request duration in seconds by method",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // Storage metrics
    pub static ref STORAGE_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "mohawk_storage_operations_total",
        "Total number of storage operations by kind",
        &["operation"]
    ).unwrap();

    // Alert metrics
    pub static ref ALERT_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "mohawk_alert_transitions_total",
        "Alert state transitions by target state",
        &["state"]
    ).unwrap();
}

/// Started when a request enters the pipeline; `finish` counts it once the
/// response status is known.
pub struct RequestTimer {
    method: Method,
    started: Instant,
}

impl RequestTimer {
    pub fn start(method: &Method) -> Self {
        Self {
            method: method.clone(),
            started: Instant::now(),
        }
    }

    pub fn finish(self, status: StatusCode) {
        let method = self.method.as_str();
        REQUEST_COUNTER
            .with_label_values(&[method, status.as_str()])
            .inc();
        REQUEST_DURATION
            .with_label_values(&[method])
            .observe(self.started.elapsed().as_secs_f64());
    }
}

pub fn record_storage_operation(operation: &str) {
    STORAGE_OPERATIONS.with_label_values(&[operation]).inc();
}

pub fn record_alert_transition(state: &str) {
    ALERT_TRANSITIONS.with_label_values(&[state]).inc();
}

/// Renders the default registry in the Prometheus text format.
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
