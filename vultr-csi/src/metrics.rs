//! Prometheus metrics for the CSI driver
//!
//! Provides metrics for monitoring CSI operations, provider polling
//! and per-volume lock contention.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tonic::Status;
use tracing::info;

/// Metric names
pub mod names {
    /// Counter: Total number of CSI operations by type and status
    pub const CSI_OPERATIONS_TOTAL: &str = "csi_operations_total";
    /// Histogram: Duration of CSI operations in seconds
    pub const CSI_OPERATION_DURATION_SECONDS: &str = "csi_operation_duration_seconds";
    /// Counter: Reads of an in-progress provider operation
    pub const CSI_POLL_ATTEMPTS_TOTAL: &str = "csi_poll_attempts_total";
    /// Counter: Requests rejected because the volume was busy
    pub const CSI_LOCK_CONTENTION_TOTAL: &str = "csi_lock_contention_total";
}

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP server on the specified address that serves metrics
/// at the `/metrics` endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on http://{}/metrics", addr);
    Ok(())
}

/// Record a CSI operation with its result
pub fn record_operation(operation: &str, status: &str, duration_secs: f64) {
    counter!(names::CSI_OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::CSI_OPERATION_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration_secs);
}

/// Record one read of an in-progress provider operation
pub fn record_poll_attempt(operation: &str) {
    counter!(names::CSI_POLL_ATTEMPTS_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// Record a request rejected because another operation held the volume
pub fn record_lock_contention(operation: &str) {
    counter!(names::CSI_LOCK_CONTENTION_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// Helper for timing operations
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    /// Complete the operation with success
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, "success", duration);
    }

    /// Complete the operation with failure
    pub fn failure(self, error_code: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, error_code, duration);
    }

    /// Complete the operation with the outcome of `result`, passing it through
    pub fn finish<T>(self, result: Result<T, Status>) -> Result<T, Status> {
        match &result {
            Ok(_) => self.success(),
            Err(status) => self.failure(&format!("{:?}", status.code())),
        }
        result
    }
}
