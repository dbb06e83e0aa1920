//! Prometheus metrics for azblob-failover.
//!
//! The library records through the `metrics` facade only. The binary
//! installs a global Prometheus recorder with `metrics-exporter-prometheus`
//! and can render it on exit. Without an installed recorder every call here
//! is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total service operations (counter). Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "azblob_operations_total";

/// Service operation duration in seconds (histogram). Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "azblob_operation_duration_seconds";

/// Times the secondary credential was tried (counter). Labels: operation.
pub const CREDENTIAL_FALLBACKS_TOTAL: &str = "azblob_credential_fallbacks_total";

/// Distinct keys per batch (histogram). Labels: operation.
pub const BATCH_KEYS: &str = "azblob_batch_keys";

/// Total bytes uploaded (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "azblob_bytes_uploaded_total";

/// Total bytes downloaded (counter).
pub const BYTES_DOWNLOADED_TOTAL: &str = "azblob_bytes_downloaded_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(OPERATIONS_TOTAL, "Total blob storage operations");
    describe_histogram!(
        OPERATION_DURATION_SECONDS,
        "Blob storage operation duration in seconds"
    );
    describe_counter!(
        CREDENTIAL_FALLBACKS_TOTAL,
        "Operations retried with the secondary credential"
    );
    describe_histogram!(BATCH_KEYS, "Distinct keys per batch operation");
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total bytes uploaded");
    describe_counter!(BYTES_DOWNLOADED_TOTAL, "Total bytes downloaded");
}

/// Render the current Prometheus exposition text, if a recorder is installed.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// -- Recording helpers --------------------------------------------------------

/// Measures one service operation from creation until `finish()`.
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    /// Record the outcome and duration, passing `result` through.
    pub fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        let status = if result.is_ok() { "ok" } else { "error" };
        record_operation(self.operation, status, self.start.elapsed().as_secs_f64());
        result
    }
}

pub fn record_operation(operation: &'static str, status: &'static str, seconds: f64) {
    counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
    histogram!(OPERATION_DURATION_SECONDS, "operation" => operation).record(seconds);
}

pub fn record_credential_fallback(operation: &'static str) {
    counter!(CREDENTIAL_FALLBACKS_TOTAL, "operation" => operation).increment(1);
}

pub fn record_batch(operation: &'static str, keys: usize) {
    histogram!(BATCH_KEYS, "operation" => operation).record(keys as f64);
}

pub fn record_bytes_uploaded(bytes: usize) {
    counter!(BYTES_UPLOADED_TOTAL).increment(bytes as u64);
}

pub fn record_bytes_downloaded(bytes: usize) {
    counter!(BYTES_DOWNLOADED_TOTAL).increment(bytes as u64);
}

// -- Tests --------------------------------------------------------------------
