//! Prometheus metrics for the server and the coordination core.
//!
//! The core records through the `metrics` facade; this module installs the
//! Prometheus recorder those calls land in and renders it for `/metrics`.

use std::collections::BTreeMap;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    // Job registry
    describe_counter!(
        "toolbox_jobs_registered_total",
        "Jobs registered, by operation"
    );
    describe_counter!(
        "toolbox_jobs_busy_total",
        "Registrations rejected because a job was already running under the key"
    );
    describe_counter!(
        "toolbox_jobs_cancelled_total",
        "Jobs cancelled, by operation"
    );
    describe_gauge!(
        "toolbox_jobs_running",
        "Jobs in the registry at scrape time, by operation"
    );

    // Notification bus
    describe_counter!(
        "toolbox_notice_sent_total",
        "Notice deliveries, by result"
    );
    describe_gauge!(
        "toolbox_notice_online_users",
        "Users with an entry on the notification bus"
    );

    // Transfers
    describe_counter!("toolbox_transfers_total", "Finished transfers, by result");
    describe_histogram!(
        "toolbox_transfer_duration_seconds",
        "Duration of transfer jobs in seconds"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Publish the registry's per-operation job counts.
pub fn record_running_jobs(counts: &BTreeMap<String, usize>) {
    for (op, running) in counts {
        gauge!("toolbox_jobs_running", "op" => op.clone()).set(*running as f64);
    }
}

/// Record a finished transfer job.
///
/// * `result` - "ok", "cancelled" or "failed"
pub fn record_transfer(result: &'static str, bytes: u64, duration: Duration) {
    counter!("toolbox_transfers_total", "result" => result).increment(1);
    histogram!("toolbox_transfer_duration_seconds").record(duration.as_secs_f64());

    tracing::info!(
        result,
        bytes,
        duration_secs = duration.as_secs_f64(),
        "Transfer finished"
    );
}
