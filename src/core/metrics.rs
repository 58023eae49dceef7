use std::sync::OnceLock;

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::TelemetrySettings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(telemetry: &TelemetrySettings) -> anyhow::Result<()> {
    if !telemetry.prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    describe_counter!("evaluation_jobs_claimed_total", "Jobs moved into processing by a claim");
    describe_counter!(
        "evaluation_jobs_total",
        "Committed job outcomes by status (done, requeued, exhausted, stale)"
    );
    describe_counter!("evaluation_failures_total", "Failed evaluation attempts by error kind");
    describe_counter!(
        "evaluation_leases_expired_total",
        "Expired leases terminally failed by the sweep"
    );
    describe_counter!("evaluation_store_errors_total", "Job store round trips that failed");
    describe_counter!("evaluation_jobs_enqueued_total", "Jobs created through the API");
    describe_histogram!(
        "evaluation_duration_seconds",
        Unit::Seconds,
        "Wall time of one evaluator call"
    );
    describe_histogram!(
        "evaluation_queue_latency_seconds",
        Unit::Seconds,
        "Time between job creation and its claim"
    );
}
