use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("node_request_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()
}

#[derive(Clone)]
pub struct Metrics {
    pub prometheus_handle: PrometheusHandle,
}

impl Metrics {
    pub fn new(prometheus_handle: PrometheusHandle) -> Self {
        Self { prometheus_handle }
    }

    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

/// Records one request to the node, labelled by client operation.
/// Transport failures are counted separately from non-2xx responses, which
/// still count as completed requests here.
pub fn record_node_request(operation: &'static str, duration: Duration, completed: bool) {
    metrics::increment_counter!("node_requests_total", "operation" => operation);
    metrics::histogram!(
        "node_request_duration_seconds",
        duration.as_secs_f64(),
        "operation" => operation
    );
    if !completed {
        metrics::increment_counter!("node_request_failures_total", "operation" => operation);
    }
}

pub fn record_cache_hit(key: &str) {
    metrics::increment_counter!("cache_hits_total", "key" => key.to_string());
}

pub fn record_cache_miss(key: &str) {
    metrics::increment_counter!("cache_misses_total", "key" => key.to_string());
}

/// A request joined a fetch that was already in flight for the same key.
pub fn record_cache_dedup_join(key: &str) {
    metrics::increment_counter!("cache_dedup_joins_total", "key" => key.to_string());
}

pub fn record_mining_job_started() {
    metrics::increment_counter!("mining_jobs_started_total");
}

pub fn record_mining_job_finished(succeeded: bool) {
    if succeeded {
        metrics::increment_counter!("mining_jobs_succeeded_total");
    } else {
        metrics::increment_counter!("mining_jobs_failed_total");
    }
}

pub fn record_mining_status_poll() {
    metrics::increment_counter!("mining_status_polls_total");
}
