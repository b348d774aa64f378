//! Prometheus metrics module

use crate::error::SessiaError;
use crate::shard::Snapshot;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Sessia metrics collector
///
/// Recording goes through the global `metrics` facade, so a detached
/// collector (no exporter installed) records into the no-op recorder.
#[derive(Clone, Default)]
pub struct SessiaMetrics {
    handle: Option<Arc<PrometheusHandle>>,
}

impl SessiaMetrics {
    /// Install the Prometheus recorder and return a handle that can render it
    pub fn install() -> Result<Self, SessiaError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| SessiaError::Metrics(e.to_string()))?;

        Self::register_metrics();

        Ok(Self {
            handle: Some(Arc::new(handle)),
        })
    }

    /// Collector without an exporter
    pub fn detached() -> Self {
        Self::default()
    }

    /// Register metric descriptions
    fn register_metrics() {
        describe_counter!(
            "sessia_sessions_saved_total",
            Unit::Count,
            "Session records written, by shard identity"
        );
        describe_counter!(
            "sessia_session_queries_total",
            Unit::Count,
            "Session lookups, by outcome"
        );
        describe_counter!(
            "sessia_errors_total",
            Unit::Count,
            "Errors, by error type"
        );
        describe_counter!(
            "sessia_refresh_total",
            Unit::Count,
            "Directory refresh cycles, by outcome"
        );

        describe_histogram!(
            "sessia_refresh_duration_seconds",
            Unit::Seconds,
            "Time to resolve the directory and publish a snapshot"
        );

        describe_gauge!(
            "sessia_shards_known",
            Unit::Count,
            "Shards in the current snapshot"
        );
        describe_gauge!(
            "sessia_shard_memory_bytes",
            Unit::Bytes,
            "Memory reported by each shard at the last refresh"
        );
    }

    /// Record a session written to a shard
    pub fn record_save(&self, identity: &str) {
        counter!(
            "sessia_sessions_saved_total",
            "shard" => identity.to_string()
        )
        .increment(1);
    }

    /// Record a session lookup outcome ("hit", "miss", "error")
    pub fn record_query(&self, outcome: &'static str) {
        counter!("sessia_session_queries_total", "outcome" => outcome).increment(1);
    }

    /// Record an error by type label
    pub fn record_error(&self, err: &SessiaError) {
        counter!(
            "sessia_errors_total",
            "error_type" => err.error_type_label()
        )
        .increment(1);
    }

    /// Record a completed refresh and the fleet it published
    pub fn record_refresh(&self, duration: Duration, snapshot: &Snapshot) {
        counter!("sessia_refresh_total", "outcome" => "published").increment(1);
        histogram!("sessia_refresh_duration_seconds").record(duration.as_secs_f64());
        gauge!("sessia_shards_known").set(snapshot.len() as f64);
        for instance in snapshot.instances() {
            gauge!(
                "sessia_shard_memory_bytes",
                "shard" => instance.identity.clone()
            )
            .set(instance.memory_used as f64);
        }
    }

    /// Zero the memory series of shards that left the fleet
    pub fn record_departed(&self, identities: &[&str]) {
        for identity in identities {
            gauge!(
                "sessia_shard_memory_bytes",
                "shard" => identity.to_string()
            )
            .set(0.0);
        }
    }

    /// Record an aborted refresh
    pub fn record_refresh_failure(&self, err: &SessiaError) {
        counter!("sessia_refresh_total", "outcome" => "failed").increment(1);
        self.record_error(err);
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(|handle| handle.render())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_renders_empty() {
        let metrics = SessiaMetrics::detached();
        metrics.record_save("9c1a2b3d4e5f");
        metrics.record_query("hit");
        assert!(metrics.render().is_empty());
    }
}
