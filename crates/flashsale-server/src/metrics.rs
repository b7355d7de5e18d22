//! Metrics for the cache engine and the flash-sale pipeline.
//!
//! Counters go through the `metrics` facade; they are no-ops until a
//! recorder is installed with [`init_metrics`].

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_REBUILDS_TOTAL: &str = "cache_rebuilds_total";
    pub const CACHE_STORE_ERRORS_TOTAL: &str = "cache_store_errors_total";

    // Flash-sale metrics
    pub const SECKILL_ADMISSIONS_TOTAL: &str = "seckill_admissions_total";
    pub const SECKILL_ORDERS_TOTAL: &str = "seckill_orders_total";
    pub const SECKILL_QUEUE_DEPTH: &str = "seckill_queue_depth";
}

/// Install the Prometheus recorder.
///
/// With `listen` set, the exporter also serves the text format over HTTP on
/// that address; the listener task runs on the current tokio runtime.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics(listen: Option<SocketAddr>) -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    let handle = match listen {
        None => match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install Prometheus recorder");
                return false;
            }
        },
        Some(addr) => match PrometheusBuilder::new().with_http_listener(addr).build() {
            Ok((recorder, exporter)) => {
                let handle = recorder.handle();
                if let Err(e) = metrics::set_global_recorder(recorder) {
                    tracing::error!(error = %e, "Failed to install Prometheus recorder");
                    return false;
                }
                tokio::spawn(async move {
                    if let Err(e) = exporter.await {
                        tracing::error!(error = ?e, "Prometheus listener stopped");
                    }
                });
                tracing::info!(listen = %addr, "Prometheus listener started");
                handle
            }
            Err(e) => {
                tracing::error!(error = %e, listen = %addr, "Failed to start Prometheus listener");
                return false;
            }
        },
    };

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
        return false;
    }
    tracing::info!("Prometheus metrics initialized");
    true
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// `kind` is `value`, `absent` or `stale`.
pub fn record_cache_hit(entity: &str, kind: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "entity" => entity.to_string(), "kind" => kind).increment(1);
}

pub fn record_cache_miss(entity: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "entity" => entity.to_string()).increment(1);
}

/// `outcome` is `ok`, `absent`, `failed` or `skipped`.
pub fn record_cache_rebuild(entity: &str, outcome: &'static str) {
    counter!(names::CACHE_REBUILDS_TOTAL, "entity" => entity.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_cache_store_error(op: &'static str) {
    counter!(names::CACHE_STORE_ERRORS_TOTAL, "op" => op).increment(1);
}

pub fn record_admission(outcome: &'static str) {
    counter!(names::SECKILL_ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_order(outcome: &'static str) {
    counter!(names::SECKILL_ORDERS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn set_queue_depth(depth: usize) {
    gauge!(names::SECKILL_QUEUE_DEPTH).set(depth as f64);
}
