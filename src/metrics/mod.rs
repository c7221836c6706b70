//! In-process metrics for the analytics service
//!
//! Counters, gauges and latency histograms, exported as JSON or in the
//! Prometheus text format at `GET /metrics`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Service-wide metrics registry
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    pub async fn add_counter(&self, name: &str, value: u64) {
        let counters = self.counters.read().await;
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        let mut counters = self.counters.write().await;
        counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub async fn set_gauge(&self, name: &str, value: u64) {
        let gauges = self.gauges.read().await;
        if let Some(gauge) = gauges.get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        let mut gauges = self.gauges.write().await;
        gauges
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .store(value, Ordering::Relaxed);
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        let counters = self.counters.read().await;
        counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn get_gauge(&self, name: &str) -> u64 {
        let gauges = self.gauges.read().await;
        gauges
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn observe_histogram(&self, name: &str, value: f64) {
        let histograms = self.histograms.read().await;
        if let Some(histogram) = histograms.get(name) {
            histogram.observe(value);
            return;
        }
        drop(histograms);

        let mut histograms = self.histograms.write().await;
        histograms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::default()))
            .observe(value);
    }

    /// Count an authentication rejection under its reason label.
    pub async fn record_auth_rejection(&self, reason: &str) {
        self.inc_counter(metric_names::AUTH_REJECTED).await;
        self.inc_counter(&format!("{}.{reason}", metric_names::AUTH_REJECTED))
            .await;
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        let counter_values: BTreeMap<&str, u64> = counters
            .iter()
            .map(|(k, v)| (k.as_str(), v.load(Ordering::Relaxed)))
            .collect();
        let gauge_values: BTreeMap<&str, u64> = gauges
            .iter()
            .map(|(k, v)| (k.as_str(), v.load(Ordering::Relaxed)))
            .collect();
        let histogram_values: BTreeMap<&str, serde_json::Value> = histograms
            .iter()
            .map(|(k, h)| (k.as_str(), h.to_json()))
            .collect();

        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "counters": counter_values,
            "gauges": gauge_values,
            "histograms": histogram_values,
        })
    }

    pub async fn to_prometheus(&self) -> String {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        let mut output = String::new();
        output.push_str("# HELP analytics_uptime_seconds Time since service start\n");
        output.push_str("# TYPE analytics_uptime_seconds gauge\n");
        output.push_str(&format!("analytics_uptime_seconds {}\n\n", self.uptime_seconds()));

        for (name, counter) in counters.iter() {
            let name = prometheus_name(name);
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name} {}\n", counter.load(Ordering::Relaxed)));
        }
        for (name, gauge) in gauges.iter() {
            let name = prometheus_name(name);
            output.push_str(&format!("# TYPE {name} gauge\n"));
            output.push_str(&format!("{name} {}\n", gauge.load(Ordering::Relaxed)));
        }
        for (name, histogram) in histograms.iter() {
            output.push_str(&histogram.to_prometheus(name));
        }
        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

/// Fixed-bucket histogram; the sum is kept in microseconds.
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.sum_micros
            .fetch_add((value.max(0.0) * 1_000_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        if let Some(i) = self.buckets.iter().position(|b| value <= *b) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn to_json(&self) -> serde_json::Value {
        let counts: Vec<u64> = self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        serde_json::json!({
            "buckets": self.buckets,
            "counts": counts,
            "sum": self.sum(),
            "count": self.count.load(Ordering::Relaxed),
        })
    }

    pub fn to_prometheus(&self, name: &str) -> String {
        let name = prometheus_name(name);
        let mut output = format!("# TYPE {name} histogram\n");
        let mut cumulative = 0u64;
        for (bucket, count) in self.buckets.iter().zip(&self.counts) {
            cumulative += count.load(Ordering::Relaxed);
            output.push_str(&format!("{name}_bucket{{le=\"{bucket}\"}} {cumulative}\n"));
        }
        let total = self.count.load(Ordering::Relaxed);
        output.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {total}\n"));
        output.push_str(&format!("{name}_sum {}\n", self.sum()));
        output.push_str(&format!("{name}_count {total}\n"));
        output
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Latency buckets in seconds
        Self::new(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ])
    }
}

/// Predefined metric names
pub mod metric_names {
    // Ingestion
    pub const VISITS_TRACKED: &str = "analytics.visits.tracked";
    pub const UNIQUE_VISITS: &str = "analytics.visits.unique";
    pub const TRACK_FAILURES: &str = "analytics.visits.failed";
    pub const TRACK_LATENCY: &str = "analytics.track.latency_seconds";

    // Reads
    pub const STATS_SERVED: &str = "analytics.stats.served";

    // Pairing
    pub const PAIRINGS_INITIATED: &str = "analytics.pairing.initiated";
    pub const PAIRINGS_COMPLETED: &str = "analytics.pairing.completed";
    pub const PENDING_CHALLENGES: &str = "analytics.pairing.pending";

    // Authentication; per-reason counters are suffixed with the reason
    pub const AUTH_REJECTED: &str = "analytics.auth.rejected";

    // Storage
    pub const OPEN_PARTITIONS: &str = "analytics.partitions.open";
}

/// Time an async operation into a histogram.
pub async fn timed<F, T>(metrics: &MetricsRegistry, metric_name: &str, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f.await;
    metrics
        .observe_histogram(metric_name, start.elapsed().as_secs_f64())
        .await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter() {
        let registry = MetricsRegistry::new();

        registry.inc_counter(metric_names::VISITS_TRACKED).await;
        registry.inc_counter(metric_names::VISITS_TRACKED).await;
        registry.add_counter(metric_names::VISITS_TRACKED, 5).await;

        assert_eq!(registry.get_counter(metric_names::VISITS_TRACKED).await, 7);
        assert_eq!(registry.get_counter("never.touched").await, 0);
    }

    #[tokio::test]
    async fn test_auth_rejections_by_reason() {
        let registry = MetricsRegistry::new();
        registry.record_auth_rejection("replay").await;
        registry.record_auth_rejection("replay").await;
        registry.record_auth_rejection("missing_auth").await;

        assert_eq!(registry.get_counter(metric_names::AUTH_REJECTED).await, 3);
        assert_eq!(registry.get_counter("analytics.auth.rejected.replay").await, 2);
    }

    #[tokio::test]
    async fn test_gauge_and_histogram_json() {
        let registry = MetricsRegistry::new();
        registry.set_gauge(metric_names::PENDING_CHALLENGES, 4).await;
        registry.set_gauge(metric_names::PENDING_CHALLENGES, 2).await;
        let value = timed(&registry, metric_names::TRACK_LATENCY, async { 5 }).await;
        assert_eq!(value, 5);

        let json = registry.to_json().await;
        assert_eq!(json["gauges"]["analytics.pairing.pending"], 2);
        assert_eq!(json["histograms"]["analytics.track.latency_seconds"]["count"], 1);
    }

    #[tokio::test]
    async fn test_prometheus_format() {
        let registry = MetricsRegistry::new();
        registry.inc_counter(metric_names::PAIRINGS_COMPLETED).await;
        registry.observe_histogram(metric_names::TRACK_LATENCY, 0.003).await;

        let text = registry.to_prometheus().await;
        assert!(text.contains("analytics_pairing_completed 1"));
        assert!(text.contains("analytics_track_latency_seconds_bucket{le=\"0.005\"} 1"));
        assert!(text.contains("analytics_track_latency_seconds_count 1"));
    }
}
