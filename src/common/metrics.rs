//! Volume server metrics
//!
//! Gauges keyed by `(collection, type)` rendered in Prometheus text format.
//! The `volume` gauge tracks how many volumes of a collection currently hold
//! an open data file.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    volume_counters: Mutex<BTreeMap<(String, String), Arc<Gauge>>>,

    /// Start time for uptime calculation
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            volume_counters: Mutex::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Get or create the gauge for a collection and volume type
    pub fn volume_counter(&self, collection: &str, kind: &str) -> Arc<Gauge> {
        let mut counters = self.volume_counters.lock();
        counters
            .entry((collection.to_string(), kind.to_string()))
            .or_insert_with(|| Arc::new(Gauge::new()))
            .clone()
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        out.push_str("# HELP needlestore_volumes Number of volumes or shards\n");
        out.push_str("# TYPE needlestore_volumes gauge\n");
        for ((collection, kind), gauge) in self.volume_counters.lock().iter() {
            let _ = writeln!(
                out,
                "needlestore_volumes{{collection=\"{}\",type=\"{}\"}} {}",
                collection,
                kind,
                gauge.get()
            );
        }

        out.push_str("# HELP needlestore_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE needlestore_uptime_seconds gauge\n");
        let _ = writeln!(out, "needlestore_uptime_seconds {}", self.uptime_seconds());

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();

        assert_eq!(gauge.get(), 0);
        gauge.set(10);
        assert_eq!(gauge.get(), 10);
        gauge.inc();
        assert_eq!(gauge.get(), 11);
        gauge.dec();
        assert_eq!(gauge.get(), 10);
    }

    #[test]
    fn test_volume_counter_is_shared_per_label() {
        let registry = MetricsRegistry::new();

        registry.volume_counter("pics", "volume").inc();
        registry.volume_counter("pics", "volume").inc();
        registry.volume_counter("docs", "volume").inc();

        assert_eq!(registry.volume_counter("pics", "volume").get(), 2);
        assert_eq!(registry.volume_counter("docs", "volume").get(), 1);
        assert_eq!(registry.volume_counter("docs", "ec_shards").get(), 0);
    }

    #[test]
    fn test_prometheus_output() {
        let registry = MetricsRegistry::new();
        registry.volume_counter("pics", "volume").inc();

        let out = registry.to_prometheus();
        assert!(out.contains("# TYPE needlestore_volumes gauge"));
        assert!(out.contains("needlestore_volumes{collection=\"pics\",type=\"volume\"} 1"));
        assert!(out.contains("needlestore_uptime_seconds"));
    }
}
