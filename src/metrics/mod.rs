//! Engine metrics
//!
//! Counters, duration histograms and gauges recorded by the processor and
//! scheduler. `InMemoryMetrics` keeps them in concurrent maps and exposes a
//! serializable snapshot for the admin API.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const ITEMS_PROCESSED: &str = "queue.items.processed";
pub const ITEM_DURATION_MS: &str = "queue.item.duration_ms";
pub const RETRIES: &str = "queue.retries";
pub const WORKERS_IN_FLIGHT: &str = "queue.workers.in_flight";

pub type Labels<'a> = &'a [(&'a str, &'a str)];

pub trait MetricsSink: Send + Sync {
    fn increment_counter(&self, name: &str, labels: Labels<'_>);

    fn record_duration(&self, name: &str, duration: Duration, labels: Labels<'_>);

    fn set_gauge(&self, name: &str, value: f64);
}

/// Summary of a duration histogram
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DurationSummary {
    pub count: u64,
    pub sum_ms: f64,
    pub max_ms: f64,
}

impl DurationSummary {
    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub durations: BTreeMap<String, DurationSummary>,
    pub gauges: BTreeMap<String, f64>,
}

#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<String, u64>,
    durations: DashMap<String, DurationSummary>,
    gauges: DashMap<String, f64>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str, labels: Labels<'_>) -> u64 {
        self.counters
            .get(&series_key(name, labels))
            .map(|v| *v)
            .unwrap_or(0)
    }

    pub fn duration(&self, name: &str, labels: Labels<'_>) -> DurationSummary {
        self.durations
            .get(&series_key(name, labels))
            .map(|v| *v)
            .unwrap_or_default()
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|v| *v)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            durations: self
                .durations
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment_counter(&self, name: &str, labels: Labels<'_>) {
        *self.counters.entry(series_key(name, labels)).or_insert(0) += 1;
    }

    fn record_duration(&self, name: &str, duration: Duration, labels: Labels<'_>) {
        let ms = duration.as_secs_f64() * 1000.0;
        let mut entry = self.durations.entry(series_key(name, labels)).or_default();
        entry.count += 1;
        entry.sum_ms += ms;
        entry.max_ms = entry.max_ms.max(ms);
    }

    fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);
    }
}

/// `name{k=v,k=v}` with labels sorted so call-site order does not matter
fn series_key(name: &str, labels: Labels<'_>) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort_unstable();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}
