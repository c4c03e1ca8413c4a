//! In-memory usage metrics.
//!
//! Link metrics are named `link.<link_id>.<name>` or `link.<name>:<link_id>`.
//! The registry's metrics GC relies on that convention to find series that
//! outlived their link.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

pub const LINK_METRIC_PREFIX: &str = "link.";

/// What the link registry needs from a metrics backend.
pub trait MetricsRegistry: Send + Sync {
    fn names(&self) -> Vec<String>;
    fn dispose(&self, name: &str);
}

/// Extract the link id from a link metric name.
pub fn link_id_of_metric(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(LINK_METRIC_PREFIX)?;
    let id = match rest.rsplit_once(':') {
        Some((_, id)) => id,
        None => rest.split('.').next()?,
    };
    (!id.is_empty()).then_some(id)
}

pub fn link_metric_name(link_id: &str, name: &str) -> String {
    format!("{LINK_METRIC_PREFIX}{link_id}.{name}")
}

#[derive(Debug, Default)]
pub struct Meter {
    count: AtomicU64,
}

impl Meter {
    pub fn mark(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: i64,
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Default)]
pub struct Histogram {
    state: Mutex<HistogramSnapshot>,
}

impl Histogram {
    pub fn update(&self, value: i64) {
        let mut s = self.state.lock();
        if s.count == 0 {
            s.min = value;
            s.max = value;
        } else {
            s.min = s.min.min(value);
            s.max = s.max.max(value);
        }
        s.count += 1;
        s.sum = s.sum.saturating_add(value);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        *self.state.lock()
    }
}

#[derive(Debug, Clone)]
pub enum Metric {
    Meter(Arc<Meter>),
    Histogram(Arc<Histogram>),
}

/// Named meters and histograms. Lookups create on first use.
#[derive(Debug, Default)]
pub struct UsageRegistry {
    metrics: DashMap<String, Metric>,
}

impl UsageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meter(&self, name: &str) -> Arc<Meter> {
        let mut entry = self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Metric::Meter(Arc::default()));
        if let Metric::Meter(m) = entry.value() {
            return m.clone();
        }
        let meter: Arc<Meter> = Arc::default();
        *entry.value_mut() = Metric::Meter(meter.clone());
        meter
    }

    pub fn histogram(&self, name: &str) -> Arc<Histogram> {
        let mut entry = self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Metric::Histogram(Arc::default()));
        if let Metric::Histogram(h) = entry.value() {
            return h.clone();
        }
        let hist: Arc<Histogram> = Arc::default();
        *entry.value_mut() = Metric::Histogram(hist.clone());
        hist
    }

    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics.get(name).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl MetricsRegistry for UsageRegistry {
    fn names(&self) -> Vec<String> {
        self.metrics.iter().map(|e| e.key().clone()).collect()
    }

    fn dispose(&self, name: &str) {
        if self.metrics.remove(name).is_some() {
            tracing::debug!(metric = name, "metric disposed");
        }
    }
}
