//! Process-local namespace of primitives.
//!
//! A [`Registry`] is an ordinary value: collectors register into the one they
//! are handed, so independent registries never see each other's metrics.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{MetricsError, Result};
use crate::labels::LabelSpace;
use crate::primitives::{Counter, Gauge, Histogram};
use crate::snapshot::{MetricFamily, ProcessState};

#[derive(Debug, Clone)]
enum Metric {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
}

impl Metric {
    fn snapshot(&self) -> MetricFamily {
        match self {
            Metric::Counter(c) => c.snapshot(),
            Metric::Gauge(g) => g.snapshot(),
            Metric::Histogram(h) => h.snapshot(),
        }
    }
}

#[derive(Debug)]
pub struct Registry {
    process_id: u32,
    metrics: RwLock<BTreeMap<String, Metric>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry identified by the current OS process id.
    pub fn new() -> Self {
        Self::with_process_id(std::process::id())
    }

    pub fn with_process_id(process_id: u32) -> Self {
        Self {
            process_id,
            metrics: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn register_counter(&self, name: &str, help: &str, labels: LabelSpace) -> Result<Arc<Counter>> {
        let counter = Arc::new(Counter::new(name, help, labels));
        self.insert(name, Metric::Counter(Arc::clone(&counter)))?;
        Ok(counter)
    }

    pub fn register_gauge(&self, name: &str, help: &str, labels: LabelSpace) -> Result<Arc<Gauge>> {
        let gauge = Arc::new(Gauge::new(name, help, labels));
        self.insert(name, Metric::Gauge(Arc::clone(&gauge)))?;
        Ok(gauge)
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        labels: LabelSpace,
        buckets: Vec<f64>,
    ) -> Result<Arc<Histogram>> {
        let histogram = Arc::new(Histogram::new(name, help, labels, buckets)?);
        self.insert(name, Metric::Histogram(Arc::clone(&histogram)))?;
        Ok(histogram)
    }

    fn insert(&self, name: &str, metric: Metric) -> Result<()> {
        let mut metrics = self.metrics.write();
        if metrics.contains_key(name) {
            return Err(MetricsError::DuplicateMetric(name.to_string()));
        }
        metrics.insert(name.to_string(), metric);
        tracing::debug!(metric = name, process_id = self.process_id, "registered metric");
        Ok(())
    }

    /// Fail with `DuplicateMetric` if any of `names` is already taken.
    pub(crate) fn check_vacant<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let metrics = self.metrics.read();
        match names.into_iter().find(|name| metrics.contains_key(*name)) {
            Some(name) => Err(MetricsError::DuplicateMetric(name.to_string())),
            None => Ok(()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    /// Snapshot of every family, sorted by name.
    pub fn gather(&self) -> Vec<MetricFamily> {
        // Clone the handles so no primitive is locked while the map is held.
        let metrics: Vec<Metric> = self.metrics.read().values().cloned().collect();
        metrics.iter().map(Metric::snapshot).collect()
    }

    pub fn family(&self, name: &str) -> Option<MetricFamily> {
        let metric = self.metrics.read().get(name).cloned();
        metric.map(|m| m.snapshot())
    }

    /// This process's contribution to a multiprocess merge.
    pub fn process_state(&self) -> ProcessState {
        ProcessState {
            process_id: self.process_id,
            collected_at: Utc::now(),
            families: self.gather(),
        }
    }
}
