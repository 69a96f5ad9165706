//! Plain, serializable views of metric state.
//!
//! These are what an exporter reads and what crosses a process boundary on its
//! way to the [`MultiProcessAggregator`](crate::aggregate::MultiProcessAggregator).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};
use crate::labels::{LabelSpace, LabelValues};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// Identity of one primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDesc {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub labels: LabelSpace,
    /// Finite upper bounds, ascending. Empty unless `kind` is `Histogram`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<f64>,
}

impl MetricDesc {
    /// Two copies of a metric may only be merged when they agree on everything
    /// but the help text.
    pub fn check_compatible(&self, other: &MetricDesc) -> Result<()> {
        let reason = if self.kind != other.kind {
            format!("kind {:?} vs {:?}", self.kind, other.kind)
        } else if self.labels != other.labels {
            format!(
                "labels {:?} vs {:?}",
                self.labels.names(),
                other.labels.names()
            )
        } else if self.buckets != other.buckets {
            "bucket ladders differ".to_string()
        } else {
            return Ok(());
        };
        Err(MetricsError::IncompatibleMetric {
            metric: self.name.clone(),
            reason,
        })
    }
}

/// Last write of a gauge series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaugeSample {
    pub value: f64,
    pub written_at: DateTime<Utc>,
}

/// Histogram series state.
///
/// `buckets[i]` holds the samples that landed in bucket `i` only (not
/// cumulative). Samples above the last bound are not stored anywhere; they are
/// `count` minus the finite buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSample {
    pub buckets: Vec<u64>,
    pub count: u64,
    pub sum: f64,
}

impl HistogramSample {
    pub fn empty(bucket_count: usize) -> Self {
        Self {
            buckets: vec![0; bucket_count],
            count: 0,
            sum: 0.0,
        }
    }

    /// Record `n` samples placed by `placement`, contributing `sum_delta` to the sum.
    pub(crate) fn record(&mut self, bounds: &[f64], placement: f64, n: u64, sum_delta: f64) {
        self.sum += sum_delta;
        self.count += n;
        if let Some(i) = bounds.iter().position(|bound| placement <= *bound) {
            self.buckets[i] += n;
        }
    }

    /// Samples above the largest finite bound.
    pub fn overflow(&self) -> u64 {
        self.count.saturating_sub(self.buckets.iter().sum())
    }

    /// Cumulative counts, one per finite bound followed by `+Inf` (== `count`).
    pub fn cumulative(&self) -> Vec<u64> {
        let mut running = 0;
        let mut out: Vec<u64> = self
            .buckets
            .iter()
            .map(|b| {
                running += b;
                running
            })
            .collect();
        out.push(self.count);
        out
    }

    fn merge(&mut self, other: &HistogramSample) {
        for (mine, theirs) in self.buckets.iter_mut().zip(&other.buckets) {
            *mine += theirs;
        }
        self.count += other.count;
        self.sum += other.sum;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "lowercase")]
pub enum SeriesValue {
    Counter(f64),
    Gauge(GaugeSample),
    Histogram(HistogramSample),
}

impl SeriesValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            SeriesValue::Counter(_) => MetricKind::Counter,
            SeriesValue::Gauge(_) => MetricKind::Gauge,
            SeriesValue::Histogram(_) => MetricKind::Histogram,
        }
    }

    /// Fold `other` into `self`: sum for counters and histograms, newest write
    /// for gauges. On a timestamp tie `other` wins.
    pub(crate) fn merge(&mut self, other: &SeriesValue, metric: &str) -> Result<()> {
        match (self, other) {
            (SeriesValue::Counter(a), SeriesValue::Counter(b)) => *a += b,
            (SeriesValue::Histogram(a), SeriesValue::Histogram(b)) => a.merge(b),
            (SeriesValue::Gauge(a), SeriesValue::Gauge(b)) => {
                if b.written_at >= a.written_at {
                    *a = *b;
                }
            }
            (mine, theirs) => {
                return Err(MetricsError::IncompatibleMetric {
                    metric: metric.to_string(),
                    reason: format!("series kind {:?} vs {:?}", mine.kind(), theirs.kind()),
                })
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub labels: LabelValues,
    pub value: SeriesValue,
}

/// Every series of one primitive, sorted by label values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFamily {
    pub desc: MetricDesc,
    pub series: Vec<Series>,
}

impl MetricFamily {
    pub fn find(&self, labels: &[&str]) -> Option<&SeriesValue> {
        self.series
            .iter()
            .find(|s| s.labels.0.iter().map(String::as_str).eq(labels.iter().copied()))
            .map(|s| &s.value)
    }

    /// Reject families whose series disagree with their own descriptor or
    /// with each other.
    pub(crate) fn validate(&self) -> Result<()> {
        let bad = |reason: String| MetricsError::IncompatibleMetric {
            metric: self.desc.name.clone(),
            reason,
        };
        let mut seen = BTreeSet::new();
        for series in &self.series {
            if !seen.insert(&series.labels) {
                return Err(bad(format!("label tuple {:?} appears twice", series.labels.0)));
            }
            if series.value.kind() != self.desc.kind {
                return Err(bad(format!(
                    "series kind {:?} under a {:?} descriptor",
                    series.value.kind(),
                    self.desc.kind
                )));
            }
            if series.labels.0.len() != self.desc.labels.len() {
                return Err(bad("series label arity differs from descriptor".into()));
            }
            if let SeriesValue::Histogram(h) = &series.value {
                if h.buckets.len() != self.desc.buckets.len() {
                    return Err(bad("series bucket count differs from descriptor".into()));
                }
                let finite = h.buckets.iter().try_fold(0u64, |acc, b| acc.checked_add(*b));
                if finite.map_or(true, |total| total > h.count) {
                    return Err(bad(format!(
                        "finite buckets hold more samples than count {}",
                        h.count
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Everything one process holds, tagged with its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    pub process_id: u32,
    pub collected_at: DateTime<Utc>,
    pub families: Vec<MetricFamily>,
}

impl ProcessState {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn family(&self, name: &str) -> Option<&MetricFamily> {
        self.families.iter().find(|f| f.desc.name == name)
    }
}
