//! Counter, gauge and histogram primitives.
//!
//! Each primitive keeps one accumulator per label tuple. Series are looked up
//! in a sharded [`DashMap`] and updated under their own [`Mutex`], so two
//! tuples never serialize on each other and the same tuple never loses an
//! update. Label and value checks run before any series is touched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{MetricsError, Result};
use crate::labels::{LabelSet, LabelSpace, LabelValues};
use crate::snapshot::{
    GaugeSample, HistogramSample, MetricDesc, MetricFamily, MetricKind, Series, SeriesValue,
};

type SeriesMap<S> = DashMap<LabelValues, Arc<Mutex<S>>>;

/// Fetch the accumulator for `key`, creating it on first use. The shard lock
/// is released before the caller locks the series.
fn series_for<S>(map: &SeriesMap<S>, key: LabelValues, init: impl FnOnce() -> S) -> Arc<Mutex<S>> {
    if let Some(existing) = map.get(&key) {
        return Arc::clone(existing.value());
    }
    Arc::clone(
        map.entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .value(),
    )
}

fn collect_series<S>(map: &SeriesMap<S>, to_value: impl Fn(&S) -> SeriesValue) -> Vec<Series> {
    let mut series: Vec<Series> = map
        .iter()
        .map(|entry| Series {
            labels: entry.key().clone(),
            value: to_value(&*entry.value().lock()),
        })
        .collect();
    series.sort_by(|a, b| a.labels.cmp(&b.labels));
    series
}

fn invalid(metric: &str, reason: impl Into<String>) -> MetricsError {
    MetricsError::InvalidObservation {
        metric: metric.to_string(),
        reason: reason.into(),
    }
}

fn desc(name: &str, help: &str, kind: MetricKind, labels: LabelSpace, buckets: Vec<f64>) -> MetricDesc {
    MetricDesc {
        name: name.to_string(),
        help: help.to_string(),
        kind,
        labels,
        buckets,
    }
}

/// Check a histogram ladder without building the histogram.
pub(crate) fn validate_buckets(name: &str, buckets: &[f64]) -> Result<()> {
    let reject = |reason: &str| MetricsError::InvalidBuckets {
        metric: name.to_string(),
        reason: reason.to_string(),
    };
    if buckets.is_empty() {
        return Err(reject("bucket ladder is empty"));
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(reject("bounds must be finite; +Inf is implicit"));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(reject("bounds must be strictly ascending"));
    }
    Ok(())
}

/// Monotonically non-decreasing total.
#[derive(Debug)]
pub struct Counter {
    desc: MetricDesc,
    series: SeriesMap<f64>,
}

impl Counter {
    pub fn new(name: &str, help: &str, labels: LabelSpace) -> Self {
        Self {
            desc: desc(name, help, MetricKind::Counter, labels, Vec::new()),
            series: DashMap::new(),
        }
    }

    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }

    pub fn inc(&self, labels: &LabelSet) -> Result<()> {
        self.inc_by(labels, 1.0)
    }

    pub fn inc_by(&self, labels: &LabelSet, amount: f64) -> Result<()> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(invalid(
                &self.desc.name,
                format!("counter increment must be finite and non-negative, got {amount}"),
            ));
        }
        let key = self.desc.labels.resolve(&self.desc.name, labels)?;
        *series_for(&self.series, key, || 0.0).lock() += amount;
        Ok(())
    }

    /// Current total for `labels`; zero if never incremented.
    pub fn get(&self, labels: &LabelSet) -> Result<f64> {
        let key = self.desc.labels.resolve(&self.desc.name, labels)?;
        Ok(self.series.get(&key).map(|s| *s.lock()).unwrap_or(0.0))
    }

    pub fn snapshot(&self) -> MetricFamily {
        MetricFamily {
            desc: self.desc.clone(),
            series: collect_series(&self.series, |v| SeriesValue::Counter(*v)),
        }
    }
}

/// Last written value, stamped with its wall-clock write time.
#[derive(Debug)]
pub struct Gauge {
    desc: MetricDesc,
    series: SeriesMap<GaugeSample>,
}

impl Gauge {
    pub fn new(name: &str, help: &str, labels: LabelSpace) -> Self {
        Self {
            desc: desc(name, help, MetricKind::Gauge, labels, Vec::new()),
            series: DashMap::new(),
        }
    }

    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }

    pub fn set(&self, labels: &LabelSet, value: f64) -> Result<()> {
        self.set_at(labels, value, Utc::now())
    }

    /// Overwrite the series with an explicit write time.
    pub fn set_at(&self, labels: &LabelSet, value: f64, written_at: DateTime<Utc>) -> Result<()> {
        if !value.is_finite() {
            return Err(invalid(
                &self.desc.name,
                format!("gauge value must be finite, got {value}"),
            ));
        }
        let key = self.desc.labels.resolve(&self.desc.name, labels)?;
        let sample = GaugeSample { value, written_at };
        *series_for(&self.series, key, || sample).lock() = sample;
        Ok(())
    }

    pub fn get(&self, labels: &LabelSet) -> Result<Option<GaugeSample>> {
        let key = self.desc.labels.resolve(&self.desc.name, labels)?;
        Ok(self.series.get(&key).map(|s| *s.lock()))
    }

    pub fn snapshot(&self) -> MetricFamily {
        MetricFamily {
            desc: self.desc.clone(),
            series: collect_series(&self.series, |v| SeriesValue::Gauge(*v)),
        }
    }
}

/// Fixed-ladder histogram with an implicit `+Inf` bucket.
#[derive(Debug)]
pub struct Histogram {
    desc: MetricDesc,
    series: SeriesMap<HistogramSample>,
}

impl Histogram {
    /// `buckets` must be non-empty, finite and strictly ascending.
    pub fn new(name: &str, help: &str, labels: LabelSpace, buckets: Vec<f64>) -> Result<Self> {
        validate_buckets(name, &buckets)?;
        Ok(Self {
            desc: desc(name, help, MetricKind::Histogram, labels, buckets),
            series: DashMap::new(),
        })
    }

    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }

    pub fn observe(&self, labels: &LabelSet, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(invalid(
                &self.desc.name,
                format!("histogram sample must be finite, got {value}"),
            ));
        }
        self.record(labels, value, 1, value)
    }

    /// Record `count` samples that share one measured `interval`.
    ///
    /// The samples are placed by `interval / count` and all go to the first
    /// bucket whose bound is at or above it, in a single pass. The sum grows by
    /// the raw `interval`, not by the per-sample share. When no finite bound
    /// matches, only `count` moves and the batch shows up as overflow.
    pub fn observe_batch(&self, labels: &LabelSet, interval: f64, count: u64) -> Result<()> {
        if count == 0 {
            return Err(invalid(&self.desc.name, "batch must contain at least one sample"));
        }
        if !interval.is_finite() {
            return Err(invalid(
                &self.desc.name,
                format!("batch interval must be finite, got {interval}"),
            ));
        }
        let adjusted = interval / count as f64;
        self.record(labels, adjusted, count, interval)
    }

    fn record(&self, labels: &LabelSet, placement: f64, n: u64, sum_delta: f64) -> Result<()> {
        let key = self.desc.labels.resolve(&self.desc.name, labels)?;
        let bucket_count = self.desc.buckets.len();
        series_for(&self.series, key, || HistogramSample::empty(bucket_count))
            .lock()
            .record(&self.desc.buckets, placement, n, sum_delta);
        Ok(())
    }

    /// Current state for `labels`; an empty sample if never observed.
    pub fn get(&self, labels: &LabelSet) -> Result<HistogramSample> {
        let key = self.desc.labels.resolve(&self.desc.name, labels)?;
        Ok(self
            .series
            .get(&key)
            .map(|s| s.lock().clone())
            .unwrap_or_else(|| HistogramSample::empty(self.desc.buckets.len())))
    }

    pub fn snapshot(&self) -> MetricFamily {
        MetricFamily {
            desc: self.desc.clone(),
            series: collect_series(&self.series, |v| SeriesValue::Histogram(v.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn labels(model: &str) -> LabelSet {
        LabelSet::new().with("model_name", model)
    }

    fn space() -> LabelSpace {
        LabelSpace::new(["model_name"])
    }

    fn histogram(bounds: &[f64]) -> Histogram {
        Histogram::new("h", "test histogram", space(), bounds.to_vec()).unwrap()
    }

    #[test]
    fn test_counter_sums_increments() {
        let c = Counter::new("c", "test counter", space());
        for v in [1.0, 2.5, 0.0, 4.0] {
            c.inc_by(&labels("a"), v).unwrap();
        }
        c.inc(&labels("a")).unwrap();
        assert_eq!(c.get(&labels("a")).unwrap(), 8.5);
        assert_eq!(c.get(&labels("b")).unwrap(), 0.0);
    }

    #[test]
    fn test_counter_rejects_negative_and_nan() {
        let c = Counter::new("c", "test counter", space());
        c.inc_by(&labels("a"), 2.0).unwrap();
        assert!(matches!(
            c.inc_by(&labels("a"), -1.0),
            Err(MetricsError::InvalidObservation { .. })
        ));
        assert!(c.inc_by(&labels("a"), f64::NAN).is_err());
        assert_eq!(c.get(&labels("a")).unwrap(), 2.0);
    }

    #[test]
    fn test_counter_label_mismatch_leaves_state() {
        let c = Counter::new("c", "test counter", space());
        c.inc_by(&labels("a"), 3.0).unwrap();
        let err = c.inc_by(&LabelSet::new(), 1.0).unwrap_err();
        assert!(matches!(err, MetricsError::LabelMismatch { .. }));
        assert_eq!(c.snapshot().series.len(), 1);
        assert_eq!(c.get(&labels("a")).unwrap(), 3.0);
    }

    #[test]
    fn test_counter_concurrent_same_tuple() {
        let c = Arc::new(Counter::new("c", "test counter", space()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        c.inc(&labels("a")).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.get(&labels("a")).unwrap(), 8000.0);
    }

    #[test]
    fn test_gauge_overwrites() {
        let g = Gauge::new("g", "test gauge", space());
        g.set(&labels("a"), 5.0).unwrap();
        g.set(&labels("a"), -2.0).unwrap();
        assert_eq!(g.get(&labels("a")).unwrap().unwrap().value, -2.0);
        assert!(g.get(&labels("b")).unwrap().is_none());
        assert!(g.set(&labels("a"), f64::INFINITY).is_err());
        assert_eq!(g.get(&labels("a")).unwrap().unwrap().value, -2.0);
    }

    #[test]
    fn test_gauge_records_write_time() {
        let g = Gauge::new("g", "test gauge", space());
        let at = Utc::now() - chrono::Duration::seconds(30);
        g.set_at(&labels("a"), 1.0, at).unwrap();
        assert_eq!(g.get(&labels("a")).unwrap().unwrap().written_at, at);
    }

    #[test]
    fn test_histogram_rejects_bad_ladders() {
        for bad in [vec![], vec![1.0, 0.5], vec![0.1, 0.1], vec![0.1, f64::INFINITY]] {
            let err = Histogram::new("h", "", space(), bad).unwrap_err();
            assert!(matches!(err, MetricsError::InvalidBuckets { .. }));
        }
    }

    #[test]
    fn test_histogram_observe_boundaries() {
        let h = histogram(&[0.1, 0.5, 1.0]);
        for v in [0.0, 0.1, 0.3, 1.0, 60.0] {
            h.observe(&labels("a"), v).unwrap();
        }
        let s = h.get(&labels("a")).unwrap();
        assert_eq!(s.buckets, vec![2, 1, 1]);
        assert_eq!(s.count, 5);
        assert_eq!(s.overflow(), 1);
        assert_eq!(s.cumulative(), vec![2, 3, 4, 5]);
        assert!((s.sum - 61.4).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_label_mismatch_leaves_state() {
        let h = histogram(&[0.1, 0.5, 1.0]);
        h.observe(&labels("a"), 0.2).unwrap();
        let before = h.get(&labels("a")).unwrap();
        let wrong = LabelSet::new().with("model", "a");
        assert!(h.observe(&wrong, 0.2).is_err());
        assert!(h.observe_batch(&wrong, 0.2, 4).is_err());
        assert_eq!(h.get(&labels("a")).unwrap(), before);
        assert_eq!(h.snapshot().series.len(), 1);
    }

    #[test]
    fn test_batch_matches_individual_observations() {
        let batched = histogram(&[0.002, 0.004, 0.006, 0.008, 0.010]);
        let single = histogram(&[0.002, 0.004, 0.006, 0.008, 0.010]);
        let (interval, n) = (0.02, 4u64);

        batched.observe_batch(&labels("a"), interval, n).unwrap();
        for _ in 0..n {
            single.observe(&labels("a"), interval / n as f64).unwrap();
        }

        let b = batched.get(&labels("a")).unwrap();
        let s = single.get(&labels("a")).unwrap();
        assert_eq!(b.buckets, s.buckets);
        assert_eq!(b.buckets[2], 4);
        assert_eq!(b.count, s.count);
        assert!((b.sum - s.sum).abs() < 1e-12);
        assert!((b.sum - interval).abs() < 1e-12);
    }

    #[test]
    fn test_batch_overflow_still_counts() {
        let h = histogram(&[0.1, 0.5, 1.0]);
        h.observe_batch(&labels("a"), 0.3, 3).unwrap();
        h.observe_batch(&labels("a"), 1.5, 1).unwrap();

        let s = h.get(&labels("a")).unwrap();
        assert_eq!(s.buckets, vec![3, 0, 0]);
        assert_eq!(s.count, 4);
        assert_eq!(s.overflow(), 1);
        assert!((s.sum - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_batch_rejects_zero_tokens() {
        let h = histogram(&[0.1]);
        assert!(h.observe_batch(&labels("a"), 0.3, 0).is_err());
        assert!(h.observe_batch(&labels("a"), f64::NAN, 2).is_err());
        assert_eq!(h.get(&labels("a")).unwrap().count, 0);
    }

    #[test]
    fn test_snapshot_sorted_by_labels() {
        let c = Counter::new("c", "", space());
        for model in ["zeta", "alpha", "mid"] {
            c.inc(&labels(model)).unwrap();
        }
        let names: Vec<_> = c
            .snapshot()
            .series
            .iter()
            .map(|s| s.labels.0[0].clone())
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
