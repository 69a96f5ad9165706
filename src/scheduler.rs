//! Scheduler-loop metrics: point-in-time gauges plus queue wait latency.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{DroppedObservations, Result};
use crate::labels::LabelSet;
use crate::names::MetricNames;
use crate::primitives::{Gauge, Histogram};
use crate::registry::Registry;

/// Queue wait buckets (seconds), 1 ms up to 60 s.
pub const REQUEST_QUEUE_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000, 10.000,
    20.000, 30.000, 60.000,
];

/// Scheduler state at one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub num_running_reqs: u64,
    pub num_used_tokens: u64,
    pub token_usage: f64,
    pub gen_throughput: f64,
    pub num_queue_reqs: u64,
    pub cache_hit_rate: f64,
    pub spec_accept_length: f64,
}

#[derive(Debug)]
pub struct SchedulerMetricsCollector {
    labels: LabelSet,
    last_log_time: Mutex<DateTime<Utc>>,
    num_running_reqs: Arc<Gauge>,
    num_used_tokens: Arc<Gauge>,
    token_usage: Arc<Gauge>,
    gen_throughput: Arc<Gauge>,
    num_queue_reqs: Arc<Gauge>,
    cache_hit_rate: Arc<Gauge>,
    spec_accept_length: Arc<Gauge>,
    request_queue_latency: Arc<Histogram>,
    dropped: DroppedObservations,
}

impl SchedulerMetricsCollector {
    /// Register the scheduler metrics in `registry`, all keyed by `labels`.
    pub fn new(registry: &Registry, prefix: &str, labels: LabelSet) -> Result<Self> {
        let names: Vec<String> = [
            MetricNames::NUM_RUNNING_REQS,
            MetricNames::NUM_USED_TOKENS,
            MetricNames::TOKEN_USAGE,
            MetricNames::GEN_THROUGHPUT,
            MetricNames::NUM_QUEUE_REQS,
            MetricNames::CACHE_HIT_RATE,
            MetricNames::SPEC_ACCEPT_LENGTH,
            MetricNames::REQUEST_QUEUE_LATENCY,
        ]
        .into_iter()
        .map(|name| MetricNames::qualified(prefix, name))
        .collect();
        registry.check_vacant(names.iter().map(String::as_str))?;

        let space = labels.space();
        let gauge = |name: &str, help: &str| {
            registry.register_gauge(&MetricNames::qualified(prefix, name), help, space.clone())
        };

        Ok(Self {
            num_running_reqs: gauge(MetricNames::NUM_RUNNING_REQS, "The number of running requests.")?,
            num_used_tokens: gauge(MetricNames::NUM_USED_TOKENS, "The number of used tokens.")?,
            token_usage: gauge(MetricNames::TOKEN_USAGE, "The token usage.")?,
            gen_throughput: gauge(
                MetricNames::GEN_THROUGHPUT,
                "The generation throughput (token/s).",
            )?,
            num_queue_reqs: gauge(
                MetricNames::NUM_QUEUE_REQS,
                "The number of requests in the waiting queue.",
            )?,
            cache_hit_rate: gauge(MetricNames::CACHE_HIT_RATE, "The prefix cache hit rate.")?,
            spec_accept_length: gauge(
                MetricNames::SPEC_ACCEPT_LENGTH,
                "The average acceptance length of speculative decoding.",
            )?,
            request_queue_latency: registry.register_histogram(
                &MetricNames::qualified(prefix, MetricNames::REQUEST_QUEUE_LATENCY),
                "Histogram of time requests spend in queue before processing",
                space.clone(),
                REQUEST_QUEUE_LATENCY_BUCKETS.to_vec(),
            )?,
            labels,
            last_log_time: Mutex::new(Utc::now()),
            dropped: DroppedObservations::default(),
        })
    }

    /// Publish one scheduler tick. All seven gauges share one write time.
    pub fn log_stats(&self, stats: SchedulerStats) {
        let now = Utc::now();
        let writes = [
            (&self.num_running_reqs, stats.num_running_reqs as f64),
            (&self.num_used_tokens, stats.num_used_tokens as f64),
            (&self.token_usage, stats.token_usage),
            (&self.gen_throughput, stats.gen_throughput),
            (&self.num_queue_reqs, stats.num_queue_reqs as f64),
            (&self.cache_hit_rate, stats.cache_hit_rate),
            (&self.spec_accept_length, stats.spec_accept_length),
        ];
        for (gauge, value) in writes {
            self.dropped.check(gauge.set_at(&self.labels, value, now));
        }
        *self.last_log_time.lock() = now;
    }

    /// How long a request waited before it was scheduled.
    pub fn observe_request_queue_latency(&self, latency: f64) {
        self.dropped
            .check(self.request_queue_latency.observe(&self.labels, latency));
    }

    /// Wall-clock time of the last `log_stats` call (construction time before that).
    pub fn last_log_time(&self) -> DateTime<Utc> {
        *self.last_log_time.lock()
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn dropped_observations(&self) -> u64 {
        self.dropped.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SeriesValue;

    fn collector(registry: &Registry) -> SchedulerMetricsCollector {
        let labels = LabelSet::new().with("model_name", "bitnet");
        SchedulerMetricsCollector::new(registry, "ryzanstein", labels).unwrap()
    }

    fn gauge_value(registry: &Registry, name: &str) -> f64 {
        let family = registry.family(&format!("ryzanstein:{name}")).unwrap();
        match family.find(&["bitnet"]) {
            Some(SeriesValue::Gauge(g)) => g.value,
            other => panic!("unexpected series {other:?}"),
        }
    }

    #[test]
    fn test_registers_all_metrics() {
        let registry = Registry::with_process_id(1);
        collector(&registry);
        assert_eq!(registry.len(), 8);
        assert!(registry.contains("ryzanstein:request_queue_latency_seconds"));
    }

    #[test]
    fn test_log_stats_sets_gauges() {
        let registry = Registry::with_process_id(1);
        let c = collector(&registry);
        let before = c.last_log_time();
        c.log_stats(SchedulerStats {
            num_running_reqs: 12,
            num_used_tokens: 4096,
            token_usage: 0.25,
            gen_throughput: 812.5,
            num_queue_reqs: 3,
            cache_hit_rate: 0.6,
            spec_accept_length: 2.4,
        });

        assert_eq!(gauge_value(&registry, "num_running_reqs"), 12.0);
        assert_eq!(gauge_value(&registry, "num_used_tokens"), 4096.0);
        assert_eq!(gauge_value(&registry, "token_usage"), 0.25);
        assert_eq!(gauge_value(&registry, "gen_throughput"), 812.5);
        assert_eq!(gauge_value(&registry, "num_queue_reqs"), 3.0);
        assert_eq!(gauge_value(&registry, "cache_hit_rate"), 0.6);
        assert_eq!(gauge_value(&registry, "spec_accept_length"), 2.4);
        assert!(c.last_log_time() >= before);
        assert_eq!(c.dropped_observations(), 0);
    }

    #[test]
    fn test_log_stats_overwrites_previous_tick() {
        let registry = Registry::with_process_id(1);
        let c = collector(&registry);
        c.log_stats(SchedulerStats {
            num_queue_reqs: 10,
            ..Default::default()
        });
        c.log_stats(SchedulerStats::default());
        assert_eq!(gauge_value(&registry, "num_queue_reqs"), 0.0);
    }

    #[test]
    fn test_queue_latency_edges() {
        let registry = Registry::with_process_id(1);
        let c = collector(&registry);
        c.observe_request_queue_latency(0.0);
        c.observe_request_queue_latency(0.003);
        c.observe_request_queue_latency(120.0);

        let sample = c.request_queue_latency.get(c.labels()).unwrap();
        assert_eq!(sample.count, 3);
        assert_eq!(sample.buckets[0], 1);
        assert_eq!(sample.buckets[2], 1);
        assert_eq!(sample.overflow(), 1);
    }

    #[test]
    fn test_bad_input_is_dropped_not_raised() {
        let registry = Registry::with_process_id(1);
        let c = collector(&registry);
        c.observe_request_queue_latency(f64::NAN);
        c.log_stats(SchedulerStats {
            token_usage: f64::INFINITY,
            ..Default::default()
        });
        assert_eq!(c.dropped_observations(), 2);
        assert_eq!(c.request_queue_latency.get(c.labels()).unwrap().count, 0);
        assert_eq!(gauge_value(&registry, "num_running_reqs"), 0.0);
    }

    #[test]
    fn test_second_collector_in_same_registry_fails() {
        let registry = Registry::with_process_id(1);
        collector(&registry);
        let labels = LabelSet::new().with("model_name", "bitnet");
        assert!(SchedulerMetricsCollector::new(&registry, "ryzanstein", labels).is_err());
    }

    #[test]
    fn test_taken_name_registers_nothing() {
        let registry = Registry::with_process_id(1);
        let labels = LabelSet::new().with("model_name", "bitnet");
        registry
            .register_counter("ryzanstein:request_queue_latency_seconds", "", labels.space())
            .unwrap();
        assert!(SchedulerMetricsCollector::new(&registry, "ryzanstein", labels).is_err());
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains("ryzanstein:num_running_reqs"));
    }
}
