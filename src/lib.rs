//! # sigma-metrics
//!
//! Runtime metrics for the Ryzanstein serving engine: scheduler gauges, token
//! throughput counters and per-request latency histograms, kept per process and
//! merged across worker processes for an external scraper.
//!
//! ```
//! use sigma_metrics::{EngineMetrics, MetricsConfig, SchedulerStats};
//!
//! let metrics = EngineMetrics::new(MetricsConfig::default()).unwrap();
//! metrics.scheduler().log_stats(SchedulerStats { num_running_reqs: 4, ..Default::default() });
//! metrics.requests().observe_inter_token_latency(0.12, 6);
//! assert_eq!(metrics.summary().dropped_observations, 0);
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod labels;
pub mod logging;
pub mod names;
pub mod primitives;
pub mod registry;
pub mod request;
pub mod scheduler;
pub mod snapshot;

use serde::Serialize;

pub use aggregate::MultiProcessAggregator;
pub use config::MetricsConfig;
pub use error::{MetricsError, Result};
pub use labels::{LabelSet, LabelSpace, LabelValues};
pub use primitives::{Counter, Gauge, Histogram};
pub use registry::Registry;
pub use request::{RequestBuckets, RequestMetricsCollector};
pub use scheduler::{SchedulerMetricsCollector, SchedulerStats};
pub use snapshot::{MetricFamily, MetricKind, ProcessState, SeriesValue};

/// Both collectors of one process over a shared registry.
#[derive(Debug)]
pub struct EngineMetrics {
    config: MetricsConfig,
    registry: Registry,
    scheduler: SchedulerMetricsCollector,
    requests: RequestMetricsCollector,
}

/// Summary of local metric state
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub process_id: u32,
    pub family_count: usize,
    pub series_count: usize,
    pub dropped_observations: u64,
}

impl EngineMetrics {
    pub fn new(config: MetricsConfig) -> Result<Self> {
        config.validate()?;
        let registry = Registry::with_process_id(config.resolved_process_id());
        let labels = config.label_set();
        let scheduler =
            SchedulerMetricsCollector::new(&registry, &config.metric_prefix, labels.clone())?;
        let requests = RequestMetricsCollector::with_buckets(
            &registry,
            &config.metric_prefix,
            labels,
            config.request_buckets.clone(),
        )?;
        tracing::info!(
            process_id = registry.process_id(),
            prefix = %config.metric_prefix,
            metrics = registry.len(),
            "engine metrics ready"
        );
        Ok(Self {
            config,
            registry,
            scheduler,
            requests,
        })
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn scheduler(&self) -> &SchedulerMetricsCollector {
        &self.scheduler
    }

    pub fn requests(&self) -> &RequestMetricsCollector {
        &self.requests
    }

    /// This process's state, ready to hand to a [`MultiProcessAggregator`].
    pub fn process_state(&self) -> ProcessState {
        self.registry.process_state()
    }

    pub fn summary(&self) -> MetricsSummary {
        let families = self.registry.gather();
        MetricsSummary {
            process_id: self.registry.process_id(),
            family_count: families.len(),
            series_count: families.iter().map(|f| f.series.len()).sum(),
            dropped_observations: self.scheduler.dropped_observations()
                + self.requests.dropped_observations(),
        }
    }
}
