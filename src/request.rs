//! Request-lifecycle metrics: token totals and latency breakdowns.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DroppedObservations, MetricsError, Result};
use crate::labels::LabelSet;
use crate::names::MetricNames;
use crate::primitives::{validate_buckets, Counter, Histogram};
use crate::registry::Registry;

const TIME_TO_FIRST_TOKEN_BUCKETS: &[f64] = &[
    0.1, 0.3, 0.5, 0.7, 0.9, 1.0, 2.0, 4.0, 6.0, 8.0, 10.0, 20.0, 40.0, 60.0, 80.0, 120.0, 160.0,
];

const TIME_PER_OUTPUT_TOKEN_BUCKETS: &[f64] = &[
    0.002, 0.005, 0.010, 0.020, 0.030, 0.040, 0.050, 0.060, 0.070, 0.080, 0.090, 0.100, 0.150,
    0.200, 0.300, 0.400, 0.600, 0.800, 1.000, 2.000,
];

const INTER_TOKEN_LATENCY_BUCKETS: &[f64] = &[
    0.002, 0.004, 0.006, 0.008, 0.010, 0.015, 0.020, 0.025, 0.030, 0.035, 0.040, 0.050, 0.075,
    0.100, 0.150, 0.200, 0.300, 0.400, 0.500, 0.750, 1.000, 2.000,
];

const E2E_REQUEST_LATENCY_BUCKETS: &[f64] = &[
    0.1, 0.2, 0.4, 0.8, 1.0, 2.0, 5.0, 10.0, 20.0, 40.0, 60.0, 80.0, 100.0, 150.0, 200.0, 250.0,
    300.0, 350.0, 500.0, 1000.0,
];

/// Shared by tokenization and detokenization.
const CODEC_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.002, 0.005, 0.010, 0.020, 0.030, 0.040, 0.050, 0.075, 0.100, 0.150, 0.200, 0.300,
    0.400, 0.500, 1.000,
];

/// Bucket ladders (seconds) of the six request histograms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestBuckets {
    pub time_to_first_token: Vec<f64>,
    pub time_per_output_token: Vec<f64>,
    pub inter_token_latency: Vec<f64>,
    pub e2e_request_latency: Vec<f64>,
    pub tokenization_latency: Vec<f64>,
    pub detokenization_latency: Vec<f64>,
}

impl Default for RequestBuckets {
    fn default() -> Self {
        Self {
            time_to_first_token: TIME_TO_FIRST_TOKEN_BUCKETS.to_vec(),
            time_per_output_token: TIME_PER_OUTPUT_TOKEN_BUCKETS.to_vec(),
            inter_token_latency: INTER_TOKEN_LATENCY_BUCKETS.to_vec(),
            e2e_request_latency: E2E_REQUEST_LATENCY_BUCKETS.to_vec(),
            tokenization_latency: CODEC_LATENCY_BUCKETS.to_vec(),
            detokenization_latency: CODEC_LATENCY_BUCKETS.to_vec(),
        }
    }
}

#[derive(Debug)]
pub struct RequestMetricsCollector {
    labels: LabelSet,
    prompt_tokens_total: Arc<Counter>,
    generation_tokens_total: Arc<Counter>,
    cached_tokens_total: Arc<Counter>,
    num_requests_total: Arc<Counter>,
    time_to_first_token: Arc<Histogram>,
    time_per_output_token: Arc<Histogram>,
    inter_token_latency: Arc<Histogram>,
    e2e_request_latency: Arc<Histogram>,
    tokenization_latency: Arc<Histogram>,
    detokenization_latency: Arc<Histogram>,
    dropped: DroppedObservations,
}

impl RequestMetricsCollector {
    pub fn new(registry: &Registry, prefix: &str, labels: LabelSet) -> Result<Self> {
        Self::with_buckets(registry, prefix, labels, RequestBuckets::default())
    }

    pub fn with_buckets(
        registry: &Registry,
        prefix: &str,
        labels: LabelSet,
        buckets: RequestBuckets,
    ) -> Result<Self> {
        let ladders = [
            (MetricNames::TIME_TO_FIRST_TOKEN, &buckets.time_to_first_token),
            (MetricNames::TIME_PER_OUTPUT_TOKEN, &buckets.time_per_output_token),
            (MetricNames::INTER_TOKEN_LATENCY, &buckets.inter_token_latency),
            (MetricNames::E2E_REQUEST_LATENCY, &buckets.e2e_request_latency),
            (MetricNames::TOKENIZATION_LATENCY, &buckets.tokenization_latency),
            (MetricNames::DETOKENIZATION_LATENCY, &buckets.detokenization_latency),
        ];
        for (name, bounds) in ladders {
            validate_buckets(&MetricNames::qualified(prefix, name), bounds)?;
        }
        let names: Vec<String> = [
            MetricNames::PROMPT_TOKENS_TOTAL,
            MetricNames::GENERATION_TOKENS_TOTAL,
            MetricNames::CACHED_TOKENS_TOTAL,
            MetricNames::NUM_REQUESTS_TOTAL,
        ]
        .into_iter()
        .chain(ladders.iter().map(|(name, _)| *name))
        .map(|name| MetricNames::qualified(prefix, name))
        .collect();
        // Nothing is registered unless every primitive can be.
        registry.check_vacant(names.iter().map(String::as_str))?;

        let space = labels.space();
        let counter = |name: &str, help: &str| {
            registry.register_counter(&MetricNames::qualified(prefix, name), help, space.clone())
        };
        let histogram = |name: &str, help: &str, bounds: Vec<f64>| {
            registry.register_histogram(
                &MetricNames::qualified(prefix, name),
                help,
                space.clone(),
                bounds,
            )
        };

        Ok(Self {
            prompt_tokens_total: counter(
                MetricNames::PROMPT_TOKENS_TOTAL,
                "Number of prefill tokens processed.",
            )?,
            generation_tokens_total: counter(
                MetricNames::GENERATION_TOKENS_TOTAL,
                "Number of generation tokens processed.",
            )?,
            cached_tokens_total: counter(
                MetricNames::CACHED_TOKENS_TOTAL,
                "Number of cached prompt tokens.",
            )?,
            num_requests_total: counter(
                MetricNames::NUM_REQUESTS_TOTAL,
                "Number of requests processed.",
            )?,
            time_to_first_token: histogram(
                MetricNames::TIME_TO_FIRST_TOKEN,
                "Histogram of time to first token in seconds.",
                buckets.time_to_first_token,
            )?,
            time_per_output_token: histogram(
                MetricNames::TIME_PER_OUTPUT_TOKEN,
                "Histogram of time per output token in seconds.",
                buckets.time_per_output_token,
            )?,
            inter_token_latency: histogram(
                MetricNames::INTER_TOKEN_LATENCY,
                "Histogram of inter-token latency in seconds.",
                buckets.inter_token_latency,
            )?,
            e2e_request_latency: histogram(
                MetricNames::E2E_REQUEST_LATENCY,
                "Histogram of end-to-end request latency in seconds.",
                buckets.e2e_request_latency,
            )?,
            tokenization_latency: histogram(
                MetricNames::TOKENIZATION_LATENCY,
                "Histogram of tokenization latency in seconds.",
                buckets.tokenization_latency,
            )?,
            detokenization_latency: histogram(
                MetricNames::DETOKENIZATION_LATENCY,
                "Histogram of detokenization latency in seconds.",
                buckets.detokenization_latency,
            )?,
            labels,
            dropped: DroppedObservations::default(),
        })
    }

    /// Account for a completed request.
    ///
    /// Time per output token is only recorded when at least one token was
    /// generated. A non-finite latency drops the whole request.
    pub fn observe_one_finished_request(
        &self,
        prompt_tokens: u64,
        generation_tokens: u64,
        cached_tokens: u64,
        e2e_latency: f64,
    ) {
        if !e2e_latency.is_finite() {
            self.dropped.check(Err(MetricsError::InvalidObservation {
                metric: self.e2e_request_latency.desc().name.clone(),
                reason: format!("e2e latency must be finite, got {e2e_latency}"),
            }));
            return;
        }
        let labels = &self.labels;
        self.dropped
            .check(self.prompt_tokens_total.inc_by(labels, prompt_tokens as f64));
        self.dropped
            .check(self.generation_tokens_total.inc_by(labels, generation_tokens as f64));
        self.dropped
            .check(self.cached_tokens_total.inc_by(labels, cached_tokens as f64));
        self.dropped.check(self.num_requests_total.inc(labels));
        self.dropped
            .check(self.e2e_request_latency.observe(labels, e2e_latency));
        if generation_tokens >= 1 {
            self.dropped.check(
                self.time_per_output_token
                    .observe(labels, e2e_latency / generation_tokens as f64),
            );
        }
    }

    pub fn observe_time_to_first_token(&self, latency: f64) {
        self.dropped
            .check(self.time_to_first_token.observe(&self.labels, latency));
    }

    /// Record `num_new_tokens` tokens emitted together over `interval` seconds.
    ///
    /// One pass over the ladder regardless of the token count; see
    /// [`Histogram::observe_batch`].
    pub fn observe_inter_token_latency(&self, interval: f64, num_new_tokens: u64) {
        self.dropped.check(
            self.inter_token_latency
                .observe_batch(&self.labels, interval, num_new_tokens),
        );
    }

    pub fn observe_tokenization_latency(&self, latency: f64) {
        self.dropped
            .check(self.tokenization_latency.observe(&self.labels, latency));
    }

    pub fn observe_detokenization_latency(&self, latency: f64) {
        self.dropped
            .check(self.detokenization_latency.observe(&self.labels, latency));
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn dropped_observations(&self) -> u64 {
        self.dropped.get()
    }
}
