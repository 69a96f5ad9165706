//! Well-known metric names for Ryzanstein serving metrics.
//!
//! Names are stored unprefixed; collectors qualify them as `{prefix}:{name}`.

/// Standard metric names
pub struct MetricNames;

impl MetricNames {
    // Scheduler gauges
    pub const NUM_RUNNING_REQS: &'static str = "num_running_reqs";
    pub const NUM_USED_TOKENS: &'static str = "num_used_tokens";
    pub const TOKEN_USAGE: &'static str = "token_usage";
    pub const GEN_THROUGHPUT: &'static str = "gen_throughput";
    pub const NUM_QUEUE_REQS: &'static str = "num_queue_reqs";
    pub const CACHE_HIT_RATE: &'static str = "cache_hit_rate";
    pub const SPEC_ACCEPT_LENGTH: &'static str = "spec_accept_length";
    pub const REQUEST_QUEUE_LATENCY: &'static str = "request_queue_latency_seconds";

    // Request counters
    pub const PROMPT_TOKENS_TOTAL: &'static str = "prompt_tokens_total";
    pub const GENERATION_TOKENS_TOTAL: &'static str = "generation_tokens_total";
    pub const CACHED_TOKENS_TOTAL: &'static str = "cached_tokens_total";
    pub const NUM_REQUESTS_TOTAL: &'static str = "num_requests_total";

    // Request latency histograms
    pub const TIME_TO_FIRST_TOKEN: &'static str = "time_to_first_token_seconds";
    pub const TIME_PER_OUTPUT_TOKEN: &'static str = "time_per_output_token_seconds";
    pub const INTER_TOKEN_LATENCY: &'static str = "inter_token_latency_seconds";
    pub const E2E_REQUEST_LATENCY: &'static str = "e2e_request_latency_seconds";
    pub const TOKENIZATION_LATENCY: &'static str = "tokenization_latency_seconds";
    pub const DETOKENIZATION_LATENCY: &'static str = "detokenization_latency_seconds";

    /// `prefix:name`
    pub fn qualified(prefix: &str, name: &str) -> String {
        format!("{}:{}", prefix, name)
    }
}
