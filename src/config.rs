use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};
use crate::labels::{is_valid_label_name, LabelSet};
use crate::request::RequestBuckets;

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Namespace prepended to every metric name (`prefix:name`)
    pub metric_prefix: String,
    /// Fixed label tuple applied to every metric the collectors own
    pub labels: BTreeMap<String, String>,
    /// Identity used in multiprocess merges; defaults to the OS pid
    pub process_id: Option<u32>,
    /// Default tracing filter, overridden by `RUST_LOG`
    pub log_filter: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
    /// Bucket ladders of the request-lifecycle histograms
    pub request_buckets: RequestBuckets,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            metric_prefix: "ryzanstein".to_string(),
            labels: BTreeMap::from([("model_name".to_string(), "default".to_string())]),
            process_id: None,
            log_filter: "info".to_string(),
            json_logs: false,
            request_buckets: RequestBuckets::default(),
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.metric_prefix.is_empty() {
            return Err(MetricsError::ConfigError("metric_prefix must not be empty".into()));
        }
        if let Some(bad) = self.labels.keys().find(|name| !is_valid_label_name(name)) {
            return Err(MetricsError::ConfigError(format!("invalid label name {:?}", bad)));
        }
        Ok(())
    }

    /// The collectors' label tuple, ordered by label name.
    pub fn label_set(&self) -> LabelSet {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    pub fn resolved_process_id(&self) -> u32 {
        self.process_id.unwrap_or_else(std::process::id)
    }
}
