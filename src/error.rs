use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Label mismatch on {metric}: expected {expected:?}, got {got:?}")]
    LabelMismatch {
        metric: String,
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("Invalid observation on {metric}: {reason}")]
    InvalidObservation { metric: String, reason: String },

    #[error("Metric already registered: {0}")]
    DuplicateMetric(String),

    #[error("Invalid buckets for {metric}: {reason}")]
    InvalidBuckets { metric: String, reason: String },

    #[error("Incompatible metric {metric}: {reason}")]
    IncompatibleMetric { metric: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MetricsError>;

/// Count of observations a collector discarded instead of failing its caller.
#[derive(Debug, Default)]
pub(crate) struct DroppedObservations(AtomicU64);

impl DroppedObservations {
    /// Swallow an observation error: log it, count it, move on.
    pub(crate) fn check(&self, result: Result<()>) {
        if let Err(err) = result {
            self.0.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "dropped metric observation");
        }
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
