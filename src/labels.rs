//! Label dimensions and concrete label tuples.
//!
//! A [`LabelSpace`] is declared once per primitive. Every observation carries a
//! [`LabelSet`] which must name exactly the same dimensions, in the same order.
//! The validated values become the [`LabelValues`] key of one series.

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};

/// Ordered dimension names fixed at primitive creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelSpace {
    names: Vec<String>,
}

impl LabelSpace {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Validate `labels` against this space and extract the series key.
    ///
    /// Arity, names and order must all match; nothing is allocated for the key
    /// until the check passes.
    pub fn resolve(&self, metric: &str, labels: &LabelSet) -> Result<LabelValues> {
        let matches = labels.pairs.len() == self.names.len()
            && self
                .names
                .iter()
                .zip(&labels.pairs)
                .all(|(expected, (name, _))| expected == name);
        if !matches {
            return Err(MetricsError::LabelMismatch {
                metric: metric.to_string(),
                expected: self.names.clone(),
                got: labels.names().map(str::to_string).collect(),
            });
        }
        Ok(LabelValues(
            labels.pairs.iter().map(|(_, v)| v.clone()).collect(),
        ))
    }
}

/// Concrete `name -> value` pairs supplied with an observation, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet {
    pairs: Vec<(String, String)>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one dimension.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((name.into(), value.into()));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(n, _)| n.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The label space these labels describe.
    pub fn space(&self) -> LabelSpace {
        LabelSpace::new(self.names())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Validated label values, the key of one series within a primitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelValues(pub Vec<String>);

impl LabelValues {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`, excluding the reserved `__` prefix.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let head_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    head_ok && !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> LabelSpace {
        LabelSpace::new(["model_name", "tp_rank"])
    }

    #[test]
    fn test_resolve_matching_labels() {
        let labels = LabelSet::new().with("model_name", "bitnet").with("tp_rank", "0");
        let key = space().resolve("m", &labels).unwrap();
        assert_eq!(key.as_slice(), &["bitnet".to_string(), "0".to_string()]);
    }

    #[test]
    fn test_resolve_missing_dimension() {
        let labels = LabelSet::new().with("model_name", "bitnet");
        let err = space().resolve("m", &labels).unwrap_err();
        assert!(matches!(err, MetricsError::LabelMismatch { .. }));
    }

    #[test]
    fn test_resolve_wrong_order() {
        let labels = LabelSet::new().with("tp_rank", "0").with("model_name", "bitnet");
        assert!(space().resolve("m", &labels).is_err());
    }

    #[test]
    fn test_resolve_wrong_name() {
        let labels = LabelSet::new().with("model_name", "bitnet").with("dp_rank", "0");
        assert!(space().resolve("m", &labels).is_err());
    }

    #[test]
    fn test_label_set_from_iter_and_space() {
        let labels: LabelSet = [("model_name", "mamba")].into_iter().collect();
        assert_eq!(labels.get("model_name"), Some("mamba"));
        assert_eq!(labels.space(), LabelSpace::new(["model_name"]));
    }

    #[test]
    fn test_label_name_validation() {
        assert!(is_valid_label_name("model_name"));
        assert!(is_valid_label_name("_x1"));
        assert!(!is_valid_label_name("1x"));
        assert!(!is_valid_label_name("__reserved"));
        assert!(!is_valid_label_name("model-name"));
        assert!(!is_valid_label_name(""));
    }
}
