//! Cross-process merge of process-local metric state.
//!
//! Each worker hands over a [`ProcessState`] through whatever transport the
//! deployment uses. The aggregator keeps the latest state per process and
//! folds them on read:
//!
//! - counters and histograms: summed across processes
//! - gauges: the series with the newest write time wins
//!
//! Processes are folded in ascending id order and a gauge timestamp tie goes
//! to the later fold, so the result depends only on the states held, never on
//! the order `merge_from` was called in.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{MetricsError, Result};
use crate::labels::LabelValues;
use crate::registry::Registry;
use crate::snapshot::{MetricDesc, MetricFamily, ProcessState, Series, SeriesValue};

#[derive(Debug, Default)]
pub struct MultiProcessAggregator {
    processes: BTreeMap<u32, ProcessState>,
}

impl MultiProcessAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept (or replace) the state of `state.process_id`.
    ///
    /// The state is rejected as a whole if any family is malformed, appears
    /// twice in the state, or disagrees with a family of the same name already
    /// held.
    pub fn merge_from(&mut self, state: ProcessState) -> Result<()> {
        let mut names = BTreeSet::new();
        for family in &state.families {
            if !names.insert(family.desc.name.as_str()) {
                return Err(MetricsError::IncompatibleMetric {
                    metric: family.desc.name.clone(),
                    reason: format!("family listed twice by process {}", state.process_id),
                });
            }
            family.validate()?;
            for other in self
                .processes
                .values()
                .filter(|p| p.process_id != state.process_id)
            {
                if let Some(existing) = other.family(&family.desc.name) {
                    existing.desc.check_compatible(&family.desc)?;
                }
            }
        }
        tracing::debug!(
            process_id = state.process_id,
            families = state.families.len(),
            "merged process state"
        );
        self.processes.insert(state.process_id, state);
        Ok(())
    }

    /// Shorthand for merging a registry living in this process.
    pub fn merge_registry(&mut self, registry: &Registry) -> Result<()> {
        self.merge_from(registry.process_state())
    }

    /// Forget a process, e.g. after it exited.
    pub fn remove_process(&mut self, process_id: u32) -> Option<ProcessState> {
        self.processes.remove(&process_id)
    }

    pub fn process_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.processes.keys().copied()
    }

    /// The externally visible view: one family per name, sorted by name.
    pub fn merged(&self) -> Result<Vec<MetricFamily>> {
        let mut acc: BTreeMap<&str, (&MetricDesc, BTreeMap<&LabelValues, SeriesValue>)> =
            BTreeMap::new();
        for state in self.processes.values() {
            for family in &state.families {
                let (_, series) = acc
                    .entry(family.desc.name.as_str())
                    .or_insert_with(|| (&family.desc, BTreeMap::new()));
                for s in &family.series {
                    match series.get_mut(&s.labels) {
                        Some(existing) => existing.merge(&s.value, &family.desc.name)?,
                        None => {
                            series.insert(&s.labels, s.value.clone());
                        }
                    }
                }
            }
        }
        Ok(acc
            .into_values()
            .map(|(desc, series)| MetricFamily {
                desc: desc.clone(),
                series: series
                    .into_iter()
                    .map(|(labels, value)| Series {
                        labels: labels.clone(),
                        value,
                    })
                    .collect(),
            })
            .collect())
    }

    pub fn merged_family(&self, name: &str) -> Result<Option<MetricFamily>> {
        Ok(self.merged()?.into_iter().find(|f| f.desc.name == name))
    }
}
