use std::sync::Arc;

use dashmap::DashMap;
use pacer::RollingAverage;

use crate::report::LabelReport;

/// Default per-label window; the runtime capacity comes from `--capacity`.
pub const DEFAULT_LABEL_CAPACITY: usize = 32;

pub type LabelAverage = RollingAverage<f64, DEFAULT_LABEL_CAPACITY>;

/// Rolling averages keyed by label.
pub struct SampleRegistry {
    // concurrent map so readers never wait on a global mutex while writers record
    averages: DashMap<String, Arc<LabelAverage>>,
    capacity: usize,
}

impl SampleRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            averages: DashMap::new(),
            capacity,
        }
    }

    /// Records `value` under `label` and returns the label's new mean.
    pub fn record(&self, label: &str, value: f64) -> f64 {
        // the read guard must be released before `entry` takes the shard's write lock
        let existing = self.averages.get(label).map(|e| Arc::clone(e.value()));
        let average = match existing {
            Some(average) => average,
            None => Arc::clone(
                self.averages
                    .entry(label.to_owned())
                    .or_insert_with(|| Arc::new(LabelAverage::with_capacity(self.capacity)))
                    .value(),
            ),
        };
        average.update(value)
    }

    pub fn len(&self) -> usize {
        self.averages.len()
    }

    /// Per-label summary, sorted by label.
    pub fn summary(&self) -> Vec<LabelReport> {
        // clone the handles first so no shard lock is held while each window is locked
        let snapshot: Vec<(String, Arc<LabelAverage>)> = self
            .averages
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut labels: Vec<LabelReport> = snapshot
            .into_iter()
            .map(|(label, avg)| LabelReport {
                label,
                samples: avg.len(),
                average: avg.get_average(),
                last: avg.get_last_value(),
            })
            .collect();
        labels.sort_by(|a, b| a.label.cmp(&b.label));
        labels
    }
}
