use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::args::{ArgumentSpecifier, Batch};
use crate::launch::{LaunchInfo, TaskId};
use crate::metrics::{DirectoryMetrics, MetricRecord, MetricSource};

/// A specifier whose later batches depend on the measured results of earlier ones.
pub trait DynamicSpecifier: ArgumentSpecifier {
    /// Predicted sizes of the batches still to come, or `None` when they
    /// cannot be known in advance.
    fn schedule(&self) -> Option<Vec<usize>>;

    /// Feeds back the results of the tasks in `tids`. Failures end the
    /// iteration instead of surfacing here.
    fn update(&mut self, tids: &BTreeSet<TaskId>, info: &LaunchInfo);

    fn copy_dynamic(&self) -> Box<dyn DynamicSpecifier>;
}

impl Clone for Box<dyn DynamicSpecifier> {
    fn clone(&self) -> Self {
        self.copy_dynamic()
    }
}

/// Outcome of consuming one round of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    Exhausted,
}

/// The search logic of an adaptive specifier. [`Adaptive`] takes care of
/// loading metrics and of the iteration protocol around it.
pub trait AdaptiveState: Clone + 'static {
    fn label(&self) -> String {
        "Adaptive".to_string()
    }

    fn constant_keys(&self) -> Vec<String>;

    fn varying_keys(&self) -> Vec<String>;

    fn constant_items(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    /// The batch for the current point, or `None` when the search is over.
    fn next_batch(&mut self) -> Option<Batch>;

    fn schedule(&self) -> Option<Vec<usize>> {
        None
    }

    /// Moves to the next point using the metrics of the last batch.
    fn update_state(&mut self, records: Vec<MetricRecord>) -> Progress;
}

#[derive(Clone)]
pub struct Adaptive<S, M = DirectoryMetrics> {
    state: S,
    metrics: M,
    exhausted: bool,
    awaiting_feedback: bool,
}

impl<S: AdaptiveState> Adaptive<S> {
    pub fn new(state: S) -> Self {
        Self::with_metrics(state, DirectoryMetrics::default())
    }
}

impl<S: AdaptiveState, M: MetricSource + Clone + 'static> Adaptive<S, M> {
    pub fn with_metrics(state: S, metrics: M) -> Self {
        Self {
            state,
            metrics,
            exhausted: false,
            awaiting_feedback: false,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl<S: AdaptiveState, M: MetricSource + Clone + 'static> Iterator for Adaptive<S, M> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.exhausted {
            return None;
        }
        if self.awaiting_feedback {
            debug!(
                specifier = %self.state.label(),
                "batch requested before feedback for the previous one"
            );
            self.exhausted = true;
            return None;
        }
        match self.state.next_batch() {
            Some(batch) => {
                self.awaiting_feedback = true;
                Some(batch)
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}

impl<S: AdaptiveState, M: MetricSource + Clone + 'static> ArgumentSpecifier for Adaptive<S, M> {
    fn constant_keys(&self) -> Vec<String> {
        self.state.constant_keys()
    }

    fn varying_keys(&self) -> Vec<String> {
        self.state.varying_keys()
    }

    fn constant_items(&self) -> BTreeMap<String, Value> {
        self.state.constant_items()
    }

    fn label(&self) -> String {
        self.state.label()
    }

    fn copy(&self) -> Box<dyn ArgumentSpecifier> {
        Box::new(self.clone())
    }
}

impl<S: AdaptiveState, M: MetricSource + Clone + 'static> DynamicSpecifier for Adaptive<S, M> {
    fn schedule(&self) -> Option<Vec<usize>> {
        if self.exhausted {
            return Some(Vec::new());
        }
        self.state.schedule()
    }

    fn update(&mut self, tids: &BTreeSet<TaskId>, info: &LaunchInfo) {
        if self.exhausted {
            debug!(specifier = %self.state.label(), "ignoring update after exhaustion");
            return;
        }
        if !self.awaiting_feedback {
            debug!(specifier = %self.state.label(), "no batch awaiting feedback; ignoring update");
            return;
        }
        self.awaiting_feedback = false;
        let records = match self.metrics.load(tids, info) {
            Ok(records) => records,
            Err(err) if err.is_missing() => {
                warn!(
                    specifier = %self.state.label(),
                    error = %err,
                    "required metric files were not written; cannot continue"
                );
                self.exhausted = true;
                return;
            }
            Err(err) => {
                warn!(
                    specifier = %self.state.label(),
                    error = %err,
                    "cannot read metric files; cannot continue"
                );
                self.exhausted = true;
                return;
            }
        };
        if records.is_empty() {
            debug!(specifier = %self.state.label(), "no metric records; stopping");
            self.exhausted = true;
            return;
        }
        if self.state.update_state(records) == Progress::Exhausted {
            debug!(specifier = %self.state.label(), "search reported no further points");
            self.exhausted = true;
        }
    }

    fn copy_dynamic(&self) -> Box<dyn DynamicSpecifier> {
        Box::new(self.clone())
    }
}
