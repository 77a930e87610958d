use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;

use crate::args::{ArgumentSet, Batch};
use crate::dynamic::{Adaptive, AdaptiveState, Progress};
use crate::error::MetricLoadError;
use crate::launch::{LaunchInfo, TaskId};
use crate::metrics::{MetricRecord, MetricSource};

pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "lab_sweep_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&dir).expect("scratch dir");
    dir
}

pub fn info_for(root: impl AsRef<Path>) -> LaunchInfo {
    LaunchInfo {
        root_directory: root.as_ref().to_path_buf(),
        batch_name: "test".to_string(),
        batch_tag: String::new(),
        batch_description: String::new(),
        timestamp: Utc::now(),
        batch_index: 0,
        task_ids: Vec::new(),
        constant_keys: Vec::new(),
        varying_keys: Vec::new(),
        constant_items: BTreeMap::new(),
    }
}

pub fn tids(ids: &[TaskId]) -> BTreeSet<TaskId> {
    ids.iter().copied().collect()
}

/// Returns `count` identical records, or fails every load.
#[derive(Debug, Clone)]
pub struct CannedMetrics {
    count: usize,
    fail: bool,
}

impl CannedMetrics {
    pub fn ok(count: usize) -> Self {
        Self { count, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            count: 0,
            fail: true,
        }
    }
}

impl MetricSource for CannedMetrics {
    fn load(
        &self,
        _tids: &BTreeSet<TaskId>,
        info: &LaunchInfo,
    ) -> Result<Vec<MetricRecord>, MetricLoadError> {
        if self.fail {
            return Err(MetricLoadError::NoMetrics {
                dir: info.root_directory.join("metrics"),
            });
        }
        Ok(vec![json!({"score": 1.0}); self.count])
    }
}

/// Walks `key` through 0..rounds, one step per round of feedback, emitting
/// `width` replicas per step.
#[derive(Debug, Clone)]
pub struct Ladder {
    pub key: String,
    pub rounds: usize,
    pub width: usize,
    pub position: usize,
    pub updates: usize,
    pub predictable: bool,
}

impl Ladder {
    pub fn new(key: &str, rounds: usize, width: usize) -> Self {
        Self {
            key: key.to_string(),
            rounds,
            width,
            position: 0,
            updates: 0,
            predictable: true,
        }
    }

    pub fn unpredictable(mut self) -> Self {
        self.predictable = false;
        self
    }

    fn replica_key(&self) -> String {
        format!("{}_rep", self.key)
    }
}

impl AdaptiveState for Ladder {
    fn label(&self) -> String {
        format!("Ladder({})", self.key)
    }

    fn constant_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn varying_keys(&self) -> Vec<String> {
        vec![self.key.clone(), self.replica_key()]
    }

    fn next_batch(&mut self) -> Option<Batch> {
        if self.position >= self.rounds {
            return None;
        }
        let batch = (0..self.width)
            .map(|i| {
                let mut set = ArgumentSet::new();
                set.insert(self.key.clone(), json!(self.position));
                set.insert(self.replica_key(), json!(i));
                set
            })
            .collect();
        Some(batch)
    }

    fn schedule(&self) -> Option<Vec<usize>> {
        if !self.predictable {
            return None;
        }
        Some(vec![self.width; self.rounds.saturating_sub(self.position)])
    }

    fn update_state(&mut self, _records: Vec<MetricRecord>) -> Progress {
        self.updates += 1;
        self.position += 1;
        if self.position >= self.rounds {
            Progress::Exhausted
        } else {
            Progress::Continue
        }
    }
}

pub fn ladder(key: &str, rounds: usize, width: usize) -> Adaptive<Ladder, CannedMetrics> {
    Adaptive::with_metrics(Ladder::new(key, rounds, width), CannedMetrics::ok(1))
}
