use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::MetricLoadError;
use crate::launch::{LaunchInfo, TaskId};

pub type MetricRecord = Value;

pub type MetricLoaderFn = fn(&mut dyn Read) -> anyhow::Result<MetricRecord>;

/// How a metric file is decoded.
#[derive(Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricFormat {
    #[default]
    Json,
    Yaml,
    #[serde(skip)]
    Custom(MetricLoaderFn),
}

impl MetricFormat {
    pub fn decode(&self, reader: &mut dyn Read) -> anyhow::Result<MetricRecord> {
        match self {
            MetricFormat::Json => Ok(serde_json::from_reader(reader)?),
            MetricFormat::Yaml => Ok(serde_yaml::from_reader(reader)?),
            MetricFormat::Custom(load) => load(reader),
        }
    }
}

impl fmt::Debug for MetricFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricFormat::Json => f.write_str("Json"),
            MetricFormat::Yaml => f.write_str("Yaml"),
            MetricFormat::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Finds and decodes the metric artifacts produced by finished tasks.
pub trait MetricSource {
    fn load(
        &self,
        tids: &BTreeSet<TaskId>,
        info: &LaunchInfo,
    ) -> Result<Vec<MetricRecord>, MetricLoadError>;
}

/// Metric files live in `<root>/<directory>/` and are named `<prefix>-<tid>-*`.
#[derive(Debug, Clone)]
pub struct DirectoryMetrics {
    pub directory: String,
    pub prefix: String,
    pub format: MetricFormat,
}

impl Default for DirectoryMetrics {
    fn default() -> Self {
        Self {
            directory: "metrics".to_string(),
            prefix: "metric".to_string(),
            format: MetricFormat::Json,
        }
    }
}

impl DirectoryMetrics {
    pub fn with_format(format: MetricFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Where the metric files of a launch rooted at `root` are expected.
    pub fn metrics_dir(&self, root: &std::path::Path) -> PathBuf {
        root.join(&self.directory)
    }

    /// Every metric file of task `tid` starts with this.
    pub fn file_prefix(&self, tid: TaskId) -> String {
        format!("{}-{}-", self.prefix, tid)
    }

    fn list(&self, dir: &std::path::Path) -> Result<Vec<(String, PathBuf)>, MetricLoadError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| MetricLoadError::Io {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            files.push((name, entry.path().to_path_buf()));
        }
        Ok(files)
    }
}

impl MetricSource for DirectoryMetrics {
    fn load(
        &self,
        tids: &BTreeSet<TaskId>,
        info: &LaunchInfo,
    ) -> Result<Vec<MetricRecord>, MetricLoadError> {
        let dir = self.metrics_dir(&info.root_directory);
        fs::create_dir_all(&dir).map_err(|e| MetricLoadError::Io {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        let listing = self.list(&dir)?;

        let mut matched = Vec::new();
        let mut missing = Vec::new();
        for tid in tids {
            let prefix = self.file_prefix(*tid);
            let before = matched.len();
            matched.extend(
                listing
                    .iter()
                    .filter(|(name, _)| name.starts_with(&prefix))
                    .map(|(_, path)| path.clone()),
            );
            if matched.len() == before {
                missing.push(*tid);
            }
        }
        if matched.is_empty() && !tids.is_empty() {
            return Err(MetricLoadError::NoMetrics { dir });
        }
        if !missing.is_empty() {
            return Err(MetricLoadError::MissingTasks { dir, tids: missing });
        }

        let mut records = Vec::with_capacity(matched.len());
        for path in matched {
            let mut file = fs::File::open(&path).map_err(|source| MetricLoadError::Open {
                path: path.clone(),
                source,
            })?;
            let record = self
                .format
                .decode(&mut file)
                .map_err(|e| MetricLoadError::Decode {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            records.push(record);
        }
        Ok(records)
    }
}
