use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::launch::TaskId;

/// The two ways specifiers can be composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composition {
    Concatenate,
    CartesianProduct,
}

impl Composition {
    pub fn as_str(self) -> &'static str {
        match self {
            Composition::Concatenate => "concatenate",
            Composition::CartesianProduct => "take the cartesian product of",
        }
    }

    pub fn infix(self) -> &'static str {
        match self {
            Composition::Concatenate => "+",
            Composition::CartesianProduct => "*",
        }
    }
}

impl fmt::Display for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction-time failures. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cannot {operation} two dynamic specifiers: {first} {} {second}", .operation.infix())]
    BothDynamic {
        operation: Composition,
        first: String,
        second: String,
    },
    #[error("cannot {operation} without a dynamic specifier; use the static combinator")]
    NoDynamicSide { operation: Composition },
    #[error(
        "varying keys cannot overlap between specifiers in a cartesian product: {}",
        .keys.join(", ")
    )]
    KeyOverlap { keys: Vec<String> },
}

/// Why the metric files for a set of tasks could not be turned into records.
#[derive(Debug, Error)]
pub enum MetricLoadError {
    #[error("metrics directory {} is not accessible: {reason}", .path.display())]
    Io { path: PathBuf, reason: String },
    #[error("no metric files found in {}", .dir.display())]
    NoMetrics { dir: PathBuf },
    #[error("no metric file in {} for tasks {tids:?}", .dir.display())]
    MissingTasks { dir: PathBuf, tids: Vec<TaskId> },
    #[error("cannot open metric file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode metric file {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },
}

impl MetricLoadError {
    /// True when the files simply are not there (yet), as opposed to being unreadable.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            MetricLoadError::NoMetrics { .. } | MetricLoadError::MissingTasks { .. }
        )
    }
}
