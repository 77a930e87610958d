//! Argument specifiers for batched sweeps whose later batches can depend on
//! the measured results of earlier ones.

mod args;
mod concat;
mod config;
mod dynamic;
mod error;
mod launch;
mod metrics;
mod product;
mod show;
mod specifier;
#[cfg(test)]
mod testing;

pub use args::{
    collapse, cross_join, union_keys, ArgumentSet, ArgumentSpecifier, Batch, CartesianProduct,
    Concatenate, KeyLayout, StaticArgs,
};
pub use concat::DynamicConcatenate;
pub use config::{load_plan, MetricsConfig, PlanNode, SweepPlan};
pub use dynamic::{Adaptive, AdaptiveState, DynamicSpecifier, Progress};
pub use error::{Composition, ConfigError, MetricLoadError};
pub use launch::{display_value, LaunchInfo, QueuedTemplate, SpecFileTemplate, TaskId, TaskTemplate};
pub use metrics::{DirectoryMetrics, MetricFormat, MetricLoaderFn, MetricRecord, MetricSource};
pub use product::DynamicCartesianProduct;
pub use show::render_batches;
pub use specifier::{concatenate, cross_product, DynamicSide, Specifier};
