use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::args::{ArgumentSet, Batch, StaticArgs};
use crate::metrics::{DirectoryMetrics, MetricFormat};
use crate::specifier::{concatenate, cross_product, Specifier};

const PLAN_SCHEMA_VERSION: &str = "sweep_plan_v1";

#[derive(Debug, Clone, Deserialize)]
pub struct SweepPlan {
    pub schema_version: String,
    pub specifier: PlanNode,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Declarative description of a static specifier tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanNode {
    List { key: String, values: Vec<Value> },
    Args { sets: Vec<ArgumentSet> },
    Groups { groups: Vec<Batch> },
    Concat { first: Box<PlanNode>, second: Box<PlanNode> },
    Product { first: Box<PlanNode>, second: Box<PlanNode> },
}

impl PlanNode {
    pub fn build(&self) -> Result<Specifier> {
        let spec = match self {
            PlanNode::List { key, values } => {
                Specifier::from_static(StaticArgs::list(key, values.clone()))
            }
            PlanNode::Args { sets } => Specifier::from_static(StaticArgs::new(sets.clone())),
            PlanNode::Groups { groups } => {
                Specifier::from_static(StaticArgs::grouped(groups.clone()))
            }
            PlanNode::Concat { first, second } => {
                concatenate(first.build()?, Some(second.build()?))?
            }
            PlanNode::Product { first, second } => {
                cross_product(first.build()?, Some(second.build()?))?
            }
        };
        Ok(spec)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub format: MetricFormat,
    #[serde(default = "MetricsConfig::default_prefix")]
    pub prefix: String,
    #[serde(default = "MetricsConfig::default_directory")]
    pub directory: String,
}

impl MetricsConfig {
    fn default_prefix() -> String {
        "metric".to_string()
    }

    fn default_directory() -> String {
        "metrics".to_string()
    }

    pub fn source(&self) -> DirectoryMetrics {
        DirectoryMetrics {
            directory: self.directory.clone(),
            prefix: self.prefix.clone(),
            format: self.format,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            format: MetricFormat::default(),
            prefix: Self::default_prefix(),
            directory: Self::default_directory(),
        }
    }
}

/// Reads a plan from JSON, or YAML when the extension says so.
pub fn load_plan(path: &Path) -> Result<SweepPlan> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("cannot read plan {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let plan: SweepPlan = if is_yaml {
        serde_yaml::from_str(&data)
            .with_context(|| format!("invalid plan {}", path.display()))?
    } else {
        serde_json::from_str(&data)
            .with_context(|| format!("invalid plan {}", path.display()))?
    };
    if plan.schema_version != PLAN_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported plan schema_version: {}",
            plan.schema_version
        ));
    }
    Ok(plan)
}
