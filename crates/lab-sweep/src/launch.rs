use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::args::ArgumentSet;
use crate::specifier::Specifier;

pub type TaskId = u64;

/// Launch metadata handed to templates and back to `update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchInfo {
    pub root_directory: PathBuf,
    pub batch_name: String,
    #[serde(default)]
    pub batch_tag: String,
    #[serde(default)]
    pub batch_description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub batch_index: usize,
    #[serde(default)]
    pub task_ids: Vec<TaskId>,
    pub constant_keys: Vec<String>,
    pub varying_keys: Vec<String>,
    #[serde(default)]
    pub constant_items: BTreeMap<String, Value>,
}

impl LaunchInfo {
    pub fn new(root_directory: impl Into<PathBuf>, batch_name: &str, spec: &Specifier) -> Self {
        Self {
            root_directory: root_directory.into(),
            batch_name: batch_name.to_string(),
            batch_tag: String::new(),
            batch_description: String::new(),
            timestamp: Utc::now(),
            batch_index: 0,
            task_ids: Vec::new(),
            constant_keys: spec.constant_keys(),
            varying_keys: spec.varying_keys(),
            constant_items: spec.constant_items(),
        }
    }

    /// Record used when previewing commands before anything is launched.
    pub fn placeholder(spec: &Specifier) -> Self {
        let mut info = Self::new("<root_directory>", "<batch_name>", spec);
        info.batch_tag = "<batch_tag>".to_string();
        info.batch_description = "<batch_description>".to_string();
        info
    }

    pub fn for_batch(&self, batch_index: usize, task_ids: Vec<TaskId>) -> Self {
        Self {
            batch_index,
            task_ids,
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    pub fn specifications_dir(&self) -> PathBuf {
        self.root_directory.join("specifications")
    }
}

/// Turns one argument set into a runnable command line.
pub trait TaskTemplate {
    fn command(&self, args: &ArgumentSet, tid: TaskId, info: &LaunchInfo) -> Result<Vec<String>>;
}

/// A template whose arguments are read from a file at run time, so tasks can
/// be queued before the arguments are known.
pub trait QueuedTemplate: TaskTemplate {
    fn specify(&self, args: &ArgumentSet, tid: TaskId, info: &LaunchInfo) -> Result<PathBuf>;

    fn queue(&self, tid: TaskId, info: &LaunchInfo) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecFileTemplate {
    pub executable: Vec<String>,
    pub flag: String,
}

impl SpecFileTemplate {
    pub fn new(executable: Vec<String>) -> Self {
        Self {
            executable,
            flag: "--spec".to_string(),
        }
    }

    pub fn spec_path(&self, tid: TaskId, info: &LaunchInfo) -> PathBuf {
        info.specifications_dir().join(format!("spec-{}.json", tid))
    }
}

impl TaskTemplate for SpecFileTemplate {
    fn command(&self, args: &ArgumentSet, _tid: TaskId, info: &LaunchInfo) -> Result<Vec<String>> {
        if self.executable.is_empty() {
            return Err(anyhow!("spec file template has no executable"));
        }
        let mut cmd = self.executable.clone();
        let ordered = info.constant_keys.iter().chain(info.varying_keys.iter());
        for key in ordered {
            if let Some(v) = args.get(key) {
                cmd.push(format!("--{}={}", key, display_value(v)));
            }
        }
        Ok(cmd)
    }
}

impl QueuedTemplate for SpecFileTemplate {
    fn specify(&self, args: &ArgumentSet, tid: TaskId, info: &LaunchInfo) -> Result<PathBuf> {
        let path = self.spec_path(tid, info);
        let payload = json!({
            "schema_version": "task_spec_v1",
            "tid": tid,
            "batch_name": info.batch_name,
            "batch_index": info.batch_index,
            "arguments": args,
        });
        atomic_write_json_pretty(&path, &payload)?;
        Ok(path)
    }

    fn queue(&self, tid: TaskId, info: &LaunchInfo) -> Result<Vec<String>> {
        if self.executable.is_empty() {
            return Err(anyhow!("spec file template has no executable"));
        }
        let mut cmd = self.executable.clone();
        cmd.push(self.flag.clone());
        cmd.push(self.spec_path(tid, info).to_string_lossy().to_string());
        Ok(cmd)
    }
}

/// Strings print bare, everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::StaticArgs;
    use crate::testing::scratch_dir;

    fn spec() -> Specifier {
        let args = StaticArgs::new(vec![
            [("model".to_string(), json!("mlp")), ("lr".to_string(), json!(0.1))]
                .into_iter()
                .collect(),
            [("model".to_string(), json!("mlp")), ("lr".to_string(), json!(0.2))]
                .into_iter()
                .collect(),
        ]);
        Specifier::from_static(args)
    }

    #[test]
    fn info_captures_key_partition_and_batch_bounds() {
        let spec = spec();
        let info = LaunchInfo::new("/tmp/run", "sweep", &spec);
        assert_eq!(info.constant_keys, vec!["model".to_string()]);
        assert_eq!(info.varying_keys, vec!["lr".to_string()]);
        assert_eq!(info.constant_items.get("model"), Some(&json!("mlp")));

        let batch = info.for_batch(2, vec![10, 11]);
        assert_eq!(batch.batch_index, 2);
        assert_eq!(batch.task_ids, vec![10, 11]);
        assert_eq!(batch.root_directory, info.root_directory);
    }

    #[test]
    fn command_orders_constant_keys_first() {
        let spec = spec();
        let info = LaunchInfo::placeholder(&spec);
        let template = SpecFileTemplate::new(vec!["python".to_string(), "train.py".to_string()]);
        let mut args = ArgumentSet::new();
        args.insert("lr".to_string(), json!(0.1));
        args.insert("model".to_string(), json!("mlp"));
        let cmd = template.command(&args, 0, &info).expect("command");
        assert_eq!(cmd, vec!["python", "train.py", "--model=mlp", "--lr=0.1"]);
    }

    #[test]
    fn specify_writes_file_named_by_tid_and_queue_points_at_it() {
        let root = scratch_dir("launch_specify");
        let spec = spec();
        let info = LaunchInfo::new(&root, "sweep", &spec).for_batch(0, vec![4]);
        let template = SpecFileTemplate::new(vec!["runner".to_string()]);
        let mut args = ArgumentSet::new();
        args.insert("lr".to_string(), json!(0.2));

        let path = template.specify(&args, 4, &info).expect("specify");
        assert_eq!(path, root.join("specifications").join("spec-4.json"));
        let written: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written["tid"], json!(4));
        assert_eq!(written["arguments"]["lr"], json!(0.2));

        let queued = template.queue(4, &info).expect("queue");
        assert_eq!(queued[0], "runner");
        assert_eq!(queued[1], "--spec");
        assert_eq!(queued[2], path.to_string_lossy());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn combined_key_appears_once_in_command() {
        use crate::specifier::concatenate;
        use crate::testing::ladder;

        let baseline = Specifier::from_static(StaticArgs::list("x", vec![json!(0.5)]));
        let spec = concatenate(Specifier::from_dynamic(ladder("x", 2, 1)), Some(baseline))
            .expect("concat");
        let info = LaunchInfo::new("/runs", "mixed", &spec);
        assert!(info.constant_items.is_empty());
        let args: ArgumentSet = [("x".to_string(), json!(0.5))].into_iter().collect();
        let cmd = SpecFileTemplate::new(vec!["run".to_string()])
            .command(&args, 0, &info)
            .expect("command");
        assert_eq!(cmd, vec!["run".to_string(), "--x=0.5".to_string()]);
    }

    #[test]
    fn empty_executable_is_rejected() {
        let spec = spec();
        let info = LaunchInfo::placeholder(&spec);
        let template = SpecFileTemplate::new(Vec::new());
        assert!(template.queue(1, &info).is_err());
        assert!(template.command(&ArgumentSet::new(), 1, &info).is_err());
    }
}
