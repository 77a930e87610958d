use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use lab_sweep::{
    DirectoryMetrics, LaunchInfo, MetricsConfig, QueuedTemplate, SpecFileTemplate, Specifier,
    TaskId,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lab", version = "0.3.0", about = "Sweep plan previews")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Show {
        plan: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Schedule {
        plan: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Specify {
        plan: PathBuf,
        #[arg(long)]
        root: PathBuf,
        #[arg(long, default_value = "sweep")]
        batch_name: String,
        #[arg(long, num_args = 1.., required = true)]
        executable: Vec<String>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Show { plan, json } => {
            let (spec, _) = build_plan(&plan)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "show",
                    "label": spec.label(),
                    "dynamic": spec.is_dynamic(),
                    "constant_keys": spec.constant_keys(),
                    "varying_keys": spec.varying_keys(),
                    "batches": spec.preview(),
                })));
            }
            spec.show();
        }
        Commands::Schedule { plan, json } => {
            let (spec, _) = build_plan(&plan)?;
            let schedule = spec.schedule();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "schedule",
                    "label": spec.label(),
                    "schedule": schedule,
                })));
            }
            println!("specifier: {}", spec.label());
            match schedule {
                Some(sizes) => {
                    let total: usize = sizes.iter().sum();
                    println!("batches: {}", sizes.len());
                    println!("sizes: {:?}", sizes);
                    println!("total_tasks: {}", total);
                }
                None => println!("schedule: unknown"),
            }
        }
        Commands::Specify {
            plan,
            root,
            batch_name,
            executable,
            json,
        } => {
            let (spec, metrics) = build_plan(&plan)?;
            let source = metrics.source();
            let queued = write_specifications(spec, &root, &batch_name, executable)?;
            let metrics_dir = source.metrics_dir(&root);
            if json {
                let tasks: Vec<Value> = queued
                    .iter()
                    .map(|(tid, path, cmd)| {
                        json!({
                            "tid": tid,
                            "spec_path": path.display().to_string(),
                            "metric_files": metric_location(&source, &root, *tid),
                            "queue": cmd,
                        })
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "specify",
                    "root": root.display().to_string(),
                    "metrics_dir": metrics_dir.display().to_string(),
                    "tasks": tasks,
                })));
            }
            println!("metrics: {}", metrics_dir.display());
            for (tid, _, cmd) in &queued {
                println!("{}: {}", tid, shell_join(cmd));
            }
        }
    }
    Ok(None)
}

fn build_plan(path: &Path) -> Result<(Specifier, MetricsConfig)> {
    let plan = lab_sweep::load_plan(path)?;
    debug!(plan = %path.display(), metrics = ?plan.metrics, "loaded plan");
    Ok((plan.specifier.build()?, plan.metrics))
}

/// Where a runner has to leave the metric files of `tid`.
fn metric_location(source: &DirectoryMetrics, root: &Path, tid: TaskId) -> String {
    format!(
        "{}/{}*",
        source.metrics_dir(root).display(),
        source.file_prefix(tid)
    )
}

/// Writes a specification file per argument set of a static plan and returns
/// the queue command for each task.
fn write_specifications(
    spec: Specifier,
    root: &Path,
    batch_name: &str,
    executable: Vec<String>,
) -> Result<Vec<(TaskId, PathBuf, Vec<String>)>> {
    if spec.is_dynamic() {
        return Err(anyhow!(
            "specify needs a fully static plan; {} depends on feedback",
            spec.label()
        ));
    }
    let template = SpecFileTemplate::new(executable);
    let info = LaunchInfo::new(root, batch_name, &spec);
    let mut out = Vec::new();
    let mut next_tid: TaskId = 0;
    for (batch_index, batch) in spec.enumerate() {
        let tids: Vec<TaskId> = (next_tid..next_tid + batch.len() as TaskId).collect();
        next_tid += batch.len() as TaskId;
        let batch_info = info.for_batch(batch_index, tids.clone());
        for (tid, args) in tids.into_iter().zip(batch.iter()) {
            let path = template.specify(args, tid, &batch_info)?;
            let cmd = template.queue(tid, &batch_info)?;
            out.push((tid, path, cmd));
        }
    }
    Ok(out)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Show { json, .. }
        | Commands::Schedule { json, .. }
        | Commands::Specify { json, .. } => *json,
    }
}

fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}
