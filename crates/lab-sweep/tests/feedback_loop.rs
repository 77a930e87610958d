use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use lab_sweep::{
    concatenate, cross_product, Adaptive, AdaptiveState, ArgumentSet, Batch, LaunchInfo,
    MetricRecord, Progress, QueuedTemplate, SpecFileTemplate, Specifier, StaticArgs, TaskId,
};
use serde_json::{json, Value};

/// Halves the learning rate while the mean loss keeps improving.
#[derive(Clone)]
struct HalvingSearch {
    lr: f64,
    best: Option<f64>,
    rounds: usize,
    max_rounds: usize,
}

impl HalvingSearch {
    fn new(max_rounds: usize) -> Self {
        Self {
            lr: 1.0,
            best: None,
            rounds: 0,
            max_rounds,
        }
    }
}

impl AdaptiveState for HalvingSearch {
    fn label(&self) -> String {
        "HalvingSearch".to_string()
    }

    fn constant_keys(&self) -> Vec<String> {
        Vec::new()
    }

    fn varying_keys(&self) -> Vec<String> {
        vec!["lr".to_string()]
    }

    fn next_batch(&mut self) -> Option<Batch> {
        let mut set = ArgumentSet::new();
        set.insert("lr".to_string(), json!(self.lr));
        Some(vec![set])
    }

    fn update_state(&mut self, records: Vec<MetricRecord>) -> Progress {
        let losses: Vec<f64> = records
            .iter()
            .filter_map(|r| r.get("loss").and_then(Value::as_f64))
            .collect();
        if losses.is_empty() {
            return Progress::Exhausted;
        }
        let mean = losses.iter().sum::<f64>() / losses.len() as f64;
        self.rounds += 1;
        let improved = self.best.map_or(true, |b| mean < b);
        if improved {
            self.best = Some(mean);
        }
        if !improved || self.rounds >= self.max_rounds {
            return Progress::Exhausted;
        }
        self.lr /= 2.0;
        Progress::Continue
    }
}

fn scratch_root(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "lab_sweep_it_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&dir).expect("scratch root");
    dir
}

/// Stand-in for the external runner: writes one metric file per task.
fn run_to_completion(
    spec: &mut Specifier,
    info: &LaunchInfo,
    loss: impl Fn(&ArgumentSet) -> f64,
) -> Vec<Batch> {
    let template = SpecFileTemplate::new(vec!["train".to_string()]);
    let metrics_dir = info.root_directory.join("metrics");
    fs::create_dir_all(&metrics_dir).expect("metrics dir");
    let mut next_tid: TaskId = 0;
    let mut produced = Vec::new();
    while let Some(batch) = spec.next() {
        let ids: Vec<TaskId> = (next_tid..next_tid + batch.len() as TaskId).collect();
        next_tid += batch.len() as TaskId;
        let batch_info = info.for_batch(produced.len(), ids.clone());
        for (tid, args) in ids.iter().zip(batch.iter()) {
            template.specify(args, *tid, &batch_info).expect("spec file");
            let record = json!({"loss": loss(args)});
            fs::write(
                metrics_dir.join(format!("metric-{}-run.json", tid)),
                record.to_string(),
            )
            .expect("metric file");
        }
        produced.push(batch);
        let completed: BTreeSet<TaskId> = ids.into_iter().collect();
        spec.update(&completed, &batch_info);
    }
    produced
}

fn seeds() -> Specifier {
    Specifier::from_static(StaticArgs::list("seed", vec![json!(1), json!(2), json!(3)]))
}

#[test]
fn product_search_stops_when_loss_stops_improving() {
    let root = scratch_root("product");
    let search = Specifier::from_dynamic(Adaptive::new(HalvingSearch::new(10)));
    let mut spec = cross_product(search, Some(seeds())).expect("valid product");
    assert_eq!(spec.schedule(), None);
    let info = LaunchInfo::new(&root, "halving", &spec);
    assert_eq!(info.varying_keys, vec!["lr".to_string(), "seed".to_string()]);

    // Loss is best around lr = 0.25.
    let batches = run_to_completion(&mut spec, &info, |args| {
        let lr = args["lr"].as_f64().unwrap_or(0.0);
        (lr - 0.25).abs()
    });
    let lrs: Vec<f64> = batches
        .iter()
        .map(|b| b[0]["lr"].as_f64().unwrap_or(-1.0))
        .collect();
    assert_eq!(lrs, vec![1.0, 0.5, 0.25, 0.125]);
    assert!(batches.iter().all(|b| b.len() == 3));
    assert!(root.join("specifications").join("spec-11.json").is_file());
    let _ = fs::remove_dir_all(root);
}

#[test]
fn concatenated_baseline_runs_after_search() {
    let root = scratch_root("concat");
    let search = Specifier::from_dynamic(Adaptive::new(HalvingSearch::new(2)));
    let baseline = Specifier::from_static(StaticArgs::list("lr", vec![json!(0.0)]));
    let mut spec = concatenate(search, Some(baseline)).expect("valid concat");
    let info = LaunchInfo::new(&root, "baseline", &spec);

    let batches = run_to_completion(&mut spec, &info, |_| 1.0);
    let lrs: Vec<f64> = batches
        .iter()
        .map(|b| b[0]["lr"].as_f64().unwrap_or(-1.0))
        .collect();
    // Constant loss: the second round does not improve, then the baseline runs once.
    assert_eq!(lrs, vec![1.0, 0.5, 0.0]);
    let _ = fs::remove_dir_all(root);
}

#[test]
fn missing_metric_files_end_the_run_instead_of_failing() {
    let root = scratch_root("missing");
    let search = Specifier::from_dynamic(Adaptive::new(HalvingSearch::new(10)));
    let mut spec = cross_product(search, Some(seeds())).expect("valid product");
    let info = LaunchInfo::new(&root, "missing", &spec);

    let batch = spec.next().expect("first batch");
    assert_eq!(batch.len(), 3);
    let completed: BTreeSet<TaskId> = [0, 1, 2].into_iter().collect();
    spec.update(&completed, &info.for_batch(0, vec![0, 1, 2]));
    assert!(spec.next().is_none());
    assert!(root.join("metrics").is_dir());
    let _ = fs::remove_dir_all(root);
}
