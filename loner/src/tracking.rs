//! Benchmark tracking: score a run against ground truth, append it to a
//! CSV history and test whether the latest runs moved the metrics.

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use stats::{average_precision_score, mann_whitney_u, roc_auc_score};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::Path;

/// Hour resolution; runs within the same hour are grouped together.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H";
const SIGNIFICANCE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub date: String,
    pub experiment_name: String,
    pub experiment_number: String,
    pub average_precision: f64,
    #[serde(rename = "AUROC")]
    pub auroc: f64,
}

impl TrackingRecord {
    /// Score `scores` against `truth`, stamped with the current hour.
    pub fn score(
        experiment_name: &str,
        experiment_number: &str,
        scores: &[f64],
        truth: &[bool],
    ) -> Result<Self> {
        anyhow::ensure!(
            scores.len() == truth.len(),
            "{} scores but {} truth labels",
            scores.len(),
            truth.len()
        );
        let average_precision = average_precision_score(truth, scores)
            .context("no true doublets in the ground truth")?;
        let auroc =
            roc_auc_score(truth, scores).context("ground truth holds a single class")?;
        Ok(TrackingRecord {
            date: Local::now().format(DATE_FORMAT).to_string(),
            experiment_name: experiment_name.to_string(),
            experiment_number: experiment_number.to_string(),
            average_precision,
            auroc,
        })
    }
}

/// Append `record` to the CSV at `path`, writing the header for a new file.
pub fn append_record(path: &Path, record: &TrackingRecord) -> Result<()> {
    let is_new = std::fs::metadata(path).map_or(true, |m| m.len() == 0);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {path:?}"))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    writer.serialize(record)?;
    writer.flush()?;
    Ok(())
}

pub fn read_records(path: &Path) -> Result<Vec<TrackingRecord>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("opening {path:?}"))?;
    reader
        .deserialize()
        .collect::<Result<Vec<TrackingRecord>, _>>()
        .with_context(|| format!("parsing {path:?}"))
}

/// Records grouped by experiment name, each group in file order.
pub fn by_experiment(records: &[TrackingRecord]) -> BTreeMap<&str, Vec<&TrackingRecord>> {
    let mut groups: BTreeMap<&str, Vec<&TrackingRecord>> = BTreeMap::new();
    for r in records {
        groups.entry(r.experiment_name.as_str()).or_default().push(r);
    }
    groups
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Worse,
    Better,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricChange {
    pub metric: &'static str,
    pub mean_change: f64,
    pub pvalue: f64,
    pub verdict: Verdict,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Compare the runs of the most recent date against those of the date
/// before it. `None` with fewer than two distinct dates.
pub fn compare_latest(group: &[&TrackingRecord]) -> Option<Vec<MetricChange>> {
    let mut dates: Vec<&str> = group.iter().map(|r| r.date.as_str()).collect();
    dates.sort_unstable();
    dates.dedup();
    let [.., previous, latest] = dates.as_slice() else {
        return None;
    };
    let metrics: [(&'static str, fn(&TrackingRecord) -> f64); 2] = [
        ("AUROC", |r| r.auroc),
        ("average_precision", |r| r.average_precision),
    ];
    let changes = metrics
        .iter()
        .filter_map(|&(metric, get)| {
            let values_on = |date: &str| -> Vec<f64> {
                group.iter().filter(|r| r.date == date).map(|r| get(r)).collect()
            };
            let recent = values_on(*latest);
            let before = values_on(*previous);
            let pvalue = mann_whitney_u(&recent, &before)?.pvalue;
            let mean_change = mean(&recent) - mean(&before);
            let verdict = match (pvalue < SIGNIFICANCE, mean_change) {
                (true, c) if c < 0.0 => Verdict::Worse,
                (true, c) if c > 0.0 => Verdict::Better,
                _ => Verdict::Unchanged,
            };
            Some(MetricChange {
                metric,
                mean_change,
                pvalue,
                verdict,
            })
        })
        .collect();
    Some(changes)
}
