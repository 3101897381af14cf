//! Record how well a loner run recovers known doublets and flag regressions
//! against earlier runs of the same experiment.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use loner::io::h5ad::read_obs_bool;
use loner::logging::init_log;
use loner::plots::{tracking_plot, write_plot};
use loner::tracking::{
    append_record, by_experiment, compare_latest, read_records, TrackingRecord, Verdict,
};
use ndarray::Array1;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "track_performance")]
struct Args {
    /// `scores.npy` written by loner.
    #[arg(long)]
    scores: PathBuf,

    /// AnnData file holding the true doublet labels.
    #[arg(long)]
    truth: PathBuf,

    /// Boolean obs column of `--truth`.
    #[arg(long, default_value = "doublet_bool")]
    column: String,

    #[arg(long)]
    experiment: String,

    #[arg(long)]
    run: String,

    #[arg(long, default_value = "tracking_performance.csv")]
    tracking_csv: PathBuf,

    /// Directory for the per-experiment plots.
    #[arg(long, default_value = ".")]
    plot_dir: PathBuf,

    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_log(args.verbose);

    let scores: Array1<f32> = ndarray_npy::read_npy(&args.scores)
        .with_context(|| format!("reading scores {:?}", args.scores))?;
    let scores: Vec<f64> = scores.iter().map(|&s| f64::from(s)).collect();
    let truth = read_obs_bool(&args.truth, &args.column)?;
    let record = TrackingRecord::score(&args.experiment, &args.run, &scores, &truth)?;
    info!(
        "{} run {}: average precision {:.4}, AUROC {:.4}",
        record.experiment_name, record.experiment_number, record.average_precision, record.auroc
    );
    append_record(&args.tracking_csv, &record)?;

    let records = read_records(&args.tracking_csv)?;
    for (experiment, group) in by_experiment(&records) {
        let dates: Vec<String> = group.iter().map(|r| r.date.clone()).collect();
        let plot = tracking_plot(
            &dates,
            &[
                ("average precision", group.iter().map(|r| r.average_precision).collect()),
                ("AUROC", group.iter().map(|r| r.auroc).collect()),
            ],
        );
        write_plot(
            &plot,
            &args
                .plot_dir
                .join(format!("{experiment}_performance_tracking.html")),
        )?;

        let Some(changes) = compare_latest(&group) else {
            info!("{experiment}: fewer than two dates recorded, nothing to compare");
            continue;
        };
        for change in changes {
            info!(
                "{experiment}: mean {} changed by {:+.4} (p = {:.4})",
                change.metric, change.mean_change, change.pvalue
            );
            match change.verdict {
                Verdict::Worse => warn!(
                    "{experiment}: {} has gotten significantly worse",
                    change.metric
                ),
                Verdict::Better => info!(
                    "{experiment}: {} has gotten significantly better",
                    change.metric
                ),
                Verdict::Unchanged => {}
            }
        }
    }
    Ok(())
}
