//! loner: doublet detection for single-cell RNA-seq count matrices.

use anyhow::Result;
use clap::Parser;
use loner::logging::init_log;
use loner::pipeline::{run_pipeline, PipelineArgs};
use loner::simulate::DoubletType;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "loner", about = "Find doublets in single-cell RNA-seq data")]
struct Args {
    /// JSON file of model hyperparameters.
    model_json: PathBuf,

    /// Count matrix, `.loom` or `.h5ad`.
    data_file: PathBuf,

    /// Depth multiplier for multinomial doublets.
    #[arg(short = 'd', long, default_value_t = 1.0)]
    doublet_depth: f64,

    /// Train on the first CUDA device.
    #[arg(short = 'g', long)]
    gpu: bool,

    #[arg(short = 'o', long, default_value = "loner_out")]
    out_dir: PathBuf,

    /// Doublets to simulate, relative to the number of singlets.
    #[arg(short = 'r', long, default_value_t = 1.0)]
    doublet_ratio: f64,

    /// Load VAE parameters from this checkpoint instead of training.
    #[arg(short = 's', long)]
    seed: Option<PathBuf>,

    /// One True/False line per cell marking known doublets.
    #[arg(short = 'k', long)]
    known_doublets: Option<PathBuf>,

    #[arg(short = 't', long, value_enum, default_value_t = DoubletType::Multinomial)]
    doublet_type: DoubletType,

    /// Call this many doublets instead of thresholding at 0.5.
    #[arg(short = 'e', long)]
    expected_doublets: Option<usize>,

    /// Seed for every random draw; chosen at random when absent.
    #[arg(long)]
    random_seed: Option<u64>,

    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_log(args.verbose);

    let pipeline_args = PipelineArgs {
        model_json: args.model_json,
        data_file: args.data_file,
        out_dir: args.out_dir,
        doublet_depth: args.doublet_depth,
        doublet_ratio: args.doublet_ratio,
        doublet_type: args.doublet_type,
        gpu: args.gpu,
        seed_checkpoint: args.seed,
        known_doublets: args.known_doublets,
        expected_doublets: args.expected_doublets,
        random_seed: args.random_seed.unwrap_or_else(rand::random),
    };
    let outs = run_pipeline(&pipeline_args)?;
    log::info!(
        "{} of {} cells called as doublets",
        outs.metrics.num_called_doublets,
        outs.metrics.num_cells
    );
    Ok(())
}
