//! The loner pipeline: load, train the VAE, simulate doublets, train the
//! classifier and call doublets, each stage in turn.

use crate::config::ModelParams;
use crate::models::select_device;
use crate::simulate::DoubletType;
use crate::stages::call_doublets::{CallDoubletsInputs, CallDoubletsOutputs};
use crate::stages::load_data::LoadDataInputs;
use crate::stages::simulate_doublets::SimulateDoubletsInputs;
use crate::stages::train_classifier::TrainClassifierInputs;
use crate::stages::train_vae::TrainVaeInputs;
use crate::stages::{
    call_doublets, load_data, simulate_doublets, train_classifier, train_vae, StageContext,
};
use crate::types::{outputs, RunMetrics};
use anyhow::{Context, Result};
use log::info;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineArgs {
    pub model_json: PathBuf,
    pub data_file: PathBuf,
    pub out_dir: PathBuf,
    pub doublet_depth: f64,
    pub doublet_ratio: f64,
    pub doublet_type: DoubletType,
    pub gpu: bool,
    pub seed_checkpoint: Option<PathBuf>,
    pub known_doublets: Option<PathBuf>,
    pub expected_doublets: Option<usize>,
    pub random_seed: u64,
}

pub struct PipelineOutputs {
    pub calls: CallDoubletsOutputs,
    pub metrics: RunMetrics,
}

/// Run one stage, logging its name and wall time.
fn run_stage<T>(name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    info!("running {name}");
    let start = Instant::now();
    let outs = f().with_context(|| format!("stage {name} failed"))?;
    info!("{name} finished in {:.1}s", start.elapsed().as_secs_f64());
    Ok(outs)
}

fn write_metrics(metrics: &RunMetrics, ctx: &StageContext) -> Result<()> {
    let path = ctx.make_path(outputs::METRICS);
    let file = File::create(&path).with_context(|| format!("creating {path:?}"))?;
    serde_json::to_writer_pretty(BufWriter::new(file), metrics)?;
    Ok(())
}

pub fn run_pipeline(args: &PipelineArgs) -> Result<PipelineOutputs> {
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating output directory {:?}", args.out_dir))?;
    let params = ModelParams::from_json(&args.model_json)?;
    let ctx = StageContext {
        out_dir: args.out_dir.clone(),
        device: select_device(args.gpu).context("selecting compute device")?,
    };
    info!("random seed {}", args.random_seed);
    let mut seeds = Xoshiro256StarStar::seed_from_u64(args.random_seed);
    let vae_seed: u64 = seeds.gen();
    let simulate_seed: u64 = seeds.gen();
    let classifier_seed: u64 = seeds.gen();

    let loaded = run_stage("LOAD_DATA", || {
        load_data::run(LoadDataInputs {
            data_file: args.data_file.clone(),
            known_doublets: args.known_doublets.clone(),
        })
    })?;
    info!(
        "{} cells x {} genes in {} batches",
        loaded.dataset.num_cells(),
        loaded.dataset.num_genes(),
        loaded.dataset.n_batches
    );

    let vae = run_stage("TRAIN_VAE", || {
        train_vae::run(
            TrainVaeInputs {
                singlets: &loaded.singlets,
                params: &params,
                seed_checkpoint: args.seed_checkpoint.clone(),
                random_seed: vae_seed,
            },
            &ctx,
        )
    })?;

    let simulated = run_stage("SIMULATE_DOUBLETS", || {
        simulate_doublets::run(SimulateDoubletsInputs {
            singlets: &loaded.singlets,
            num_known_doublets: loaded.num_known_doublets(),
            doublet_ratio: args.doublet_ratio,
            doublet_type: args.doublet_type,
            doublet_depth: args.doublet_depth,
            random_seed: simulate_seed,
        })
    })?;

    let classifier = run_stage("TRAIN_CLASSIFIER", || {
        train_classifier::run(
            TrainClassifierInputs {
                dataset: &loaded.dataset,
                doublets: &simulated.doublets,
                vae: &vae.vae,
                params: &params,
                random_seed: classifier_seed,
            },
            &ctx,
        )
    })?;

    let calls = run_stage("CALL_DOUBLETS", || {
        call_doublets::run(
            CallDoubletsInputs {
                classifier: &classifier.classifier,
                features: &classifier.features,
                labels: &classifier.labels,
                num_observed: loaded.dataset.num_cells(),
                known_doublets: &loaded.known_doublets,
                train_indices: &classifier.train_indices,
                test_indices: &classifier.test_indices,
                expected_doublets: args.expected_doublets,
                batch_size: params.batch_size,
            },
            &ctx,
        )
    })?;

    let metrics = RunMetrics {
        random_seed: args.random_seed,
        doublet_type: args.doublet_type,
        num_cells: loaded.dataset.num_cells(),
        num_genes: loaded.dataset.num_genes(),
        num_known_doublets: loaded.num_known_doublets(),
        num_simulated_doublets: simulated.doublets.num_cells(),
        vae_epochs_run: vae.epochs_run,
        classifier_epochs_run: classifier.epochs_run,
        train_accuracy: calls.train_accuracy,
        test_accuracy: calls.test_accuracy,
        train_auroc: calls.train_auroc,
        test_auroc: calls.test_auroc,
        threshold: calls.threshold,
        threshold_choice: calls.threshold_choice,
        num_called_doublets: calls.num_called_doublets(),
    };
    write_metrics(&metrics, &ctx)?;
    info!("outputs written to {:?}", ctx.out_dir());
    Ok(PipelineOutputs { calls, metrics })
}
