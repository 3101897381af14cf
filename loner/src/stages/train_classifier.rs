//! Stage TRAIN_CLASSIFIER: learn to separate observed cells from doublets in
//! the VAE's latent space.

use super::train_vae::map_row_chunks;
use super::StageContext;
use crate::config::ModelParams;
use crate::dataset::GeneExpressionDataset;
use crate::errors::LonerError;
use crate::models::{array_to_tensor, select_rows, Classifier, Noise, Vae};
use crate::train::{Direction, EarlyStopping, Trainer};
use crate::types::outputs;
use anyhow::Result;
use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::path::PathBuf;

const FINE_TUNE_LR_FACTOR: f64 = 0.1;
const N_LABELS: usize = 2;

pub struct TrainClassifierInputs<'a> {
    /// Observed cells, known doublets labelled 1.
    pub dataset: &'a GeneExpressionDataset,
    /// Simulated doublets, labelled 1.
    pub doublets: &'a GeneExpressionDataset,
    pub vae: &'a Vae,
    pub params: &'a ModelParams,
    pub random_seed: u64,
}

pub struct TrainClassifierOutputs {
    pub classifier: Classifier,
    pub varmap: VarMap,
    /// Posterior means of the observed cells followed by the doublets.
    pub features: Tensor,
    pub labels: Vec<u32>,
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub epochs_run: usize,
    pub classifier_file: PathBuf,
}

/// Posterior means `[z, l]` of every cell in `dataset`, computed in chunks.
/// The result is detached: the VAE stays frozen while the classifier trains.
fn encode(
    vae: &Vae,
    dataset: &GeneExpressionDataset,
    chunk: usize,
    ctx: &StageContext,
) -> Result<Tensor> {
    let x = array_to_tensor(&dataset.x, &ctx.device)?;
    map_row_chunks(dataset.num_cells(), chunk, |idx| {
        Ok(vae.posterior_means(&select_rows(&x, idx)?)?.detach())
    })
}

pub fn run(args: TrainClassifierInputs<'_>, ctx: &StageContext) -> Result<TrainClassifierOutputs> {
    let TrainClassifierInputs {
        dataset,
        doublets,
        vae,
        params,
        random_seed,
    } = args;
    let combined = dataset.concat(doublets)?;
    let found = combined.distinct_labels();
    if found != [0, 1] {
        return Err(LonerError::DegenerateLabels { found }.into());
    }

    let features = encode(vae, &combined, params.batch_size, ctx)?;
    let labels = combined.labels.clone();
    let labels_t = Tensor::from_vec(labels.clone(), labels.len(), &ctx.device)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &ctx.device);
    let classifier = Classifier::new(
        vae.config().n_latent + 1,
        params.cl_hidden,
        params.cl_layers,
        N_LABELS,
        params.dropout_rate,
        vb,
    )?;

    let mut trainer = Trainer::new(
        &varmap,
        combined.num_cells(),
        params.valid_pct,
        params.batch_size,
        EarlyStopping::new(params.patience, Direction::Maximize),
        Xoshiro256StarStar::seed_from_u64(random_seed),
    )?;
    let mut noise = Noise::new(random_seed.wrapping_add(1));

    let mut loss_fn = |idx: &[usize], _epoch: usize| -> Result<Tensor> {
        let x = select_rows(&features, idx)?;
        let y = select_rows(&labels_t, idx)?;
        Ok(classifier.loss(&x, &y, Some(&mut noise))?)
    };
    let mut metric_fn = |idx: &[usize]| -> Result<f64> {
        let y: Vec<u32> = idx.iter().map(|&i| labels[i]).collect();
        Ok(classifier.accuracy(&select_rows(&features, idx)?, &y)?)
    };

    info!(
        "training classifier on {} cells ({} observed, {} simulated doublets)",
        combined.num_cells(),
        dataset.num_cells(),
        doublets.num_cells()
    );
    trainer.train(
        params.classifier_epochs,
        params.learning_rate,
        &mut loss_fn,
        &mut metric_fn,
    )?;
    trainer.reset_wait();
    trainer.train(
        params.classifier_fine_tune_epochs,
        FINE_TUNE_LR_FACTOR * params.learning_rate,
        &mut loss_fn,
        &mut metric_fn,
    )?;
    if let Some(last) = trainer.history().last() {
        info!("classifier held-out accuracy {:.4}", last.score);
    }

    let classifier_file = ctx.make_path(outputs::CLASSIFIER);
    varmap.save(&classifier_file)?;

    let train_indices = trainer.train_indices().to_vec();
    let test_indices = trainer.test_indices().to_vec();
    let epochs_run = trainer.epoch();
    Ok(TrainClassifierOutputs {
        classifier,
        varmap,
        features,
        labels,
        train_indices,
        test_indices,
        epochs_run,
        classifier_file,
    })
}
