//! Stage TRAIN_VAE: fit the VAE on singlets, or load it from a checkpoint,
//! and save the latent representation of every singlet.

use super::StageContext;
use crate::config::ModelParams;
use crate::dataset::GeneExpressionDataset;
use crate::models::{select_rows, tensor_to_array, Noise, Vae, VaeConfig, VaeData};
use crate::train::{Direction, EarlyStopping, Trainer};
use crate::types::outputs;
use anyhow::{Context, Result};
use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};
use log::info;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::path::{Path, PathBuf};

const FINE_TUNE_LR_FACTOR: f64 = 0.1;

pub struct TrainVaeInputs<'a> {
    pub singlets: &'a GeneExpressionDataset,
    pub params: &'a ModelParams,
    /// Load weights from this checkpoint instead of training.
    pub seed_checkpoint: Option<PathBuf>,
    pub random_seed: u64,
}

pub struct TrainVaeOutputs {
    pub vae: Vae,
    pub varmap: VarMap,
    pub vae_file: Option<PathBuf>,
    pub latent_file: PathBuf,
    pub epochs_run: usize,
}

/// KL annealing weight at `epoch`.
pub fn kl_weight(epoch: usize, warmup_epochs: usize) -> f64 {
    if warmup_epochs == 0 {
        1.0
    } else {
        (epoch as f64 / warmup_epochs as f64).min(1.0)
    }
}

/// Apply `f` to consecutive chunks of `0..num_rows` and stack the results.
pub(crate) fn map_row_chunks<F>(num_rows: usize, chunk: usize, mut f: F) -> Result<Tensor>
where
    F: FnMut(&[usize]) -> Result<Tensor>,
{
    let indices: Vec<usize> = (0..num_rows).collect();
    let parts = indices
        .chunks(chunk.max(1))
        .map(&mut f)
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::cat(&parts, 0)?)
}

fn train(
    vae: &Vae,
    varmap: &VarMap,
    data: &VaeData,
    params: &ModelParams,
    random_seed: u64,
) -> Result<usize> {
    let mut trainer = Trainer::new(
        varmap,
        data.num_cells(),
        params.valid_pct,
        params.batch_size,
        EarlyStopping::new(params.patience, Direction::Minimize),
        Xoshiro256StarStar::seed_from_u64(random_seed),
    )?;
    let mut noise = Noise::new(random_seed.wrapping_add(1));
    let warmup = params.kl_warmup_epochs;
    let batch_size = params.batch_size;

    let mut loss_fn = |idx: &[usize], epoch: usize| -> Result<Tensor> {
        let batch = data.rows(idx)?;
        let loss = vae.loss(&batch, Some(&mut noise))?;
        Ok(loss.total(kl_weight(epoch, warmup))?)
    };
    // held-out reconstruction error, per cell
    let mut metric_fn = |idx: &[usize]| -> Result<f64> {
        let mut total = 0.0;
        for chunk in idx.chunks(batch_size) {
            let err = vae.loss(&data.rows(chunk)?, None)?.reconstruction_error()?;
            total += f64::from(err.sum_all()?.to_scalar::<f32>()?);
        }
        Ok(total / idx.len().max(1) as f64)
    };

    info!(
        "training VAE on {} cells ({} held out)",
        trainer.train_indices().len(),
        trainer.test_indices().len()
    );
    trainer.train(
        params.vae_epochs,
        params.learning_rate,
        &mut loss_fn,
        &mut metric_fn,
    )?;
    trainer.reset_wait();
    trainer.train(
        params.vae_fine_tune_epochs,
        FINE_TUNE_LR_FACTOR * params.learning_rate,
        &mut loss_fn,
        &mut metric_fn,
    )?;
    if let Some(last) = trainer.history().last() {
        info!("VAE held-out reconstruction error {:.4}", last.score);
    }
    Ok(trainer.epoch())
}

fn latent_beside(checkpoint: &Path) -> Option<PathBuf> {
    let candidate = checkpoint.parent()?.join(outputs::LATENT);
    candidate.is_file().then_some(candidate)
}

pub fn run(args: TrainVaeInputs<'_>, ctx: &StageContext) -> Result<TrainVaeOutputs> {
    let TrainVaeInputs {
        singlets,
        params,
        seed_checkpoint,
        random_seed,
    } = args;
    let config = VaeConfig::from_params(params, singlets.num_genes(), singlets.n_batches);
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &ctx.device);
    let vae = Vae::new(config, vb)?;
    let data = VaeData::new(singlets, config.n_batch, &ctx.device)?;
    let latent_file = ctx.make_path(outputs::LATENT);

    let (vae_file, epochs_run, latent_copied) = match seed_checkpoint {
        Some(checkpoint) => {
            info!("loading VAE parameters from {checkpoint:?}");
            varmap
                .load(&checkpoint)
                .with_context(|| format!("loading VAE checkpoint {checkpoint:?}"))?;
            let copied = match latent_beside(&checkpoint) {
                Some(src) if src != latent_file => {
                    std::fs::copy(&src, &latent_file)
                        .with_context(|| format!("copying {src:?}"))?;
                    true
                }
                _ => false,
            };
            (None, 0, copied)
        }
        None => {
            let epochs = train(&vae, &varmap, &data, params, random_seed)?;
            let vae_file = ctx.make_path(outputs::VAE);
            varmap.save(&vae_file)?;
            (Some(vae_file), epochs, false)
        }
    };

    if !latent_copied {
        let all = data.all();
        let latent = map_row_chunks(singlets.num_cells(), params.batch_size, |idx| {
            Ok(vae.latent(&select_rows(&all.x, idx)?)?)
        })?;
        ndarray_npy::write_npy(&latent_file, &tensor_to_array(&latent)?)?;
    }

    Ok(TrainVaeOutputs {
        vae,
        varmap,
        vae_file,
        latent_file,
        epochs_run,
    })
}
