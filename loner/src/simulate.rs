//! In-silico doublet simulation.

use crate::dataset::GeneExpressionDataset;
use crate::errors::LonerError;
use anyhow::Result;
use log::info;
use ndarray::{Array2, ArrayView1};
use rand::Rng;
use rand::SeedableRng;
use rand_distr::{Binomial, Distribution};
use rand_xoshiro::Xoshiro256StarStar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum::Display;

/// How two singlet profiles are merged into one doublet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DoubletType {
    /// Resample the pooled profile at a chosen depth.
    #[default]
    Multinomial,
    /// Mean of the two profiles.
    Average,
    /// Sum of the two profiles.
    Sum,
}

/// Number of doublets to simulate so that simulated plus known doublets
/// reach `doublet_ratio` times the number of singlets.
pub fn num_doublets(
    doublet_ratio: f64,
    num_singlets: usize,
    num_known: usize,
) -> Result<usize, LonerError> {
    let requested = (doublet_ratio * num_singlets as f64).floor() as usize;
    requested
        .checked_sub(num_known)
        .ok_or(LonerError::NegativeDoubletCount {
            requested,
            known: num_known,
        })
}

/// Draw `depth` counts from a multinomial with probabilities proportional to
/// `weights`, one conditional binomial per category.
fn sample_multinomial<R: Rng>(weights: &[f64], depth: u64, rng: &mut R) -> Result<Vec<f32>> {
    let mut out = vec![0f32; weights.len()];
    let Some(last) = weights.iter().rposition(|&w| w > 0.0) else {
        return Ok(out);
    };
    let mut mass: f64 = weights.iter().sum();
    let mut remaining = depth;
    for (k, &w) in weights.iter().enumerate().take(last) {
        if remaining == 0 {
            break;
        }
        if w <= 0.0 {
            continue;
        }
        let p = (w / mass).clamp(0.0, 1.0);
        let draw = Binomial::new(remaining, p)?.sample(rng);
        out[k] = draw as f32;
        remaining -= draw;
        mass -= w;
    }
    out[last] = remaining as f32;
    Ok(out)
}

fn make_doublet(
    a: ArrayView1<'_, f32>,
    b: ArrayView1<'_, f32>,
    depth: u64,
    doublet_type: DoubletType,
    seed: u64,
) -> Result<Vec<f32>> {
    let pooled = a.iter().zip(b.iter()).map(|(&u, &v)| u + v);
    match doublet_type {
        DoubletType::Sum => Ok(pooled.collect()),
        DoubletType::Average => Ok(pooled.map(|v| v / 2.0).collect()),
        DoubletType::Multinomial => {
            let weights: Vec<f64> = pooled.map(f64::from).collect();
            let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
            sample_multinomial(&weights, depth, &mut rng)
        }
    }
}

/// Simulate `num_doublets` doublets from pairs of cells of `singlets`, drawn
/// uniformly with replacement. Multinomial doublets have depth
/// `floor(doublet_depth * (depth_i + depth_j) / 2)`.
pub fn simulate_doublets<R: Rng>(
    singlets: &GeneExpressionDataset,
    num_doublets: usize,
    doublet_type: DoubletType,
    doublet_depth: f64,
    rng: &mut R,
) -> Result<Array2<f32>> {
    let num_cells = singlets.num_cells();
    let num_genes = singlets.num_genes();
    if num_doublets == 0 {
        return Ok(Array2::zeros((0, num_genes)));
    }
    if num_cells == 0 {
        anyhow::bail!("cannot simulate doublets from an empty dataset");
    }
    let depths = singlets.cell_depths();

    // pairs and sub-seeds are drawn up front so the output only depends on `rng`
    let draws: Vec<(usize, usize, u64)> = (0..num_doublets)
        .map(|_| {
            let i = rng.gen_range(0..num_cells);
            let j = rng.gen_range(0..num_cells);
            (i, j, rng.gen())
        })
        .collect();

    let rows: Vec<Vec<f32>> = draws
        .par_iter()
        .map(|&(i, j, seed)| {
            let depth = (doublet_depth * (depths[i] + depths[j]) / 2.0).floor().max(0.0) as u64;
            make_doublet(
                singlets.x.row(i),
                singlets.x.row(j),
                depth,
                doublet_type,
                seed,
            )
        })
        .collect::<Result<_>>()?;

    info!("simulated {num_doublets} {doublet_type} doublets from {num_cells} cells");
    Ok(Array2::from_shape_vec(
        (num_doublets, num_genes),
        rows.into_iter().flatten().collect(),
    )?)
}

/// Wrap simulated profiles as a dataset of label-1 cells in batch 0.
pub fn doublet_dataset(
    x: Array2<f32>,
    gene_names: Vec<String>,
) -> Result<GeneExpressionDataset, LonerError> {
    Ok(GeneExpressionDataset::single_batch(x, gene_names)?.with_label(1))
}
