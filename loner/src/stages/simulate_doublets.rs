//! Stage SIMULATE_DOUBLETS

use crate::dataset::GeneExpressionDataset;
use crate::simulate::{doublet_dataset, num_doublets, simulate_doublets, DoubletType};
use anyhow::Result;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

pub struct SimulateDoubletsInputs<'a> {
    pub singlets: &'a GeneExpressionDataset,
    pub num_known_doublets: usize,
    pub doublet_ratio: f64,
    pub doublet_type: DoubletType,
    pub doublet_depth: f64,
    pub random_seed: u64,
}

pub struct SimulateDoubletsOutputs {
    /// Simulated cells, all labelled 1 and placed in batch 0.
    pub doublets: GeneExpressionDataset,
}

pub fn run(args: SimulateDoubletsInputs<'_>) -> Result<SimulateDoubletsOutputs> {
    let count = num_doublets(
        args.doublet_ratio,
        args.singlets.num_cells(),
        args.num_known_doublets,
    )?;
    let mut rng = Xoshiro256StarStar::seed_from_u64(args.random_seed);
    let x = simulate_doublets(
        args.singlets,
        count,
        args.doublet_type,
        args.doublet_depth,
        &mut rng,
    )?;
    Ok(SimulateDoubletsOutputs {
        doublets: doublet_dataset(x, args.singlets.gene_names.clone())?,
    })
}
