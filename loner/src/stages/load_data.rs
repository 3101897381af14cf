//! Stage LOAD_DATA: read the count matrix and separate known doublets.

use crate::dataset::GeneExpressionDataset;
use crate::io::{load_dataset, read_known_doublets};
use anyhow::Result;
use log::info;
use std::path::PathBuf;

pub struct LoadDataInputs {
    pub data_file: PathBuf,
    pub known_doublets: Option<PathBuf>,
}

pub struct LoadDataOutputs {
    /// Every observed cell; known doublets carry label 1.
    pub dataset: GeneExpressionDataset,
    /// Observed cells not known to be doublets.
    pub singlets: GeneExpressionDataset,
    pub known_doublets: Vec<bool>,
}

impl LoadDataOutputs {
    pub fn num_known_doublets(&self) -> usize {
        self.known_doublets.iter().filter(|&&k| k).count()
    }
}

pub fn run(args: LoadDataInputs) -> Result<LoadDataOutputs> {
    let mut dataset = load_dataset(&args.data_file)?;
    let num_cells = dataset.num_cells();

    let Some(known_file) = args.known_doublets else {
        let singlets = dataset.clone();
        return Ok(LoadDataOutputs {
            dataset,
            singlets,
            known_doublets: vec![false; num_cells],
        });
    };

    info!("removing known doublets listed in {known_file:?} before simulating doublets");
    let known_doublets = read_known_doublets(&known_file, num_cells)?;
    for (label, &known) in dataset.labels.iter_mut().zip(&known_doublets) {
        if known {
            *label = 1;
        }
    }
    let keep: Vec<bool> = known_doublets.iter().map(|&k| !k).collect();
    let singlets = dataset.subset(&keep)?;
    info!(
        "{} known doublets, {} remaining cells",
        num_cells - singlets.num_cells(),
        singlets.num_cells()
    );
    Ok(LoadDataOutputs {
        dataset,
        singlets,
        known_doublets,
    })
}
