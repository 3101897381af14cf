//! Dataset and annotation readers.

pub(crate) mod h5;
pub mod h5ad;
pub mod known_doublets;
pub mod loom;

use crate::dataset::GeneExpressionDataset;
use crate::errors::LonerError;
use anyhow::Result;
use log::info;
use std::path::Path;

pub use known_doublets::read_known_doublets;

/// Load a dataset, choosing the reader from the file extension.
pub fn load_dataset(path: &Path) -> Result<GeneExpressionDataset> {
    let dataset = match path.extension().and_then(|e| e.to_str()) {
        Some("loom") => loom::read_loom(path)?,
        Some("h5ad") => h5ad::read_h5ad(path)?,
        _ => {
            return Err(LonerError::UnsupportedFormat {
                path: path.to_path_buf(),
            }
            .into())
        }
    };
    info!(
        "loaded {} cells x {} genes from {path:?}",
        dataset.num_cells(),
        dataset.num_genes()
    );
    Ok(dataset)
}
