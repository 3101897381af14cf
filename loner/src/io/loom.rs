//! Reader for loom files.

use super::h5::{has_member, read_strings};
use crate::dataset::{remap_batches, GeneExpressionDataset};
use anyhow::{bail, Context, Result};
use log::info;
use std::path::Path;

pub(crate) const MATRIX: &str = "matrix";

pub(crate) mod row_attrs {
    pub(crate) const GROUP: &str = "row_attrs";
    pub(crate) const GENE: &str = "Gene";
}

pub(crate) mod col_attrs {
    pub(crate) const GROUP: &str = "col_attrs";
    pub(crate) const BATCH_ID: &str = "BatchID";
}

/// Load a loom file. The stored matrix is genes x cells and is transposed.
pub fn read_loom(path: &Path) -> Result<GeneExpressionDataset> {
    let file = hdf5::File::open(path).with_context(|| format!("opening {path:?}"))?;
    let matrix = file
        .dataset(MATRIX)
        .with_context(|| format!("reading /{MATRIX} from {path:?}"))?
        .read_2d::<f32>()?;
    let x = matrix.reversed_axes().as_standard_layout().into_owned();
    let (num_cells, num_genes) = x.dim();

    let gene_names = if has_member(&file, row_attrs::GROUP)
        && has_member(&file.group(row_attrs::GROUP)?, row_attrs::GENE)
    {
        let names = read_strings(&file.group(row_attrs::GROUP)?.dataset(row_attrs::GENE)?)?;
        if names.len() != num_genes {
            bail!(
                "{path:?} has {} gene names for {num_genes} genes",
                names.len()
            );
        }
        names
    } else {
        (0..num_genes).map(|i| format!("gene_{i}")).collect()
    };

    let batch_indices = if has_member(&file, col_attrs::GROUP)
        && has_member(&file.group(col_attrs::GROUP)?, col_attrs::BATCH_ID)
    {
        let raw = file
            .group(col_attrs::GROUP)?
            .dataset(col_attrs::BATCH_ID)?
            .read_1d::<i64>()?
            .to_vec();
        if raw.len() != num_cells {
            bail!("{path:?} has {} batch ids for {num_cells} cells", raw.len());
        }
        let (indices, n_batches) = remap_batches(&raw);
        info!("found {n_batches} batches in {path:?}");
        indices
    } else {
        vec![0; num_cells]
    };

    Ok(GeneExpressionDataset::new(x, gene_names, batch_indices)?)
}
