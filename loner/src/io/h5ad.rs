//! Reader for AnnData (`.h5ad`) files. Every cell is placed in batch 0.

use super::h5::{has_member, read_compressed_dense, read_string_attr, read_strings, Compressed};
use crate::dataset::GeneExpressionDataset;
use anyhow::{bail, Context, Result};
use hdf5::types::TypeDescriptor;
use log::{debug, warn};
use ndarray::Array2;
use std::path::Path;

pub(crate) const X: &str = "X";
pub(crate) const ENCODING_TYPE: &str = "encoding-type";
pub(crate) const LEGACY_FORMAT: &str = "h5sparse_format";

pub(crate) mod obs {
    pub(crate) const GROUP: &str = "obs";
}

pub(crate) mod var {
    pub(crate) const GROUP: &str = "var";
    pub(crate) const INDEX_ATTR: &str = "_index";
    pub(crate) const DEFAULT_INDEX: &str = "_index";
}

fn sparse_orientation(group: &hdf5::Group) -> Result<Compressed> {
    let encoding = read_string_attr(group, ENCODING_TYPE)
        .or_else(|| read_string_attr(group, LEGACY_FORMAT))
        .unwrap_or_else(|| "csr_matrix".to_string());
    match encoding.as_str() {
        "csr_matrix" | "csr" => Ok(Compressed::Rows),
        "csc_matrix" | "csc" => Ok(Compressed::Columns),
        other => bail!("unsupported sparse encoding '{other}' for /{X}"),
    }
}

fn read_x(file: &hdf5::File) -> Result<Array2<f32>> {
    if let Ok(dataset) = file.dataset(X) {
        debug!("reading dense /{X}");
        return Ok(dataset.read_2d::<f32>()?);
    }
    let group = file.group(X).with_context(|| format!("no /{X} in file"))?;
    let orientation = sparse_orientation(&group)?;
    debug!("reading sparse /{X} as {orientation:?}");
    read_compressed_dense(&group, orientation)
}

fn read_gene_names(file: &hdf5::File, num_genes: usize) -> Result<Vec<String>> {
    let fallback = || (0..num_genes).map(|i| format!("gene_{i}")).collect();
    if !has_member(file, var::GROUP) {
        return Ok(fallback());
    }
    let var_group = file.group(var::GROUP)?;
    let index = read_string_attr(&var_group, var::INDEX_ATTR)
        .unwrap_or_else(|| var::DEFAULT_INDEX.to_string());
    if !has_member(&var_group, &index) {
        warn!("/{}/{index} not found, naming genes by position", var::GROUP);
        return Ok(fallback());
    }
    let names = read_strings(&var_group.dataset(&index)?)?;
    if names.len() != num_genes {
        bail!("found {} gene names for {num_genes} genes", names.len());
    }
    Ok(names)
}

/// Load an AnnData file with cells as rows.
pub fn read_h5ad(path: &Path) -> Result<GeneExpressionDataset> {
    let file = hdf5::File::open(path).with_context(|| format!("opening {path:?}"))?;
    let x = read_x(&file).with_context(|| format!("reading expression from {path:?}"))?;
    let gene_names = read_gene_names(&file, x.ncols())
        .with_context(|| format!("reading gene names from {path:?}"))?;
    Ok(GeneExpressionDataset::single_batch(x, gene_names)?)
}

/// Read the boolean per-cell column `obs/<column>`. Integer columns are
/// accepted with nonzero meaning true.
pub fn read_obs_bool(path: &Path, column: &str) -> Result<Vec<bool>> {
    let file = hdf5::File::open(path).with_context(|| format!("opening {path:?}"))?;
    let name = format!("{}/{column}", obs::GROUP);
    let dataset = file
        .dataset(&name)
        .with_context(|| format!("no /{name} in {path:?}"))?;
    if let TypeDescriptor::Boolean = dataset.dtype()?.to_descriptor()? {
        return Ok(dataset.read_raw::<bool>()?);
    }
    let values = dataset
        .read_raw::<i64>()
        .with_context(|| format!("/{name} is neither boolean nor integer"))?;
    Ok(values.into_iter().map(|v| v != 0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::h5::sparse;
    use hdf5::types::VarLenUnicode;
    use ndarray::array;
    use std::str::FromStr;

    fn write_var(file: &hdf5::File, genes: &[&str]) -> Result<()> {
        let group = file.create_group(var::GROUP)?;
        let names: Vec<VarLenUnicode> = genes
            .iter()
            .map(|g| VarLenUnicode::from_str(g))
            .collect::<Result<_, _>>()?;
        group
            .new_dataset::<VarLenUnicode>()
            .shape((names.len(),))
            .create(var::DEFAULT_INDEX)?
            .write(&names)?;
        Ok(())
    }

    #[test]
    fn test_read_dense() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dense.h5ad");
        let x = array![[0.0f32, 2.0, 1.0], [4.0, 0.0, 0.0]];
        {
            let file = hdf5::File::create(&path)?;
            file.new_dataset::<f32>().shape(x.dim()).create(X)?.write(&x)?;
            write_var(&file, &["A", "B", "C"])?;
        }
        let ds = read_h5ad(&path)?;
        assert_eq!(ds.x, x);
        assert_eq!(ds.gene_names, vec!["A", "B", "C"]);
        assert_eq!(ds.batch_indices, vec![0, 0]);
        Ok(())
    }

    fn write_sparse(path: &Path, encoding: &str, indices: &[i64], indptr: &[i64]) -> Result<()> {
        let file = hdf5::File::create(path)?;
        let group = file.create_group(X)?;
        let data = [1.0f32, 2.0, 3.0];
        group
            .new_dataset::<f32>()
            .shape((data.len(),))
            .create(sparse::DATA)?
            .write(&data[..])?;
        group
            .new_dataset::<i64>()
            .shape((indices.len(),))
            .create(sparse::INDICES)?
            .write(indices)?;
        group
            .new_dataset::<i64>()
            .shape((indptr.len(),))
            .create(sparse::INDPTR)?
            .write(indptr)?;
        group
            .new_attr::<i64>()
            .shape((2,))
            .create(sparse::SHAPE)?
            .write(&[2i64, 3][..])?;
        group
            .new_attr::<VarLenUnicode>()
            .create(ENCODING_TYPE)?
            .write_scalar(&VarLenUnicode::from_str(encoding)?)?;
        Ok(())
    }

    #[test]
    fn test_read_csr_and_csc() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let expected = array![[1.0f32, 0.0, 2.0], [0.0, 3.0, 0.0]];

        let csr = dir.path().join("csr.h5ad");
        write_sparse(&csr, "csr_matrix", &[0, 2, 1], &[0, 2, 3])?;
        let ds = read_h5ad(&csr)?;
        assert_eq!(ds.x, expected);
        // no var group
        assert_eq!(ds.gene_names, vec!["gene_0", "gene_1", "gene_2"]);

        let csc = dir.path().join("csc.h5ad");
        write_sparse(&csc, "csc_matrix", &[0, 1, 0], &[0, 1, 2, 3])?;
        assert_eq!(read_h5ad(&csc)?.x, expected);
        Ok(())
    }

    #[test]
    fn test_malformed_sparse_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cases: [(&str, &[i64], &[i64]); 4] = [
            // indptr runs past the stored values
            ("past_end.h5ad", &[0, 2, 1], &[0, 2, 5]),
            // decreasing indptr
            ("decreasing.h5ad", &[0, 2, 1], &[0, 4, 3]),
            ("negative_index.h5ad", &[0, -1, 1], &[0, 2, 3]),
            ("short_indices.h5ad", &[0, 2], &[0, 2, 3]),
        ];
        for (name, indices, indptr) in cases {
            let path = dir.path().join(name);
            write_sparse(&path, "csr_matrix", indices, indptr)?;
            assert!(read_h5ad(&path).is_err(), "{name} should be rejected");
        }
        Ok(())
    }

    #[test]
    fn test_read_obs_bool() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("truth.h5ad");
        {
            let file = hdf5::File::create(&path)?;
            let group = file.create_group(obs::GROUP)?;
            group
                .new_dataset::<bool>()
                .shape((3,))
                .create("doublet_bool")?
                .write(&[true, false, true][..])?;
            group
                .new_dataset::<u8>()
                .shape((2,))
                .create("flag")?
                .write(&[0u8, 3][..])?;
        }
        assert_eq!(read_obs_bool(&path, "doublet_bool")?, vec![true, false, true]);
        assert_eq!(read_obs_bool(&path, "flag")?, vec![false, true]);
        assert!(read_obs_bool(&path, "missing").is_err());
        Ok(())
    }
}
