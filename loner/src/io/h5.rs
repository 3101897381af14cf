//! HDF5 helpers shared by the loom and h5ad readers

use anyhow::{bail, Result};
use hdf5::types::{FixedAscii, VarLenAscii, VarLenUnicode};
use ndarray::Array2;

pub(crate) type FA = FixedAscii<256>;

pub(crate) fn make_fixed_ascii(s: &str) -> Result<FA> {
    Ok(FA::from_ascii(s)?)
}

/// Read a 1-d dataset of strings stored as variable-length UTF-8,
/// variable-length ASCII or fixed-length ASCII.
pub(crate) fn read_strings(dataset: &hdf5::Dataset) -> Result<Vec<String>> {
    if let Ok(values) = dataset.read_1d::<VarLenUnicode>() {
        return Ok(values.iter().map(|v| v.as_str().to_string()).collect());
    }
    if let Ok(values) = dataset.read_1d::<VarLenAscii>() {
        return Ok(values.iter().map(|v| v.as_str().to_string()).collect());
    }
    let values = dataset.read_1d::<FA>()?;
    Ok(values.iter().map(|v| v.as_str().to_string()).collect())
}

/// Read a scalar string attribute, if present.
pub(crate) fn read_string_attr(location: &hdf5::Location, name: &str) -> Option<String> {
    let attr = location.attr(name).ok()?;
    if let Ok(value) = attr.read_scalar::<VarLenUnicode>() {
        return Some(value.as_str().to_string());
    }
    if let Ok(value) = attr.read_scalar::<VarLenAscii>() {
        return Some(value.as_str().to_string());
    }
    attr.read_scalar::<FA>()
        .ok()
        .map(|v| v.as_str().to_string())
}

/// True if `group` has a member called `name`.
pub(crate) fn has_member(group: &hdf5::Group, name: &str) -> bool {
    group.link_exists(name)
}

/// Compressed sparse matrix orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Compressed {
    /// `indptr` runs over rows.
    Rows,
    /// `indptr` runs over columns.
    Columns,
}

pub(crate) mod sparse {
    pub(crate) const DATA: &str = "data";
    pub(crate) const INDICES: &str = "indices";
    pub(crate) const INDPTR: &str = "indptr";
    pub(crate) const SHAPE: &str = "shape";
    pub(crate) const LEGACY_SHAPE: &str = "h5sparse_shape";
}

/// Expand a compressed sparse matrix group into a dense `(rows, cols)` array.
pub(crate) fn read_compressed_dense(
    group: &hdf5::Group,
    orientation: Compressed,
) -> Result<Array2<f32>> {
    let shape = match group.attr(sparse::SHAPE) {
        Ok(attr) => attr.read_1d::<i64>()?,
        Err(_) => group.attr(sparse::LEGACY_SHAPE)?.read_1d::<i64>()?,
    };
    if shape.len() != 2 || shape.iter().any(|&d| d < 0) {
        bail!("invalid sparse matrix shape {shape:?}");
    }
    let (rows, cols) = (shape[0] as usize, shape[1] as usize);
    let data = group.dataset(sparse::DATA)?.read_1d::<f32>()?;
    let indices = group.dataset(sparse::INDICES)?.read_1d::<i64>()?;
    let indptr = group.dataset(sparse::INDPTR)?.read_1d::<i64>()?;

    let (major, minor) = match orientation {
        Compressed::Rows => (rows, cols),
        Compressed::Columns => (cols, rows),
    };
    if indptr.len() != major + 1 {
        bail!(
            "indptr has {} entries, expected {} for shape {rows}x{cols}",
            indptr.len(),
            major + 1
        );
    }
    if indices.len() != data.len() {
        bail!(
            "sparse matrix has {} indices for {} values",
            indices.len(),
            data.len()
        );
    }
    let nnz = data.len() as i64;
    if indptr[0] != 0 || indptr[major] != nnz {
        bail!("indptr must run from 0 to {nnz}");
    }
    if indptr.iter().zip(indptr.iter().skip(1)).any(|(a, b)| b < a) {
        bail!("indptr is not non-decreasing");
    }

    let mut dense = Array2::<f32>::zeros((rows, cols));
    for m in 0..major {
        let (start, end) = (indptr[m] as usize, indptr[m + 1] as usize);
        for k in start..end {
            let n = indices[k];
            if n < 0 || n as usize >= minor {
                bail!("sparse index {n} out of bounds for shape {rows}x{cols}");
            }
            let n = n as usize;
            match orientation {
                Compressed::Rows => dense[[m, n]] = data[k],
                Compressed::Columns => dense[[n, m]] = data[k],
            }
        }
    }
    Ok(dense)
}
