//! Known doublet annotations: one boolean per cell in the first column of a
//! headerless tab-separated file, in the same order as the data.

use crate::errors::LonerError;
use anyhow::{Context, Result};
use std::path::Path;

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "True" | "true" | "TRUE" | "1" => Some(true),
        "False" | "false" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

/// Read the known doublet mask and check it covers `num_cells` cells.
pub fn read_known_doublets(path: &Path, num_cells: usize) -> Result<Vec<bool>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening known doublets {path:?}"))?;

    let mut mask = Vec::with_capacity(num_cells);
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading {path:?}"))?;
        let value = record.get(0).unwrap_or_default();
        let flag = parse_flag(value).ok_or_else(|| LonerError::KnownDoubletsParse {
            path: path.to_path_buf(),
            line: line + 1,
            value: value.to_string(),
        })?;
        mask.push(flag);
    }

    if mask.len() != num_cells {
        return Err(LonerError::KnownDoubletsLength {
            path: path.to_path_buf(),
            expected: num_cells,
            found: mask.len(),
        }
        .into());
    }
    Ok(mask)
}
