//! In-memory gene expression dataset shared by every stage.

use crate::errors::LonerError;
use anyhow::Result;
use log::warn;
use ndarray::{concatenate, Array1, Array2, Axis};
use std::collections::BTreeMap;

/// Cells x genes count matrix with the per-cell metadata the models need.
#[derive(Debug, Clone)]
pub struct GeneExpressionDataset {
    /// Counts, one row per cell.
    pub x: Array2<f32>,
    pub gene_names: Vec<String>,
    /// Contiguous batch index of each cell, in `0..n_batches`.
    pub batch_indices: Vec<u32>,
    /// 0 for observed cells, 1 for (known or simulated) doublets.
    pub labels: Vec<u32>,
    pub n_batches: usize,
    /// Mean of the log library size over the cell's batch.
    pub local_means: Vec<f32>,
    /// Variance of the log library size over the cell's batch.
    pub local_vars: Vec<f32>,
}

/// Per-cell mean and variance of `ln(depth)` within each batch.
pub fn library_size(x: &Array2<f32>, batch_indices: &[u32]) -> (Vec<f32>, Vec<f32>) {
    let depths = x.sum_axis(Axis(1));
    let mut empty = 0usize;
    let log_depths: Vec<f64> = depths
        .iter()
        .map(|&d| {
            if d <= 0.0 {
                empty += 1;
                0.0
            } else {
                f64::from(d).ln()
            }
        })
        .collect();
    if empty > 0 {
        warn!("{empty} cells have no counts; treating their depth as 1");
    }

    let mut per_batch: BTreeMap<u32, (f64, f64, usize)> = BTreeMap::new();
    for (&b, &ld) in batch_indices.iter().zip(&log_depths) {
        let entry = per_batch.entry(b).or_insert((0.0, 0.0, 0));
        entry.0 += ld;
        entry.1 += ld * ld;
        entry.2 += 1;
    }
    let stats: BTreeMap<u32, (f32, f32)> = per_batch
        .into_iter()
        .map(|(b, (sum, sum_sq, n))| {
            let n = n as f64;
            let mean = sum / n;
            let var = (sum_sq / n - mean * mean).max(0.0);
            (b, (mean as f32, var as f32))
        })
        .collect();
    batch_indices.iter().map(|b| stats[b]).unzip()
}

/// Map arbitrary batch identifiers onto `0..n`, preserving their sort order.
pub fn remap_batches(raw: &[i64]) -> (Vec<u32>, usize) {
    let mut distinct: Vec<i64> = raw.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    let index: BTreeMap<i64, u32> = distinct
        .iter()
        .enumerate()
        .map(|(i, &b)| (b, i as u32))
        .collect();
    (raw.iter().map(|b| index[b]).collect(), distinct.len())
}

fn check_len(
    what: &'static str,
    of: &'static str,
    expected: usize,
    found: usize,
) -> Result<(), LonerError> {
    if expected == found {
        Ok(())
    } else {
        Err(LonerError::ShapeMismatch {
            what,
            of,
            expected,
            found,
        })
    }
}

impl GeneExpressionDataset {
    /// Build a dataset with every cell labelled 0.
    pub fn new(
        x: Array2<f32>,
        gene_names: Vec<String>,
        batch_indices: Vec<u32>,
    ) -> Result<Self, LonerError> {
        check_len("batch indices", "cells", x.nrows(), batch_indices.len())?;
        check_len("gene names", "genes", x.ncols(), gene_names.len())?;
        let n_batches = batch_indices
            .iter()
            .max()
            .map_or(1, |&b| b as usize + 1);
        let (local_means, local_vars) = library_size(&x, &batch_indices);
        let labels = vec![0; x.nrows()];
        Ok(GeneExpressionDataset {
            x,
            gene_names,
            batch_indices,
            labels,
            n_batches,
            local_means,
            local_vars,
        })
    }

    /// A dataset in a single batch.
    pub fn single_batch(x: Array2<f32>, gene_names: Vec<String>) -> Result<Self, LonerError> {
        let batch_indices = vec![0; x.nrows()];
        Self::new(x, gene_names, batch_indices)
    }

    pub fn num_cells(&self) -> usize {
        self.x.nrows()
    }

    pub fn num_genes(&self) -> usize {
        self.x.ncols()
    }

    /// Total counts of each cell.
    pub fn cell_depths(&self) -> Array1<f64> {
        self.x.map_axis(Axis(1), |row| row.iter().map(|&v| f64::from(v)).sum())
    }

    /// Keep the cells where `keep` is true. Library-size priors are
    /// recomputed over the retained cells.
    pub fn subset(&self, keep: &[bool]) -> Result<Self, LonerError> {
        check_len("keep flags", "cells", self.num_cells(), keep.len())?;
        let rows: Vec<usize> = (0..keep.len()).filter(|&i| keep[i]).collect();
        let x = self.x.select(Axis(0), &rows);
        let batch_indices = rows.iter().map(|&i| self.batch_indices[i]).collect();
        let mut subset = Self::new(x, self.gene_names.clone(), batch_indices)?;
        subset.n_batches = self.n_batches;
        subset.labels = rows.iter().map(|&i| self.labels[i]).collect();
        Ok(subset)
    }

    /// Set every label to `label`.
    pub fn with_label(mut self, label: u32) -> Self {
        self.labels.iter_mut().for_each(|l| *l = label);
        self
    }

    /// Stack `other` below `self`. Both must share the gene vocabulary; the
    /// batch vocabulary is the union, so per-cell metadata is kept as is.
    pub fn concat(&self, other: &GeneExpressionDataset) -> Result<Self> {
        if self.gene_names != other.gene_names {
            return Err(LonerError::GeneMismatch {
                left: self.num_genes(),
                right: other.num_genes(),
            }
            .into());
        }
        let x = concatenate(Axis(0), &[self.x.view(), other.x.view()])?;
        let cat = |a: &[u32], b: &[u32]| a.iter().chain(b).copied().collect::<Vec<_>>();
        let catf = |a: &[f32], b: &[f32]| a.iter().chain(b).copied().collect::<Vec<_>>();
        Ok(GeneExpressionDataset {
            x,
            gene_names: self.gene_names.clone(),
            batch_indices: cat(&self.batch_indices, &other.batch_indices),
            labels: cat(&self.labels, &other.labels),
            n_batches: self.n_batches.max(other.n_batches),
            local_means: catf(&self.local_means, &other.local_means),
            local_vars: catf(&self.local_vars, &other.local_vars),
        })
    }

    /// Sorted distinct labels.
    pub fn distinct_labels(&self) -> Vec<u32> {
        let mut labels = self.labels.clone();
        labels.sort_unstable();
        labels.dedup();
        labels
    }
}
