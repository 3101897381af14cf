//! loner
//!
//! Doublet detection for single-cell RNA-seq: simulate doublets from the
//! observed cells, embed everything with a count VAE and score each cell
//! with a classifier trained to tell the two apart.

pub mod config;
pub mod dataset;
pub mod errors;
pub mod io;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod plots;
pub mod simulate;
pub mod stages;
#[cfg(test)]
mod test_pipeline;
pub mod tracking;
pub mod train;
pub mod types;
