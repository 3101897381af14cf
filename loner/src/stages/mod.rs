//! Pipeline stages. Each stage takes an `…Inputs` struct and returns an
//! `…Outputs` struct, writing its files under the run's output directory.

pub mod call_doublets;
pub mod load_data;
pub mod simulate_doublets;
pub mod train_classifier;
pub mod train_vae;

use candle_core::Device;
use std::path::{Path, PathBuf};

/// Where a stage writes its files and which device it computes on.
pub struct StageContext {
    pub out_dir: PathBuf,
    pub device: Device,
}

impl StageContext {
    pub fn make_path(&self, name: &str) -> PathBuf {
        self.out_dir.join(name)
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}
