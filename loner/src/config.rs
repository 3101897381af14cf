//! Model hyperparameters read from the JSON file given on the command line.

use crate::errors::LonerError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Hyperparameters for the VAE, the classifier and their training loops.
///
/// Only `cl_hidden` and `cl_layers` are required; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    #[serde(default = "default_n_hidden")]
    pub n_hidden: usize,
    #[serde(default = "default_n_latent")]
    pub n_latent: usize,
    #[serde(default = "default_n_layers")]
    pub n_layers: usize,
    #[serde(default = "default_dropout_rate")]
    pub dropout_rate: f32,
    #[serde(default)]
    pub ignore_batch: bool,

    #[serde(default = "default_valid_pct")]
    pub valid_pct: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_kl_warmup_epochs")]
    pub kl_warmup_epochs: usize,

    #[serde(default = "default_vae_epochs")]
    pub vae_epochs: usize,
    #[serde(default = "default_vae_fine_tune_epochs")]
    pub vae_fine_tune_epochs: usize,
    #[serde(default = "default_classifier_epochs")]
    pub classifier_epochs: usize,
    #[serde(default = "default_classifier_fine_tune_epochs")]
    pub classifier_fine_tune_epochs: usize,

    pub cl_hidden: usize,
    pub cl_layers: usize,
}

fn default_n_hidden() -> usize {
    128
}
fn default_n_latent() -> usize {
    10
}
fn default_n_layers() -> usize {
    1
}
fn default_dropout_rate() -> f32 {
    0.1
}
fn default_valid_pct() -> f64 {
    0.1
}
fn default_learning_rate() -> f64 {
    1e-3
}
fn default_patience() -> usize {
    10
}
fn default_batch_size() -> usize {
    128
}
fn default_kl_warmup_epochs() -> usize {
    400
}
fn default_vae_epochs() -> usize {
    2000
}
fn default_vae_fine_tune_epochs() -> usize {
    500
}
fn default_classifier_epochs() -> usize {
    1000
}
fn default_classifier_fine_tune_epochs() -> usize {
    300
}

impl ModelParams {
    pub fn from_json(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening model parameters {}", path.display()))?;
        let params: ModelParams = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing model parameters {}", path.display()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), LonerError> {
        fn invalid(name: &'static str, reason: &str) -> Result<(), LonerError> {
            Err(LonerError::InvalidParameter {
                name,
                reason: reason.to_string(),
            })
        }
        for (name, value) in [
            ("n_hidden", self.n_hidden),
            ("n_latent", self.n_latent),
            ("n_layers", self.n_layers),
            ("cl_hidden", self.cl_hidden),
            ("cl_layers", self.cl_layers),
            ("batch_size", self.batch_size),
        ] {
            if value == 0 {
                return invalid(name, "must be at least 1");
            }
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return invalid("dropout_rate", "must lie in [0, 1)");
        }
        if !(self.valid_pct > 0.0 && self.valid_pct < 1.0) {
            return invalid("valid_pct", "must lie strictly between 0 and 1");
        }
        if !(self.learning_rate > 0.0) {
            return invalid("learning_rate", "must be positive");
        }
        Ok(())
    }
}
