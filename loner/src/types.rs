use crate::simulate::DoubletType;
use serde::{Deserialize, Serialize};

/// File names written to the output directory.
pub mod outputs {
    pub const VAE: &str = "vae.safetensors";
    pub const LATENT: &str = "latent.npy";
    pub const CLASSIFIER: &str = "classifier.safetensors";
    pub const SCORES: &str = "scores.npy";
    pub const SCORES_SIM: &str = "scores_sim.npy";
    pub const IS_DOUBLET: &str = "is_doublet.npy";
    pub const IS_DOUBLET_SIM: &str = "is_doublet_sim.npy";
    pub const PREDS: &str = "preds.npy";
    pub const PREDS_SIM: &str = "preds_sim.npy";
    pub const METRICS: &str = "metrics.json";
    pub const ROC_PLOT: &str = "roc.html";
    pub const ACCURACY_PLOT: &str = "accuracy.html";
    pub const TRAIN_V_TEST_PLOT: &str = "train_v_test_dist.html";
    pub const REAL_CELLS_PLOT: &str = "real_cells_dist.html";
}

/// How the doublet threshold was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum ThresholdChoice {
    /// The fixed default of 0.5.
    Default,
    /// Chosen so that `expected` observed cells score above it.
    Expected { expected: usize },
}

/// Summary of a run, written as `metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub random_seed: u64,
    pub doublet_type: DoubletType,
    pub num_cells: usize,
    pub num_genes: usize,
    pub num_known_doublets: usize,
    pub num_simulated_doublets: usize,
    pub vae_epochs_run: usize,
    pub classifier_epochs_run: usize,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub train_auroc: Option<f64>,
    pub test_auroc: Option<f64>,
    pub threshold: f64,
    pub threshold_choice: ThresholdChoice,
    pub num_called_doublets: usize,
}
