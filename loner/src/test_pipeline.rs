//! End-to-end run of the pipeline on a small synthetic loom file.

use crate::io::loom::tests::write_loom;
use crate::pipeline::{run_pipeline, PipelineArgs};
use crate::simulate::DoubletType;
use crate::types::{outputs, RunMetrics, ThresholdChoice};
use anyhow::Result;
use ndarray::{Array1, Array2};
use ndarray_npy::read_npy;
use std::path::Path;

const NUM_CELLS: usize = 60;
const NUM_GENES: usize = 20;

fn synthetic_counts() -> Array2<f32> {
    // two populations expressing disjoint halves of the genes
    Array2::from_shape_fn((NUM_CELLS, NUM_GENES), |(i, j)| {
        let high = (i % 2 == 0) == (j < NUM_GENES / 2);
        let base = ((i * 7 + j * 3) % 5) as f32;
        if high {
            base + 6.0
        } else {
            base
        }
    })
}

fn write_params(path: &Path) -> Result<()> {
    let params = serde_json::json!({
        "n_hidden": 8,
        "n_latent": 2,
        "batch_size": 16,
        "patience": 3,
        "kl_warmup_epochs": 2,
        "vae_epochs": 4,
        "vae_fine_tune_epochs": 2,
        "classifier_epochs": 4,
        "classifier_fine_tune_epochs": 2,
        "cl_hidden": 4,
        "cl_layers": 1
    });
    std::fs::write(path, serde_json::to_string_pretty(&params)?)?;
    Ok(())
}

fn args(dir: &Path, out: &str) -> PipelineArgs {
    PipelineArgs {
        model_json: dir.join("params.json"),
        data_file: dir.join("cells.loom"),
        out_dir: dir.join(out),
        doublet_depth: 1.0,
        doublet_ratio: 1.0,
        doublet_type: DoubletType::Multinomial,
        gpu: false,
        seed_checkpoint: None,
        known_doublets: None,
        expected_doublets: Some(6),
        random_seed: 17,
    }
}

#[test]
fn test_pipeline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_loom(&dir.path().join("cells.loom"), &synthetic_counts(), None)?;
    write_params(&dir.path().join("params.json"))?;

    let first = args(dir.path(), "run");
    let outs = run_pipeline(&first)?;
    let out = &first.out_dir;
    for name in [
        outputs::VAE,
        outputs::LATENT,
        outputs::CLASSIFIER,
        outputs::METRICS,
        outputs::ROC_PLOT,
        outputs::ACCURACY_PLOT,
        outputs::TRAIN_V_TEST_PLOT,
        outputs::REAL_CELLS_PLOT,
    ] {
        assert!(out.join(name).is_file(), "missing {name}");
    }

    let scores: Array1<f32> = read_npy(out.join(outputs::SCORES))?;
    let scores_sim: Array1<f32> = read_npy(out.join(outputs::SCORES_SIM))?;
    let is_doublet: Array1<bool> = read_npy(out.join(outputs::IS_DOUBLET))?;
    let preds: Array1<i64> = read_npy(out.join(outputs::PREDS))?;
    let latent: Array2<f32> = read_npy(out.join(outputs::LATENT))?;
    let is_doublet_sim: Array1<bool> = read_npy(out.join(outputs::IS_DOUBLET_SIM))?;
    let preds_sim: Array1<i64> = read_npy(out.join(outputs::PREDS_SIM))?;
    assert_eq!(scores.len(), NUM_CELLS);
    assert_eq!(is_doublet_sim.len(), NUM_CELLS);
    assert_eq!(preds_sim.len(), NUM_CELLS);
    assert_eq!(scores_sim.len(), NUM_CELLS);
    assert_eq!(is_doublet.len(), NUM_CELLS);
    assert_eq!(preds.len(), NUM_CELLS);
    assert_eq!(latent.dim(), (NUM_CELLS, 2));
    assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    assert!(preds.iter().all(|&p| p == 0 || p == 1));

    let metrics: RunMetrics =
        serde_json::from_reader(std::fs::File::open(out.join(outputs::METRICS))?)?;
    assert_eq!(metrics.num_cells, NUM_CELLS);
    assert_eq!(metrics.num_called_doublets, outs.metrics.num_called_doublets);
    assert_eq!(metrics.num_simulated_doublets, NUM_CELLS);
    assert_eq!(metrics.threshold_choice, ThresholdChoice::Expected { expected: 6 });
    assert!(metrics.num_called_doublets <= 6);
    assert!(metrics.vae_epochs_run > 0);
    if let Some(auroc) = metrics.test_auroc {
        assert!((0.0..=1.0).contains(&auroc));
    }

    // reuse the trained VAE, with three cells flagged as known doublets
    let known: Vec<usize> = vec![1, 4, 7];
    let known_file = dir.path().join("known.tsv");
    let lines: Vec<&str> = (0..NUM_CELLS)
        .map(|i| if known.contains(&i) { "True" } else { "False" })
        .collect();
    std::fs::write(&known_file, lines.join("\n") + "\n")?;
    let mut seeded = args(dir.path(), "seeded");
    seeded.seed_checkpoint = Some(out.join(outputs::VAE));
    seeded.known_doublets = Some(known_file);
    seeded.expected_doublets = None;
    let outs = run_pipeline(&seeded)?;
    assert_eq!(outs.metrics.vae_epochs_run, 0);
    assert_eq!(outs.metrics.threshold, 0.5);
    assert_eq!(outs.metrics.num_known_doublets, 3);
    // floor(1.0 * 57 singlets) - 3 known
    assert_eq!(outs.metrics.num_simulated_doublets, 54);

    let seeded_out = &seeded.out_dir;
    let is_doublet: Array1<bool> = read_npy(seeded_out.join(outputs::IS_DOUBLET))?;
    let scores_sim: Array1<f32> = read_npy(seeded_out.join(outputs::SCORES_SIM))?;
    let is_doublet_sim: Array1<bool> = read_npy(seeded_out.join(outputs::IS_DOUBLET_SIM))?;
    let preds_sim: Array1<i64> = read_npy(seeded_out.join(outputs::PREDS_SIM))?;
    assert_eq!(is_doublet.len(), NUM_CELLS);
    assert!(known.iter().all(|&i| is_doublet[i]));
    assert_eq!(outs.calls.is_doublet, is_doublet.to_vec());
    assert_eq!(scores_sim.len(), 54);
    assert_eq!(is_doublet_sim.len(), 54);
    assert_eq!(preds_sim.len(), 54);
    assert!(!seeded.out_dir.join(outputs::VAE).exists());
    let copied: Array2<f32> = read_npy(seeded.out_dir.join(outputs::LATENT))?;
    assert_eq!(copied, latent);
    Ok(())
}
