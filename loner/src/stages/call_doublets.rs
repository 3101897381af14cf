//! Stage CALL_DOUBLETS: score every cell with the trained classifier, pick a
//! threshold and write the calls and diagnostic plots.

use super::StageContext;
use crate::errors::LonerError;
use crate::models::{select_rows, Classifier};
use crate::plots::{accuracy_plot, roc_plot, score_distribution_plot, write_plot};
use crate::types::{outputs, ThresholdChoice};
use anyhow::Result;
use candle_core::Tensor;
use log::{info, warn};
use ndarray::Array1;
use ndarray_npy::write_npy;
use stats::{
    accuracy_at_thresholds, partition_threshold, roc_auc_score, roc_curve, RocCurve,
};

const DEFAULT_THRESHOLD: f64 = 0.5;
// roc thresholds start above every score; keep the plot axis in range
const MAX_PLOTTED_THRESHOLD: f64 = 1.0 + 1e-9;

pub struct CallDoubletsInputs<'a> {
    pub classifier: &'a Classifier,
    /// Classifier features of the observed cells followed by the simulated
    /// doublets.
    pub features: &'a Tensor,
    pub labels: &'a [u32],
    pub num_observed: usize,
    /// Known doublet flag of each observed cell.
    pub known_doublets: &'a [bool],
    pub train_indices: &'a [usize],
    pub test_indices: &'a [usize],
    pub expected_doublets: Option<usize>,
    pub batch_size: usize,
}

#[derive(Debug)]
pub struct CallDoubletsOutputs {
    pub scores: Vec<f32>,
    pub is_doublet: Vec<bool>,
    pub threshold: f64,
    pub threshold_choice: ThresholdChoice,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub train_auroc: Option<f64>,
    pub test_auroc: Option<f64>,
}

impl CallDoubletsOutputs {
    pub fn num_called_doublets(&self) -> usize {
        self.is_doublet.iter().filter(|&&d| d).count()
    }
}

/// Decision threshold on doublet scores.
///
/// Without `expected` the threshold is 0.5. Otherwise it is the largest of
/// the `n - expected` lowest scores, so `expected` cells score above it when
/// scores are distinct.
pub fn select_threshold(
    scores: &[f32],
    expected: Option<usize>,
) -> Result<(f64, ThresholdChoice)> {
    let Some(expected) = expected else {
        return Ok((DEFAULT_THRESHOLD, ThresholdChoice::Default));
    };
    let n = scores.len();
    if expected >= n {
        return Err(LonerError::InvalidExpectedDoublets {
            expected,
            num_cells: n,
        }
        .into());
    }
    if expected as f64 / n as f64 > 0.5 {
        warn!("more than half of the {n} cells ({expected}) are expected to be doublets");
    }
    let values: Vec<f64> = scores.iter().map(|&s| f64::from(s)).collect();
    // expected < n, so k >= 1 and the partition exists
    let threshold = partition_threshold(&values, n - expected).unwrap_or(DEFAULT_THRESHOLD);
    Ok((threshold, ThresholdChoice::Expected { expected }))
}

fn score_all(
    classifier: &Classifier,
    features: &Tensor,
    batch_size: usize,
) -> Result<(Vec<f32>, Vec<u32>)> {
    let n = features.dim(0)?;
    let indices: Vec<usize> = (0..n).collect();
    let mut scores = Vec::with_capacity(n);
    let mut preds = Vec::with_capacity(n);
    for chunk in indices.chunks(batch_size.max(1)) {
        let x = select_rows(features, chunk)?;
        scores.extend(classifier.doublet_scores(&x)?);
        preds.extend(classifier.predict(&x)?);
    }
    Ok((scores, preds))
}

struct Split {
    truth: Vec<bool>,
    scores: Vec<f64>,
    accuracy: f64,
}

impl Split {
    fn new(indices: &[usize], labels: &[u32], scores: &[f32], preds: &[u32]) -> Self {
        let truth: Vec<bool> = indices.iter().map(|&i| labels[i] == 1).collect();
        let correct = indices.iter().filter(|&&i| preds[i] == labels[i]).count();
        Split {
            truth,
            scores: indices.iter().map(|&i| f64::from(scores[i])).collect(),
            accuracy: correct as f64 / indices.len().max(1) as f64,
        }
    }

    fn by_label(&self, doublet: bool) -> Vec<f32> {
        self.truth
            .iter()
            .zip(&self.scores)
            .filter(|&(&t, _)| t == doublet)
            .map(|(_, &s)| s as f32)
            .collect()
    }
}

fn write_plots(
    train: &Split,
    test: &Split,
    observed: &[f32],
    threshold: f64,
    ctx: &StageContext,
) -> Result<()> {
    let curves: Vec<(&str, RocCurve, &Split)> = [("Train", train), ("Test", test)]
        .into_iter()
        .filter_map(|(name, split)| {
            roc_curve(&split.truth, &split.scores).map(|roc| (name, roc, split))
        })
        .collect();
    let named: Vec<(&str, &RocCurve)> = curves.iter().map(|(n, roc, _)| (*n, roc)).collect();
    write_plot(&roc_plot(&named), &ctx.make_path(outputs::ROC_PLOT))?;

    let accuracy: Vec<(&str, Vec<f64>, Vec<f64>)> = curves
        .iter()
        .map(|(name, roc, split)| {
            let thresholds: Vec<f64> = roc
                .thresholds
                .iter()
                .map(|&t| t.min(MAX_PLOTTED_THRESHOLD))
                .collect();
            let acc = accuracy_at_thresholds(&split.truth, &split.scores, &thresholds);
            (*name, thresholds, acc)
        })
        .collect();
    write_plot(
        &accuracy_plot(&accuracy, threshold),
        &ctx.make_path(outputs::ACCURACY_PLOT),
    )?;

    let simulated = test.by_label(true);
    let held_out_observed = test.by_label(false);
    write_plot(
        &score_distribution_plot(
            &[("Simulated", &simulated), ("Observed", &held_out_observed)],
            threshold,
        ),
        &ctx.make_path(outputs::TRAIN_V_TEST_PLOT),
    )?;
    write_plot(
        &score_distribution_plot(&[("Observed", observed)], threshold),
        &ctx.make_path(outputs::REAL_CELLS_PLOT),
    )?;
    Ok(())
}

pub fn run(args: CallDoubletsInputs<'_>, ctx: &StageContext) -> Result<CallDoubletsOutputs> {
    let (scores, preds) = score_all(args.classifier, args.features, args.batch_size)?;
    let train = Split::new(args.train_indices, args.labels, &scores, &preds);
    let test = Split::new(args.test_indices, args.labels, &scores, &preds);
    let train_auroc = roc_auc_score(&train.truth, &train.scores);
    let test_auroc = roc_auc_score(&test.truth, &test.scores);
    info!(
        "classifier accuracy: train {:.4}, test {:.4}",
        train.accuracy, test.accuracy
    );
    match (train_auroc, test_auroc) {
        (Some(tr), Some(te)) => info!("classifier AUROC: train {tr:.4}, test {te:.4}"),
        _ => warn!("AUROC undefined: a split holds a single class"),
    }

    let (observed, simulated) = scores.split_at(args.num_observed);
    let (threshold, threshold_choice) = select_threshold(observed, args.expected_doublets)?;
    info!("doublet score threshold {threshold:.4}");

    let is_doublet: Vec<bool> = observed
        .iter()
        .zip(args.known_doublets)
        .map(|(&s, &known)| known || f64::from(s) > threshold)
        .collect();
    let is_doublet_sim: Vec<bool> = simulated
        .iter()
        .map(|&s| f64::from(s) > threshold)
        .collect();
    let (preds_observed, preds_sim) = preds.split_at(args.num_observed);
    let to_i64 = |p: &[u32]| p.iter().map(|&v| i64::from(v)).collect::<Array1<i64>>();

    write_npy(
        ctx.make_path(outputs::SCORES),
        &Array1::from(observed.to_vec()),
    )?;
    write_npy(
        ctx.make_path(outputs::SCORES_SIM),
        &Array1::from(simulated.to_vec()),
    )?;
    write_npy(
        ctx.make_path(outputs::IS_DOUBLET),
        &Array1::from(is_doublet.clone()),
    )?;
    write_npy(
        ctx.make_path(outputs::IS_DOUBLET_SIM),
        &Array1::from(is_doublet_sim),
    )?;
    write_npy(ctx.make_path(outputs::PREDS), &to_i64(preds_observed))?;
    write_npy(ctx.make_path(outputs::PREDS_SIM), &to_i64(preds_sim))?;

    write_plots(&train, &test, observed, threshold, ctx)?;

    let called = is_doublet.iter().filter(|&&d| d).count();
    info!("called {called} of {} cells as doublets", is_doublet.len());
    Ok(CallDoubletsOutputs {
        scores: observed.to_vec(),
        is_doublet,
        threshold,
        threshold_choice,
        train_accuracy: train.accuracy,
        test_accuracy: test.accuracy,
        train_auroc,
        test_auroc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use ndarray_npy::read_npy;

    #[test]
    fn test_default_threshold() -> Result<()> {
        let (t, choice) = select_threshold(&[0.1, 0.9], None)?;
        assert_eq!(t, 0.5);
        assert_eq!(choice, ThresholdChoice::Default);
        Ok(())
    }

    #[test]
    fn test_expected_threshold() -> Result<()> {
        let scores = [0.05f32, 0.8, 0.3, 0.95, 0.6, 0.1];
        for expected in 0..scores.len() {
            let (t, choice) = select_threshold(&scores, Some(expected))?;
            let above = scores.iter().filter(|&&s| f64::from(s) > t).count();
            assert_eq!(above, expected);
            assert_eq!(choice, ThresholdChoice::Expected { expected });
        }
        Ok(())
    }

    #[test]
    fn test_expected_too_large() {
        let err = select_threshold(&[0.2, 0.4], Some(2)).err().expect("2 >= 2");
        assert!(matches!(
            err.downcast_ref::<LonerError>(),
            Some(LonerError::InvalidExpectedDoublets {
                expected: 2,
                num_cells: 2
            })
        ));
    }

    #[test]
    fn test_split_accuracy_and_labels() {
        let labels = [0u32, 1, 1, 0];
        let scores = [0.2f32, 0.7, 0.4, 0.1];
        let preds = [0u32, 1, 0, 0];
        let split = Split::new(&[1, 2, 3], &labels, &scores, &preds);
        assert_eq!(split.truth, vec![true, true, false]);
        assert!((split.accuracy - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(split.by_label(false), vec![0.1]);
    }

    #[test]
    fn test_known_doublets_are_always_called() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = StageContext {
            out_dir: dir.path().to_path_buf(),
            device: Device::Cpu,
        };
        let varmap = VarMap::new();
        let classifier = Classifier::new(
            3,
            4,
            1,
            2,
            0.0,
            VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu),
        )?;
        // 6 observed cells followed by 4 simulated doublets
        let values: Vec<f32> = (0..30).map(|i| ((i * 7) % 11) as f32 / 5.0 - 1.0).collect();
        let features = Tensor::from_vec(values, (10, 3), &Device::Cpu)?;
        let known = [true, false, false, true, false, false];
        let labels = [1u32, 0, 0, 1, 0, 0, 1, 1, 1, 1];

        let outs = run(
            CallDoubletsInputs {
                classifier: &classifier,
                features: &features,
                labels: &labels,
                num_observed: 6,
                known_doublets: &known,
                train_indices: &[0, 1, 2, 6, 7],
                test_indices: &[3, 4, 5, 8, 9],
                expected_doublets: Some(1),
                batch_size: 4,
            },
            &ctx,
        )?;

        // at most one observed cell scores above the threshold, so at least
        // one known doublet scores at or below it
        assert!(known
            .iter()
            .zip(&outs.scores)
            .any(|(&k, &s)| k && f64::from(s) <= outs.threshold));
        for (i, (&k, &s)) in known.iter().zip(&outs.scores).enumerate() {
            assert_eq!(outs.is_doublet[i], k || f64::from(s) > outs.threshold);
        }
        assert!(outs.is_doublet[0] && outs.is_doublet[3]);
        assert!(outs.num_called_doublets() >= 2);

        let is_doublet: Array1<bool> = read_npy(ctx.make_path(outputs::IS_DOUBLET))?;
        assert_eq!(is_doublet.to_vec(), outs.is_doublet);
        let scores_sim: Array1<f32> = read_npy(ctx.make_path(outputs::SCORES_SIM))?;
        let is_doublet_sim: Array1<bool> = read_npy(ctx.make_path(outputs::IS_DOUBLET_SIM))?;
        let preds_sim: Array1<i64> = read_npy(ctx.make_path(outputs::PREDS_SIM))?;
        assert_eq!(scores_sim.len(), 4);
        assert_eq!(is_doublet_sim.len(), 4);
        assert_eq!(preds_sim.len(), 4);
        for (&s, &called) in scores_sim.iter().zip(is_doublet_sim.iter()) {
            assert_eq!(called, f64::from(s) > outs.threshold);
        }
        Ok(())
    }
}
