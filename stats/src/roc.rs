use std::cmp::Ordering;

/// Receiver operating characteristic of a binary scorer.
///
/// Points are ordered by decreasing threshold. The first point is always
/// `(0, 0)` with an infinite threshold, so every score falls below it.
#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    /// False positive rate at each threshold.
    pub fpr: Vec<f64>,
    /// True positive rate at each threshold.
    pub tpr: Vec<f64>,
    /// Decreasing thresholds; a sample is called positive when `score >= threshold`.
    pub thresholds: Vec<f64>,
}

/// Cumulative true/false positive counts at each distinct score, scanning
/// from the highest score down. Returns `(fps, tps, thresholds)`.
fn binary_clf_curve(y_true: &[bool], scores: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    assert_eq!(
        y_true.len(),
        scores.len(),
        "labels and scores must have the same length"
    );
    let mut order: Vec<usize> = (0..scores.len()).collect();
    // stable, so tied scores keep input order
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut fps = Vec::new();
    let mut tps = Vec::new();
    let mut thresholds = Vec::new();
    let (mut tp, mut fp) = (0.0, 0.0);
    for (rank, &i) in order.iter().enumerate() {
        if y_true[i] {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        let last_of_tie = match order.get(rank + 1) {
            Some(&next) => scores[next].total_cmp(&scores[i]) != Ordering::Equal,
            None => true,
        };
        if last_of_tie {
            fps.push(fp);
            tps.push(tp);
            thresholds.push(scores[i]);
        }
    }
    (fps, tps, thresholds)
}

/// Compute the ROC curve of `scores` against the boolean ground truth.
///
/// Returns `None` when either class is absent, since one of the rates would
/// be undefined.
pub fn roc_curve(y_true: &[bool], scores: &[f64]) -> Option<RocCurve> {
    let (fps, tps, thresholds) = binary_clf_curve(y_true, scores);
    let total_fp = *fps.last()?;
    let total_tp = *tps.last()?;
    if total_fp == 0.0 || total_tp == 0.0 {
        return None;
    }
    let mut curve = RocCurve {
        fpr: Vec::with_capacity(fps.len() + 1),
        tpr: Vec::with_capacity(tps.len() + 1),
        thresholds: Vec::with_capacity(thresholds.len() + 1),
    };
    curve.fpr.push(0.0);
    curve.tpr.push(0.0);
    curve.thresholds.push(f64::INFINITY);
    curve.fpr.extend(fps.iter().map(|fp| fp / total_fp));
    curve.tpr.extend(tps.iter().map(|tp| tp / total_tp));
    curve.thresholds.extend(thresholds);
    Some(curve)
}

/// Area under the curve of the points `(x, y)` by the trapezoidal rule.
pub fn trapezoid_area(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum()
}

/// Area under the ROC curve. The result lies in `[0, 1]`; tied scores
/// between classes count one half.
///
/// # Example
/// ```rust
/// use stats::roc_auc_score;
/// let y = [false, false, true, true];
/// let scores = [0.1, 0.4, 0.35, 0.8];
/// assert_eq!(roc_auc_score(&y, &scores), Some(0.75));
/// ```
pub fn roc_auc_score(y_true: &[bool], scores: &[f64]) -> Option<f64> {
    let curve = roc_curve(y_true, scores)?;
    Some(trapezoid_area(&curve.fpr, &curve.tpr).clamp(0.0, 1.0))
}

/// Average precision: the recall-weighted mean of the precision reached at
/// each distinct threshold. Returns `None` without any positive sample.
pub fn average_precision_score(y_true: &[bool], scores: &[f64]) -> Option<f64> {
    let (fps, tps, _) = binary_clf_curve(y_true, scores);
    let total_tp = *tps.last()?;
    if total_tp == 0.0 {
        return None;
    }
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    for (&tp, &fp) in tps.iter().zip(&fps) {
        let recall = tp / total_tp;
        let precision = tp / (tp + fp);
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    Some(ap)
}

/// Fraction of samples whose call `score > threshold` agrees with the truth,
/// for each threshold in turn.
pub fn accuracy_at_thresholds(y_true: &[bool], scores: &[f64], thresholds: &[f64]) -> Vec<f64> {
    assert_eq!(y_true.len(), scores.len());
    if y_true.is_empty() {
        return vec![f64::NAN; thresholds.len()];
    }
    thresholds
        .iter()
        .map(|&t| {
            let correct = y_true
                .iter()
                .zip(scores)
                .filter(|&(&y, &s)| y == (s > t))
                .count();
            correct as f64 / y_true.len() as f64
        })
        .collect()
}
