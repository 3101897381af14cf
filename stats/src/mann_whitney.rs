use statrs::distribution::{ContinuousCDF, Normal};

/// Result of a two-sided Mann-Whitney U test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MannWhitney {
    /// U statistic of the first sample.
    pub statistic: f64,
    /// Two-sided p-value from the normal approximation.
    pub pvalue: f64,
}

/// Average (1-based) ranks of `values`, with ties sharing the mean of the
/// ranks they span. Also returns the tie correction term `sum(t^3 - t)`.
fn average_ranks(values: &[f64]) -> (Vec<f64>, f64) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut tie_term = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // ranks start+1 ..= end
        let rank = (start + 1 + end) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = rank;
        }
        let t = (end - start) as f64;
        tie_term += t * t * t - t;
        start = end;
    }
    (ranks, tie_term)
}

/// Two-sided Mann-Whitney U test of `x` against `y`, using the normal
/// approximation with tie and continuity correction.
///
/// Returns `None` if either sample is empty. When every value is tied the
/// variance vanishes and the p-value is reported as 1.
pub fn mann_whitney_u(x: &[f64], y: &[f64]) -> Option<MannWhitney> {
    if x.is_empty() || y.is_empty() {
        return None;
    }
    let n1 = x.len() as f64;
    let n2 = y.len() as f64;
    let n = n1 + n2;
    let combined: Vec<f64> = x.iter().chain(y).copied().collect();
    let (ranks, tie_term) = average_ranks(&combined);
    let r1: f64 = ranks[..x.len()].iter().sum();
    let u1 = r1 - n1 * (n1 + 1.0) / 2.0;
    let u2 = n1 * n2 - u1;

    let mu = n1 * n2 / 2.0;
    let variance = n1 * n2 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));
    if variance <= 0.0 {
        return Some(MannWhitney {
            statistic: u1,
            pvalue: 1.0,
        });
    }
    let z = (u1.max(u2) - mu - 0.5) / variance.sqrt();
    let normal = Normal::new(0.0, 1.0).ok()?;
    let pvalue = (2.0 * normal.cdf(-z)).min(1.0);
    Some(MannWhitney {
        statistic: u1,
        pvalue,
    })
}
