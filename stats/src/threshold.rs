/// Largest of the `k` smallest values, found by partitioning rather than a
/// full sort. Calling `value > threshold` on the result leaves at most
/// `len - k` values above it, and exactly that many when values are distinct.
///
/// Returns `None` when `k` is zero or exceeds the number of values.
///
/// # Example
/// ```rust
/// use stats::partition_threshold;
/// let scores = [0.9, 0.1, 0.5, 0.3, 0.7];
/// assert_eq!(partition_threshold(&scores, 3), Some(0.5));
/// assert_eq!(partition_threshold(&scores, 0), None);
/// ```
pub fn partition_threshold(values: &[f64], k: usize) -> Option<f64> {
    if k == 0 || k > values.len() {
        return None;
    }
    let mut values = values.to_vec();
    let (_, kth, _) = values.select_nth_unstable_by(k - 1, f64::total_cmp);
    Some(*kth)
}
