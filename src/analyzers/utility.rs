/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Returns the smallest element `v` such that at least `p` of the values are
/// `<= v`, or `None` for empty input. The result is always one of the inputs,
/// never an interpolation.
pub fn percentile_approx<T: Copy + PartialOrd>(values: &[T], p: f64) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (p.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[1.0, 2.0, 6.0]), 3.0);
    }

    #[test]
    fn test_percentile_picks_an_element() {
        assert_eq!(percentile_approx::<f64>(&[], 0.5), None);
        assert_eq!(percentile_approx(&[4.0], 0.5), Some(4.0));
        assert_eq!(percentile_approx(&[3.0, 1.0, 2.0], 0.5), Some(2.0));
        // even count: lower middle, like Spark's percentile_approx
        assert_eq!(percentile_approx(&[40_i64, 10, 30, 20], 0.5), Some(20));
        assert_eq!(percentile_approx(&[1, 2, 3, 4], 1.0), Some(4));
        assert_eq!(percentile_approx(&[1, 2, 3, 4], 0.0), Some(1));
    }
}
