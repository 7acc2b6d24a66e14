//! Descriptive statistics over sample sequences

use serde::Serialize;

/// One point of an empirical CDF
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CdfPoint {
    pub value: f64,
    /// Fraction of samples at or below `value`
    pub probability: f64,
}

/// Copy and sort ascending. NaNs sort last.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.partial_cmp(b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan())));
    out
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Linear-interpolation percentile of an ascending slice, `p` in `0..=100`
///
/// The rank is `p / 100 * (n - 1)`; the result interpolates between the two
/// neighbouring samples. A single sample is every percentile of itself.
pub fn percentile(sorted_values: &[f64], p: f64) -> Option<f64> {
    let n = sorted_values.len();
    if n == 0 {
        return None;
    }
    if n == 1 {
        return Some(sorted_values[0]);
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;

    if upper >= n {
        return Some(sorted_values[n - 1]);
    }
    Some(sorted_values[lower] + (sorted_values[upper] - sorted_values[lower]) * frac)
}

pub fn median(sorted_values: &[f64]) -> Option<f64> {
    percentile(sorted_values, 50.0)
}

/// Empirical CDF: sorted values paired with `rank / count`, rank 1-based
pub fn cdf(values: &[f64]) -> Vec<CdfPoint> {
    let values = sorted(values);
    let count = values.len() as f64;
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| CdfPoint {
            value,
            probability: (i + 1) as f64 / count,
        })
        .collect()
}

/// Distribution summary used by the console report
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Option<Summary> {
        let values = sorted(values);
        let at = |p| percentile(&values, p);
        Some(Summary {
            count: values.len(),
            mean: mean(&values)?,
            p50: at(50.0)?,
            p90: at(90.0)?,
            p95: at(95.0)?,
            p99: at(99.0)?,
            max: at(100.0)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(median(&[1.0, 2.0, 3.0]), Some(2.0));
    }

    #[test]
    fn test_percentile_interpolates() {
        let data = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&data, 0.0), Some(10.0));
        assert_eq!(percentile(&data, 25.0), Some(20.0));
        assert_eq!(percentile(&data, 100.0), Some(50.0));
        // rank 0.95 * 4 = 3.8 -> 40 + 0.8 * 10
        assert!((percentile(&data, 95.0).unwrap() - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_single_and_empty() {
        assert_eq!(percentile(&[0.7], 95.0), Some(0.7));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 6.0]), Some(3.0));
    }

    #[test]
    fn test_cdf_is_sorted_and_ends_at_one() {
        let points = cdf(&[3.0, 1.0, 2.0, 2.0]);

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 2.0, 3.0]);

        let probs: Vec<f64> = points.iter().map(|p| p.probability).collect();
        assert_eq!(probs, vec![0.25, 0.5, 0.75, 1.0]);
        assert!(probs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_cdf_last_probability_is_exactly_one_for_odd_counts() {
        for n in 1..50 {
            let values: Vec<f64> = (0..n).map(|i| (i * 7 % 13) as f64).collect();
            let points = cdf(&values);
            assert_eq!(points.last().unwrap().probability, 1.0);
        }
    }

    #[test]
    fn test_summary() {
        let summary = Summary::of(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(summary.count, 4);
        assert_eq!(summary.mean, 2.5);
        assert_eq!(summary.p50, 2.5);
        assert_eq!(summary.max, 4.0);
        assert!(Summary::of(&[]).is_none());
    }
}
