//! Small descriptive statistics over `f64` samples.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Sample (n-1) standard deviation; needs at least two values.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Spread of one sample: location, dispersion and bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    pub samples: Vec<f64>,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    /// std_dev / mean, absent when the mean is not positive
    pub coefficient_of_variation: Option<f64>,
}

impl Spread {
    /// `None` for fewer than two samples.
    pub fn of(samples: Vec<f64>) -> Option<Self> {
        let std_dev = sample_std_dev(&samples)?;
        let mean = mean(&samples)?;
        let median = median(&samples)?;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            mean,
            median,
            std_dev,
            min,
            max,
            range: max - min,
            coefficient_of_variation: (mean > 0.0).then(|| std_dev / mean),
            samples,
        })
    }
}

/// Spearman rank correlation between two orderings of the same items.
///
/// Each slice lists ids best-first. Only ids present in both take part,
/// re-ranked within that shared set. `None` for fewer than two shared ids.
pub fn spearman(first: &[&str], second: &[&str]) -> Option<f64> {
    let in_second: BTreeMap<&str, usize> = second
        .iter()
        .enumerate()
        .map(|(pos, id)| (*id, pos))
        .collect();
    let shared: Vec<&str> = first
        .iter()
        .copied()
        .filter(|id| in_second.contains_key(id))
        .collect();
    let n = shared.len();
    if n < 2 {
        return None;
    }

    // shared is already in first's order, so its index is first's rank
    let mut by_second: Vec<(usize, usize)> = shared
        .iter()
        .enumerate()
        .map(|(rank_first, id)| (in_second[id], rank_first))
        .collect();
    by_second.sort_unstable();

    let d_squared: f64 = by_second
        .iter()
        .enumerate()
        .map(|(rank_second, (_, rank_first))| {
            let d = rank_second as f64 - *rank_first as f64;
            d * d
        })
        .sum();
    let n = n as f64;
    Some(1.0 - 6.0 * d_squared / (n * (n * n - 1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_std_dev() {
        assert_eq!(sample_std_dev(&[1.0]), None);
        let sd = sample_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.138089935).abs() < 1e-6);
        assert_eq!(sample_std_dev(&[3.0, 3.0, 3.0]), Some(0.0));
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_spread() {
        let spread = Spread::of(vec![1.0, 3.0]).unwrap();
        assert_eq!(spread.mean, 2.0);
        assert_eq!(spread.range, 2.0);
        assert!((spread.std_dev - 2f64.sqrt()).abs() < 1e-12);
        assert!((spread.coefficient_of_variation.unwrap() - 2f64.sqrt() / 2.0).abs() < 1e-12);

        assert!(Spread::of(vec![0.0, 0.0]).unwrap().coefficient_of_variation.is_none());
        assert!(Spread::of(vec![5.0]).is_none());
    }

    #[test]
    fn test_spearman() {
        assert_eq!(spearman(&["a", "b", "c"], &["a", "b", "c"]), Some(1.0));
        assert_eq!(spearman(&["a", "b", "c"], &["c", "b", "a"]), Some(-1.0));
        // d = (0,1,1) -> 1 - 6*2/24
        assert_eq!(spearman(&["a", "b", "c"], &["a", "c", "b"]), Some(0.5));
    }

    #[test]
    fn test_spearman_uses_shared_ids_only() {
        // shared {a, c}; same relative order in both
        assert_eq!(spearman(&["a", "b", "c"], &["x", "a", "c"]), Some(1.0));
        assert_eq!(spearman(&["a", "b"], &["c", "d"]), None);
        assert_eq!(spearman(&["a", "b"], &["a", "d"]), None);
    }
}
