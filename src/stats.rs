//! Statistical utility functions shared across modules
//!
//! Polygamma helpers for the empirical Bayes moment estimator, average ranks
//! for the trimmed means and rank-sum tests, and a couple of small summaries.

use std::cmp::Ordering;

pub use statrs::function::gamma::digamma;

/// Trigamma function psi'(x) for x > 0.
///
/// Shifts the argument above 10 with the recurrence psi'(x) = psi'(x+1) + 1/x^2
/// and then uses the asymptotic Bernoulli expansion.
pub fn trigamma(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc + 1.0 / x
        + x2 / 2.0
        + (x2 / x) * (1.0 / 6.0 - x2 * (1.0 / 30.0 - x2 * (1.0 / 42.0 - x2 / 30.0)))
}

/// Tetragamma function psi''(x) for x > 0.
fn tetragamma(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc -= 2.0 / (x * x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc - x2
        - x2 / x
        - x2 * x2 / 2.0
        + x2 * x2 * x2 * (1.0 / 6.0 - x2 * (1.0 / 6.0 - x2 * 3.0 / 10.0))
}

/// Inverse of the trigamma function.
///
/// Newton iteration on 1/trigamma(y), which is nearly linear, starting from
/// y = 0.5 + 1/x. Matches limma's trigammaInverse().
pub fn trigamma_inverse(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    if x > 1e7 {
        return 1.0 / x.sqrt();
    }
    if x < 1e-6 {
        return 1.0 / x;
    }

    let mut y = 0.5 + 1.0 / x;
    for iter in 0..50 {
        let tri = trigamma(y);
        let dif = tri * (1.0 - tri / x) / tetragamma(y);
        y += dif;
        if -dif / y < 1e-8 {
            return y;
        }
        if iter == 49 {
            log::warn!("trigamma_inverse: iteration limit exceeded for x = {}", x);
        }
    }
    y
}

/// Average ranks (1-based) with ties sharing the mean of their positions,
/// as R's rank(ties.method = "average").
pub fn rank_average(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && x[order[j]] == x[order[i]] {
            j += 1;
        }
        // positions i..j (0-based) share rank mean(i+1 ..= j)
        let avg = (i + 1 + j) as f64 / 2.0;
        for &idx in &order[i..j] {
            ranks[idx] = avg;
        }
        i = j;
    }
    ranks
}

/// Sizes of groups of tied values
pub fn tie_sizes(x: &[f64]) -> Vec<usize> {
    let mut sorted: Vec<f64> = x.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mut sizes = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i + 1;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        sizes.push(j - i);
        i = j;
    }
    sizes
}

/// Median of finite values; NaN when none are present
pub fn median(x: &[f64]) -> f64 {
    let mut v: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = v.len();
    if n % 2 == 0 {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    } else {
        v[n / 2]
    }
}

pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigamma_known_values() {
        // psi'(1) = pi^2 / 6
        let expected = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - expected).abs() < 1e-10);
        // psi'(0.5) = pi^2 / 2
        let expected = std::f64::consts::PI.powi(2) / 2.0;
        assert!((trigamma(0.5) - expected).abs() < 1e-10);
    }

    #[test]
    fn test_tetragamma_known_value() {
        // psi''(1) = -2 * zeta(3)
        let zeta3 = 1.202_056_903_159_594_2;
        assert!((tetragamma(1.0) + 2.0 * zeta3).abs() < 1e-9);
    }

    #[test]
    fn test_trigamma_inverse_roundtrip() {
        for &y in &[0.3, 1.0, 2.5, 10.0, 150.0] {
            let x = trigamma(y);
            let back = trigamma_inverse(x);
            assert!(
                (back - y).abs() / y < 1e-6,
                "trigamma_inverse(trigamma({})) = {}",
                y,
                back
            );
        }
    }

    #[test]
    fn test_rank_average_ties() {
        let r = rank_average(&[3.0, 1.0, 3.0, 2.0]);
        assert_eq!(r, vec![3.5, 1.0, 3.5, 2.0]);
    }

    #[test]
    fn test_tie_sizes() {
        let mut t = tie_sizes(&[1.0, 2.0, 2.0, 5.0, 5.0, 5.0]);
        t.sort();
        assert_eq!(t, vec![1, 2, 3]);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
    }
}
