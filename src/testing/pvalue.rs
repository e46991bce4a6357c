//! P-value calculation from test statistics

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Upper tail probability P(T > t) for a t distribution with `df` degrees of
/// freedom. Infinite `df` uses the standard normal.
pub fn upper_tail_t(t: f64, df: f64) -> f64 {
    if t.is_nan() || df.is_nan() || df <= 0.0 {
        return f64::NAN;
    }
    if df.is_infinite() {
        return Normal::standard().sf(t);
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => dist.sf(t),
        Err(_) => f64::NAN,
    }
}

/// Two-sided p-value from a t statistic: 2 * P(T > |t|)
pub fn calculate_pvalue_t(stat: f64, df: f64) -> f64 {
    if stat.is_nan() {
        return f64::NAN;
    }
    (2.0 * upper_tail_t(stat.abs(), df)).min(1.0)
}

/// Two-sided p-value from a z statistic
pub fn calculate_pvalue(z: f64) -> f64 {
    calculate_pvalue_t(z, f64::INFINITY)
}

/// Lower and upper normal tail probabilities of `z`
pub fn normal_tails(z: f64) -> (f64, f64) {
    let normal = Normal::standard();
    (normal.cdf(z), normal.sf(z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pvalue_symmetric() {
        let p1 = calculate_pvalue(2.0);
        let p2 = calculate_pvalue(-2.0);
        assert!((p1 - p2).abs() < 1e-10);
    }

    #[test]
    fn test_pvalue_zero() {
        assert!((calculate_pvalue(0.0) - 1.0).abs() < 1e-10);
        assert!((calculate_pvalue_t(0.0, 4.0) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_pvalue_t_distribution() {
        // With large df, t-distribution approaches normal
        let p_normal = calculate_pvalue(2.0);
        let p_t_large = calculate_pvalue_t(2.0, 1000.0);
        assert!((p_normal - p_t_large).abs() < 0.001);

        // With small df, t-distribution gives larger p-values
        let p_t_small = calculate_pvalue_t(2.0, 3.0);
        assert!(p_t_small > p_normal);
    }

    #[test]
    fn test_upper_tail() {
        assert!((upper_tail_t(0.0, 5.0) - 0.5).abs() < 1e-12);
        // 1.96 is the two-sided 5% normal quantile
        assert!((upper_tail_t(1.959964, f64::INFINITY) - 0.025).abs() < 1e-6);
        let (lo, hi) = normal_tails(0.3);
        assert!((lo + hi - 1.0).abs() < 1e-12);
        assert!(upper_tail_t(1.0, 0.0).is_nan());
    }
}
