//! Empirical Bayes moderation of gene-wise residual variances
//!
//! The residual variances are modelled as scaled F (chi-square) draws around
//! a common prior. The prior is estimated by matching moments of
//! `log(s^2)`, and every gene's variance is then shrunk towards it.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoomError};
use crate::glm::{ContrastMatrix, LinearModelFit};
use crate::stats::{digamma, mean, median, trigamma, trigamma_inverse};
use crate::variance::{LowessParams, TrendCurve};

use super::moderated::{moderated_tests, FitResult};

/// Configurable parameters for empirical Bayes moderation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EbayesParams {
    /// Assumed proportion of differentially expressed genes. Only used by
    /// log-odds statistics, which are not computed
    pub proportion: f64,
    /// Robust hyperparameter estimation (not supported)
    pub robust: bool,
    /// Let the prior variance follow a trend over average expression
    pub trend: bool,
}

impl Default for EbayesParams {
    fn default() -> Self {
        Self {
            proportion: 0.01,
            robust: false,
            trend: false,
        }
    }
}

impl EbayesParams {
    fn validate(&self) -> Result<()> {
        if self.robust {
            return Err(VoomError::InvalidParameter {
                reason: "robust hyperparameter estimation is not supported".to_string(),
            });
        }
        if !(self.proportion > 0.0 && self.proportion < 1.0) {
            return Err(VoomError::InvalidParameter {
                reason: format!("proportion must be in (0, 1), got {}", self.proportion),
            });
        }
        Ok(())
    }
}

/// Prior and posterior variances from [`squeeze_var`]
#[derive(Debug, Clone)]
pub struct SqueezedVariances {
    /// Prior variance per gene (constant unless a trend was fitted)
    pub s2_prior: Vec<f64>,
    /// Prior degrees of freedom, possibly infinite
    pub df_prior: f64,
    /// Posterior variance per gene
    pub s2_post: Vec<f64>,
}

/// Shrink residual variances towards a common (or trended) prior.
///
/// `covariate`, when given, is the average expression the prior variance is
/// allowed to depend on.
pub fn squeeze_var(sigma2: &[f64], df: &[f64], covariate: Option<&[f64]>) -> Result<SqueezedVariances> {
    if sigma2.len() != df.len() {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} residual df values", sigma2.len()),
            got: format!("{}", df.len()),
        });
    }
    if let Some(cov) = covariate {
        if cov.len() != sigma2.len() {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} covariate values", sigma2.len()),
                got: format!("{}", cov.len()),
            });
        }
    }

    let (s2_prior, df_prior) = fit_f_dist(sigma2, df, covariate)?;

    let s2_post = sigma2
        .iter()
        .zip(df)
        .zip(&s2_prior)
        .map(|((&s2, &d), &s0)| {
            if df_prior.is_infinite() {
                s0
            } else {
                (d * s2 + df_prior * s0) / (d + df_prior)
            }
        })
        .collect();

    Ok(SqueezedVariances {
        s2_prior,
        df_prior,
        s2_post,
    })
}

/// Moment estimation of the scaled F distribution of the variances.
///
/// Returns the per-gene prior scale and the prior degrees of freedom.
fn fit_f_dist(x: &[f64], df: &[f64], covariate: Option<&[f64]>) -> Result<(Vec<f64>, f64)> {
    let usable: Vec<usize> = (0..x.len())
        .filter(|&i| x[i].is_finite() && x[i] > -1e-15 && df[i].is_finite() && df[i] > 1e-15)
        .filter(|&i| covariate.map_or(true, |c| c[i].is_finite()))
        .collect();
    let n = usable.len();
    if n < 2 {
        return Err(VoomError::degenerate(
            "variance moderation",
            format!("{} gene(s) with positive residual df, need at least 2", n),
        ));
    }

    let vars: Vec<f64> = usable.iter().map(|&i| x[i].max(0.0)).collect();
    let mut m = median(&vars);
    if m == 0.0 {
        log::warn!("More than half of the residual variances are exactly zero; moderation is unreliable");
        m = 1.0;
    } else if vars.iter().any(|&v| v == 0.0) {
        log::warn!("Zero residual variances offset away from zero");
    }

    let e: Vec<f64> = usable
        .iter()
        .zip(&vars)
        .map(|(&i, &v)| {
            let half = df[i] / 2.0;
            v.max(1e-5 * m).ln() - digamma(half) + half.ln()
        })
        .collect();
    let mean_trigamma = mean(&usable.iter().map(|&i| trigamma(df[i] / 2.0)).collect::<Vec<_>>());

    // Location of e per gene, and the excess variance around it
    let (emean, evar) = match covariate {
        None => {
            let emean = mean(&e);
            let evar = e.iter().map(|v| (v - emean).powi(2)).sum::<f64>() / (n - 1) as f64;
            (vec![emean; x.len()], evar)
        }
        Some(cov) => {
            let xs: Vec<f64> = usable.iter().map(|&i| cov[i]).collect();
            let curve = TrendCurve::fit(&xs, &e, &LowessParams::default())?;
            let rss: f64 = xs.iter().zip(&e).map(|(&a, &v)| (v - curve.predict(a)).powi(2)).sum();
            let evar = rss / (n.saturating_sub(2).max(1)) as f64;
            let emean = cov.iter().map(|&a| curve.predict(a)).collect();
            (emean, evar)
        }
    };
    let evar = evar - mean_trigamma;

    let (df_prior, s2_prior): (f64, Vec<f64>) = if evar > 0.0 {
        let df2 = 2.0 * trigamma_inverse(evar);
        let shift = digamma(df2 / 2.0) - (df2 / 2.0).ln();
        (df2, emean.iter().map(|em| (em + shift).exp()).collect())
    } else if covariate.is_none() {
        // Pooled variance is the limiting estimate of the scale here
        (f64::INFINITY, vec![mean(&vars); x.len()])
    } else {
        (f64::INFINITY, emean.iter().map(|em| em.exp()).collect())
    };

    log::debug!(
        "Variance prior: df_prior = {}, s2_prior (first gene) = {}",
        df_prior,
        s2_prior.first().copied().unwrap_or(f64::NAN)
    );
    Ok((s2_prior, df_prior))
}

/// Moderated t-tests of every contrast against zero
pub fn ebayes(fit: &LinearModelFit, contrasts: &ContrastMatrix, params: &EbayesParams) -> Result<FitResult> {
    params.validate()?;
    let squeezed = squeeze_for_fit(fit, params)?;
    let result = moderated_tests(fit, contrasts, squeezed, 0.0)?;
    log::info!(
        "eBayes: {} genes, {} contrasts, df_prior = {:.3}",
        result.n_genes(),
        result.n_contrasts(),
        result.df_prior()
    );
    Ok(result)
}

/// Moderated t-tests of every contrast against the interval |logFC| <= lfc
pub fn treat(fit: &LinearModelFit, contrasts: &ContrastMatrix, lfc: f64, params: &EbayesParams) -> Result<FitResult> {
    if !(lfc >= 0.0 && lfc.is_finite()) {
        return Err(VoomError::InvalidParameter {
            reason: format!("fold-change threshold must be a finite non-negative log2 value, got {}", lfc),
        });
    }
    params.validate()?;
    let squeezed = squeeze_for_fit(fit, params)?;
    let result = moderated_tests(fit, contrasts, squeezed, lfc)?;
    log::info!(
        "treat: {} genes, {} contrasts, |logFC| threshold {}",
        result.n_genes(),
        result.n_contrasts(),
        lfc
    );
    Ok(result)
}

fn squeeze_for_fit(fit: &LinearModelFit, params: &EbayesParams) -> Result<SqueezedVariances> {
    let sigma2 = fit.sigma2().to_vec();
    let df = fit.df_residual().to_vec();
    let amean = fit.amean().to_vec();
    let covariate = if params.trend { Some(amean.as_slice()) } else { None };
    squeeze_var(&sigma2, &df, covariate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squeeze_shrinks_towards_prior() {
        let sigma2: Vec<f64> = (0..200).map(|i| 0.5 + ((i * 37) % 100) as f64 / 50.0).collect();
        let df = vec![4.0; 200];
        let sq = squeeze_var(&sigma2, &df, None).unwrap();

        let s0 = sq.s2_prior[0];
        assert!(sq.s2_prior.iter().all(|&v| v == s0));
        for (post, raw) in sq.s2_post.iter().zip(&sigma2) {
            // posterior lies between the raw variance and the prior
            assert!((post - raw) * (post - s0) <= 1e-12);
        }
    }

    #[test]
    fn test_identical_variances_give_infinite_prior_df() {
        let sigma2 = vec![0.3; 50];
        let df = vec![5.0; 50];
        let sq = squeeze_var(&sigma2, &df, None).unwrap();
        assert!(sq.df_prior.is_infinite());
        assert!((sq.s2_prior[0] - 0.3).abs() < 1e-12);
        assert!(sq.s2_post.iter().all(|&v| (v - 0.3).abs() < 1e-12));
    }

    #[test]
    fn test_chi_square_like_variances_finite_df() {
        // Widely spread variances around 1 with large dispersion
        let sigma2: Vec<f64> = (1..=300).map(|i| ((i as f64) / 60.0).exp() / 50.0).collect();
        let df = vec![2.0; 300];
        let sq = squeeze_var(&sigma2, &df, None).unwrap();
        assert!(sq.df_prior.is_finite() && sq.df_prior > 0.0);
    }

    #[test]
    fn test_zero_variance_is_offset() {
        let mut sigma2: Vec<f64> = (0..20).map(|i| 0.1 + i as f64 * 0.05).collect();
        sigma2[3] = 0.0;
        let sq = squeeze_var(&sigma2, &vec![3.0; 20], None).unwrap();
        assert!(sq.s2_post.iter().all(|v| v.is_finite()));
        assert!(sq.s2_prior[0] > 0.0);
    }

    #[test]
    fn test_single_gene_is_degenerate() {
        let err = squeeze_var(&[0.2], &[3.0], None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NumericDegeneracy);
    }

    #[test]
    fn test_trended_prior_varies() {
        let amean: Vec<f64> = (0..100).map(|i| i as f64 / 10.0).collect();
        let sigma2: Vec<f64> = amean
            .iter()
            .enumerate()
            .map(|(i, a)| (2.0 - 0.15 * a).exp() * (1.0 + 0.3 * ((i * 13 % 7) as f64 - 3.0) / 3.0))
            .collect();
        let sq = squeeze_var(&sigma2, &vec![4.0; 100], Some(&amean)).unwrap();
        assert!(sq.s2_prior[0] > sq.s2_prior[99]);
    }

    fn three_group_fit() -> (LinearModelFit, ContrastMatrix) {
        use crate::data::SampleDesign;
        use crate::glm::{fit_linear_models, DesignMatrix};

        let samples: Vec<String> = (1..=9).map(|i| format!("s{}", i)).collect();
        let groups: Vec<String> = ["Basal", "Basal", "Basal", "LP", "LP", "LP", "ML", "ML", "ML"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let design = DesignMatrix::from_sample_design(&SampleDesign::new(samples, "group", groups).unwrap()).unwrap();
        let contrasts =
            ContrastMatrix::from_expressions(&design, &["Basal - LP", "Basal - ML", "LP - ML"]).unwrap();

        let n_genes = 120;
        let mut expr = ndarray::Array2::zeros((n_genes, 9));
        for g in 0..n_genes {
            // every fourth gene is up in Basal by an amount growing with g
            let shift = if g % 4 == 0 { 0.5 + g as f64 / 40.0 } else { 0.0 };
            for j in 0..9 {
                let noise = (((g * 31 + j * 17) % 11) as f64 - 5.0) / 25.0;
                let group_effect = if j < 3 { shift } else { 0.0 };
                expr[[g, j]] = 5.0 + g as f64 / 30.0 + group_effect + noise;
            }
        }
        let genes: Vec<String> = (0..n_genes).map(|g| format!("g{}", g)).collect();
        let fit = fit_linear_models(expr.view(), None, &design, &genes).unwrap();
        (fit, contrasts)
    }

    #[test]
    fn test_treat_never_increases_significant_counts() {
        use crate::testing::{decide_tests, DecideParams};

        let (fit, contrasts) = three_group_fit();
        let params = EbayesParams::default();
        let ordinary = ebayes(&fit, &contrasts, &params).unwrap();
        let thresholded = treat(&fit, &contrasts, 1.0, &params).unwrap();

        let d0 = decide_tests(&ordinary, &DecideParams::default()).unwrap();
        let d1 = decide_tests(&thresholded, &DecideParams::default()).unwrap();
        for (a, b) in d0.summary().iter().zip(d1.summary().iter()) {
            assert!(b.up + b.down <= a.up + a.down);
            assert_eq!(a.up + a.down + a.not_sig, 120);
        }
        assert!(d0.summary()[0].up > 0);

        for (p0, p1) in ordinary.p_values().iter().zip(thresholded.p_values().iter()) {
            assert!(p1 + 1e-12 >= *p0);
        }
        assert_eq!(thresholded.lfc_threshold(), 1.0);
        assert_eq!(ordinary.df_prior(), thresholded.df_prior());
    }

    #[test]
    fn test_treat_with_zero_threshold_matches_ebayes() {
        let (fit, contrasts) = three_group_fit();
        let params = EbayesParams::default();
        let a = ebayes(&fit, &contrasts, &params).unwrap();
        let b = treat(&fit, &contrasts, 0.0, &params).unwrap();
        for (x, y) in a.p_values().iter().zip(b.p_values().iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let (fit, contrasts) = three_group_fit();
        let err = treat(&fit, &contrasts, -0.5, &EbayesParams::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_df_total_capped_by_pooled_df() {
        let (fit, contrasts) = three_group_fit();
        let result = ebayes(&fit, &contrasts, &EbayesParams::default()).unwrap();
        let pooled = 120.0 * 6.0;
        for &d in result.df_total() {
            assert!(d <= pooled && d >= 6.0);
        }
    }

    #[test]
    fn test_robust_rejected() {
        let params = EbayesParams {
            robust: true,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
