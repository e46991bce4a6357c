//! Moderated t statistics and the fit result they produce

use ndarray::{Array1, Array2, ArrayView1};

use super::ebayes::SqueezedVariances;
use super::fdr::benjamini_hochberg;
use super::pvalue::{calculate_pvalue_t, upper_tail_t};
use crate::error::{Result, VoomError};
use crate::glm::{ContrastMatrix, LinearModelFit};

/// Per-gene, per-contrast test results together with the moderation
/// parameters that produced them.
#[derive(Debug, Clone)]
pub struct FitResult {
    gene_ids: Vec<String>,
    contrast_names: Vec<String>,
    /// log2 fold changes (genes x contrasts)
    effects: Array2<f64>,
    stdev_unscaled: Array2<f64>,
    t: Array2<f64>,
    p_values: Array2<f64>,
    adj_p_values: Array2<f64>,
    amean: Array1<f64>,
    sigma2: Array1<f64>,
    df_residual: Array1<f64>,
    s2_post: Array1<f64>,
    s2_prior: Array1<f64>,
    df_prior: f64,
    df_total: Array1<f64>,
    lfc_threshold: f64,
    residuals: Array2<f64>,
}

/// Moderated t-tests of all contrasts.
///
/// `lfc == 0` is the ordinary test against zero. A positive `lfc` tests
/// against the interval |logFC| <= lfc.
pub(crate) fn moderated_tests(
    fit: &LinearModelFit,
    contrasts: &ContrastMatrix,
    squeezed: SqueezedVariances,
    lfc: f64,
) -> Result<FitResult> {
    let n_genes = fit.n_genes();
    if squeezed.s2_post.len() != n_genes {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} posterior variances", n_genes),
            got: format!("{}", squeezed.s2_post.len()),
        });
    }

    let cf = fit.contrasts(contrasts)?;
    let n_contrasts = cf.contrast_names.len();

    let df_pooled: f64 = fit.df_residual().sum();
    let df_total: Array1<f64> = fit
        .df_residual()
        .iter()
        .map(|&d| (d + squeezed.df_prior).min(df_pooled))
        .collect();

    let mut t = Array2::zeros((n_genes, n_contrasts));
    let mut p_values = Array2::zeros((n_genes, n_contrasts));
    for g in 0..n_genes {
        let s_post = squeezed.s2_post[g].sqrt();
        for k in 0..n_contrasts {
            let se = cf.stdev_unscaled[[g, k]] * s_post;
            let b = cf.effects[[g, k]];
            let (stat, p) = if lfc > 0.0 {
                treat_statistic(b, se, lfc, df_total[g])
            } else {
                let stat = b / se;
                (stat, calculate_pvalue_t(stat, df_total[g]))
            };
            t[[g, k]] = stat;
            p_values[[g, k]] = p;
        }
    }

    let mut adj_p_values = Array2::zeros((n_genes, n_contrasts));
    for k in 0..n_contrasts {
        let adj = benjamini_hochberg(&p_values.column(k).to_vec());
        for (g, a) in adj.into_iter().enumerate() {
            adj_p_values[[g, k]] = a;
        }
    }

    Ok(FitResult {
        gene_ids: fit.gene_ids().to_vec(),
        contrast_names: cf.contrast_names,
        effects: cf.effects,
        stdev_unscaled: cf.stdev_unscaled,
        t,
        p_values,
        adj_p_values,
        amean: fit.amean().clone(),
        sigma2: fit.sigma2().clone(),
        df_residual: fit.df_residual().clone(),
        s2_post: Array1::from_vec(squeezed.s2_post),
        s2_prior: Array1::from_vec(squeezed.s2_prior),
        df_prior: squeezed.df_prior,
        df_total,
        lfc_threshold: lfc,
        residuals: fit.residuals().clone(),
    })
}

/// Statistic and p-value against |b| <= lfc
fn treat_statistic(b: f64, se: f64, lfc: f64, df: f64) -> (f64, f64) {
    let t_right = (b.abs() - lfc) / se;
    let t_left = (b.abs() + lfc) / se;
    let p = upper_tail_t(t_right, df) + upper_tail_t(t_left, df);
    let p = if p > 1.0 { 1.0 } else { p };
    let sign = if b < 0.0 { -1.0 } else { 1.0 };
    (sign * t_right.max(0.0), p)
}

impl FitResult {
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn contrast_names(&self) -> &[String] {
        &self.contrast_names
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn n_contrasts(&self) -> usize {
        self.contrast_names.len()
    }

    /// Column of a contrast, or a configuration error naming it
    pub fn contrast_index(&self, name: &str) -> Result<usize> {
        self.contrast_names
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| VoomError::InvalidContrast {
                contrast: name.to_string(),
                reason: format!("not among the fitted contrasts [{}]", self.contrast_names.join(", ")),
            })
    }

    pub fn effects(&self) -> &Array2<f64> {
        &self.effects
    }

    pub fn stdev_unscaled(&self) -> &Array2<f64> {
        &self.stdev_unscaled
    }

    /// Moderated t statistics
    pub fn t(&self) -> &Array2<f64> {
        &self.t
    }

    pub fn p_values(&self) -> &Array2<f64> {
        &self.p_values
    }

    /// Benjamini-Hochberg adjusted p-values, per contrast
    pub fn adj_p_values(&self) -> &Array2<f64> {
        &self.adj_p_values
    }

    pub fn amean(&self) -> &Array1<f64> {
        &self.amean
    }

    pub fn sigma2(&self) -> &Array1<f64> {
        &self.sigma2
    }

    pub fn df_residual(&self) -> &Array1<f64> {
        &self.df_residual
    }

    pub fn s2_post(&self) -> &Array1<f64> {
        &self.s2_post
    }

    pub fn s2_prior(&self) -> &Array1<f64> {
        &self.s2_prior
    }

    pub fn df_prior(&self) -> f64 {
        self.df_prior
    }

    pub fn df_total(&self) -> &Array1<f64> {
        &self.df_total
    }

    /// 0 for tests against zero
    pub fn lfc_threshold(&self) -> f64 {
        self.lfc_threshold
    }

    /// Weighted residuals from the linear model fit (genes x samples)
    pub fn residuals(&self) -> &Array2<f64> {
        &self.residuals
    }

    pub fn t_column(&self, contrast: usize) -> ArrayView1<'_, f64> {
        self.t.column(contrast)
    }
}

#[cfg(test)]
impl FitResult {
    /// Result with the given per-contrast columns; t is logFC and the
    /// variance fields are placeholders
    pub(crate) fn from_columns(
        gene_ids: &[&str],
        contrast_names: &[&str],
        effects: Array2<f64>,
        p_values: Array2<f64>,
        adj_p_values: Array2<f64>,
    ) -> Self {
        let n = gene_ids.len();
        FitResult {
            gene_ids: gene_ids.iter().map(|g| g.to_string()).collect(),
            contrast_names: contrast_names.iter().map(|c| c.to_string()).collect(),
            stdev_unscaled: Array2::ones(effects.dim()),
            t: effects.clone(),
            effects,
            p_values,
            adj_p_values,
            amean: Array1::from_shape_fn(n, |g| g as f64),
            sigma2: Array1::ones(n),
            df_residual: Array1::from_elem(n, 4.0),
            s2_post: Array1::ones(n),
            s2_prior: Array1::ones(n),
            df_prior: 0.0,
            df_total: Array1::from_elem(n, 4.0),
            lfc_threshold: 0.0,
            residuals: Array2::zeros((n, 6)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_treat_statistic_reduces_to_two_sided() {
        let (t, p) = treat_statistic(-1.2, 0.4, 0.0, 6.0);
        assert!((t + 3.0).abs() < 1e-12);
        let expected = 2.0 * upper_tail_t(3.0, 6.0);
        assert!((p - expected).abs() < 1e-12);
    }

    #[test]
    fn test_treat_statistic_inside_interval() {
        // |b| below the threshold: t is clamped at zero and p is large
        let (t, p) = treat_statistic(0.2, 0.1, 1.0, 10.0);
        assert_eq!(t, 0.0);
        assert!(p > 0.99 && p <= 1.0);
    }

    #[test]
    fn test_treat_pvalue_larger_than_ordinary() {
        for &b in &[0.5, 1.5, 3.0, -2.0] {
            let (_, p0) = treat_statistic(b, 0.3, 0.0, 8.0);
            let (_, p1) = treat_statistic(b, 0.3, 0.5, 8.0);
            assert!(p1 >= p0);
        }
    }
}
