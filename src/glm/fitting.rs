//! Per-gene (weighted) least squares fitting

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use rayon::prelude::*;

use super::contrast::ContrastMatrix;
use super::design::DesignMatrix;
use crate::error::{Result, VoomError};
use crate::variance::VoomOutput;

/// Linear model fits for every gene
#[derive(Debug, Clone)]
pub struct LinearModelFit {
    gene_ids: Vec<String>,
    coef_names: Vec<String>,
    /// Coefficient estimates (genes x coefficients)
    coefficients: Array2<f64>,
    /// Unscaled covariance (X'WX)^-1 per gene (genes x coefs x coefs)
    cov_unscaled: Array3<f64>,
    /// Residual variance per gene
    sigma2: Array1<f64>,
    /// Residual degrees of freedom per gene
    df_residual: Array1<f64>,
    /// Average log-expression per gene
    amean: Array1<f64>,
    /// sqrt(w) * (y - X b), genes x samples
    residuals: Array2<f64>,
}

/// Coefficients transformed by a contrast matrix
#[derive(Debug, Clone)]
pub struct ContrastFit {
    pub contrast_names: Vec<String>,
    /// C'b per gene (genes x contrasts)
    pub effects: Array2<f64>,
    /// sqrt(diag(C' V C)) per gene (genes x contrasts)
    pub stdev_unscaled: Array2<f64>,
}

struct GeneFit {
    coefficients: Vec<f64>,
    cov_unscaled: Vec<f64>,
    sigma2: f64,
    residuals: Vec<f64>,
}

/// Fit `y_g = X b_g` for every gene (row of `expr`).
///
/// With `weights`, each gene is fitted by weighted least squares using its
/// own row of weights; otherwise ordinary least squares. Genes are fitted in
/// parallel.
pub fn fit_linear_models(
    expr: ArrayView2<f64>,
    weights: Option<ArrayView2<f64>>,
    design: &DesignMatrix,
    gene_ids: &[String],
) -> Result<LinearModelFit> {
    let (n_genes, n_samples) = expr.dim();
    let n_coefs = design.n_coefs();

    if n_samples != design.n_samples() {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} samples (design rows)", design.n_samples()),
            got: format!("{} samples", n_samples),
        });
    }
    if gene_ids.len() != n_genes {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} gene IDs", n_genes),
            got: format!("{} gene IDs", gene_ids.len()),
        });
    }
    if let Some(w) = weights {
        if w.dim() != expr.dim() {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{:?} weight matrix", expr.dim()),
                got: format!("{:?}", w.dim()),
            });
        }
    }
    if n_samples <= n_coefs {
        return Err(VoomError::InsufficientReplication {
            reason: format!("{} samples for {} coefficients", n_samples, n_coefs),
        });
    }

    let x = design.matrix();
    let results: Vec<GeneFit> = (0..n_genes)
        .into_par_iter()
        .map(|g| {
            let w = weights.as_ref().map(|w| w.row(g));
            fit_single_gene(expr.row(g), w, x).map_err(|details| {
                VoomError::degenerate("linear model fit", format!("gene '{}': {}", gene_ids[g], details))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut coefficients = Array2::zeros((n_genes, n_coefs));
    let mut cov_unscaled = Array3::zeros((n_genes, n_coefs, n_coefs));
    let mut sigma2 = Array1::zeros(n_genes);
    let mut residuals = Array2::zeros((n_genes, n_samples));

    for (g, fit) in results.into_iter().enumerate() {
        for j in 0..n_coefs {
            coefficients[[g, j]] = fit.coefficients[j];
            for k in 0..n_coefs {
                cov_unscaled[[g, j, k]] = fit.cov_unscaled[j * n_coefs + k];
            }
        }
        sigma2[g] = fit.sigma2;
        for i in 0..n_samples {
            residuals[[g, i]] = fit.residuals[i];
        }
    }

    let df = (n_samples - n_coefs) as f64;
    let amean: Array1<f64> = expr.rows().into_iter().map(|row| row.sum() / n_samples as f64).collect();

    Ok(LinearModelFit {
        gene_ids: gene_ids.to_vec(),
        coef_names: design.column_names().to_vec(),
        coefficients,
        cov_unscaled,
        sigma2,
        df_residual: Array1::from_elem(n_genes, df),
        amean,
        residuals,
    })
}

/// Weighted fit of voom expression values with their precision weights
pub fn lm_fit(voom: &VoomOutput, design: &DesignMatrix) -> Result<LinearModelFit> {
    if voom.sample_ids() != design.sample_ids() {
        return Err(VoomError::SampleMismatch {
            reason: "design rows are not in the same sample order as the expression matrix".to_string(),
        });
    }
    let fit = fit_linear_models(
        voom.expression().view(),
        Some(voom.weights().view()),
        design,
        voom.gene_ids(),
    )?;
    log::info!(
        "Fitted weighted linear models for {} genes ({} coefficients, residual df {})",
        fit.n_genes(),
        design.n_coefs(),
        design.residual_df()
    );
    Ok(fit)
}

fn fit_single_gene(
    y: ArrayView1<f64>,
    weights: Option<ArrayView1<f64>>,
    x: &Array2<f64>,
) -> std::result::Result<GeneFit, String> {
    let n_samples = y.len();
    let n_coefs = x.ncols();

    if let Some(w) = weights {
        if let Some(i) = w.iter().position(|&v| !(v > 0.0 && v.is_finite())) {
            return Err(format!("weight {} in sample {} is not positive", w[i], i));
        }
    }
    if let Some(i) = y.iter().position(|v| !v.is_finite()) {
        return Err(format!("non-finite expression value in sample {}", i));
    }

    let weight = |i: usize| weights.map_or(1.0, |w| w[i]);

    // Normal equations X'WX b = X'Wy
    let mut xtwx = vec![0.0; n_coefs * n_coefs];
    let mut xtwy = vec![0.0; n_coefs];
    for i in 0..n_samples {
        let wi = weight(i);
        for j in 0..n_coefs {
            let xij = x[[i, j]];
            if xij == 0.0 {
                continue;
            }
            for k in 0..n_coefs {
                xtwx[j * n_coefs + k] += wi * xij * x[[i, k]];
            }
            xtwy[j] += wi * xij * y[i];
        }
    }

    let chol = cholesky(&xtwx, n_coefs).ok_or_else(|| "X'WX is not positive definite".to_string())?;
    let beta = cholesky_solve(&chol, &xtwy, n_coefs);
    let cov = cholesky_inverse(&chol, n_coefs);

    let mut rss = 0.0;
    let mut residuals = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let fitted: f64 = (0..n_coefs).map(|j| x[[i, j]] * beta[j]).sum();
        let r = weight(i).sqrt() * (y[i] - fitted);
        rss += r * r;
        residuals.push(r);
    }

    Ok(GeneFit {
        coefficients: beta,
        cov_unscaled: cov,
        sigma2: rss / (n_samples - n_coefs) as f64,
        residuals,
    })
}

impl LinearModelFit {
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn coef_names(&self) -> &[String] {
        &self.coef_names
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    pub fn cov_unscaled(&self) -> &Array3<f64> {
        &self.cov_unscaled
    }

    pub fn sigma2(&self) -> &Array1<f64> {
        &self.sigma2
    }

    pub fn df_residual(&self) -> &Array1<f64> {
        &self.df_residual
    }

    pub fn amean(&self) -> &Array1<f64> {
        &self.amean
    }

    pub fn residuals(&self) -> &Array2<f64> {
        &self.residuals
    }

    /// Fitted values X b per gene (genes x samples)
    pub fn fitted_values(&self, design: &DesignMatrix) -> Array2<f64> {
        self.coefficients.dot(&design.matrix().t())
    }

    /// Apply contrasts to coefficients and their per-gene covariance
    pub fn contrasts(&self, contrasts: &ContrastMatrix) -> Result<ContrastFit> {
        if contrasts.coef_names() != self.coef_names.as_slice() {
            return Err(VoomError::DimensionMismatch {
                expected: format!("contrasts over [{}]", self.coef_names.join(", ")),
                got: format!("contrasts over [{}]", contrasts.coef_names().join(", ")),
            });
        }

        let c = contrasts.matrix();
        let n_genes = self.n_genes();
        let n_contrasts = c.ncols();
        let effects = self.coefficients.dot(c);

        let mut stdev_unscaled = Array2::zeros((n_genes, n_contrasts));
        for g in 0..n_genes {
            let v = self.cov_unscaled.index_axis(ndarray::Axis(0), g);
            let vc = v.dot(c);
            for k in 0..n_contrasts {
                let var: f64 = c.column(k).dot(&vc.column(k));
                stdev_unscaled[[g, k]] = var.max(0.0).sqrt();
            }
        }

        Ok(ContrastFit {
            contrast_names: contrasts.contrast_names().to_vec(),
            effects,
            stdev_unscaled,
        })
    }
}

/// Cholesky factor L (row-major, lower triangular) of a symmetric matrix.
/// None when the matrix is not numerically positive definite.
pub(crate) fn cholesky(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut l = vec![0.0; n * n];
    let max_diag = (0..n).map(|i| a[i * n + i].abs()).fold(0.0, f64::max);
    let tol = 1e-12 * max_diag.max(f64::MIN_POSITIVE);

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if sum <= tol {
                    return None;
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    Some(l)
}

/// Solve (L L') x = b
pub(crate) fn cholesky_solve(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

/// (L L')^-1, row-major
pub(crate) fn cholesky_inverse(l: &[f64], n: usize) -> Vec<f64> {
    let mut inv = vec![0.0; n * n];
    let mut e = vec![0.0; n];
    for col in 0..n {
        e.iter_mut().for_each(|v| *v = 0.0);
        e[col] = 1.0;
        let x = cholesky_solve(l, &e, n);
        for row in 0..n {
            inv[row * n + col] = x[row];
        }
    }
    inv
}
