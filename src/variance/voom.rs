//! Mean-variance modelling of log-CPM values and observation-level weights

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::lowess::{LowessParams, TrendCurve};
use crate::data::CountMatrix;
use crate::error::{Result, VoomError};
use crate::glm::{fit_linear_models, DesignMatrix};

/// Offset added to counts before taking logs
const COUNT_OFFSET: f64 = 0.5;

/// sqrt-sd below which a gene counts as having no residual variation
const MIN_SQRT_SD: f64 = 1e-6;

/// Configurable parameters for the mean-variance trend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoomParams {
    /// Lowess span for the sqrt-sd trend
    pub span: f64,
    /// Robustifying lowess iterations
    pub iterations: usize,
}

impl Default for VoomParams {
    fn default() -> Self {
        Self {
            span: 0.5,
            iterations: 3,
        }
    }
}

/// Log-CPM expression with precision weights
#[derive(Debug, Clone)]
pub struct VoomOutput {
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
    /// log2((count + 0.5) / (lib + 1) * 1e6), genes x samples
    expression: Array2<f64>,
    /// Inverse predicted variance of each observation
    weights: Array2<f64>,
    effective_library_sizes: Vec<f64>,
    /// Mean log-count per gene (trend x)
    mean_log_count: Vec<f64>,
    /// sqrt of the residual standard deviation per gene (trend y)
    sqrt_sd: Vec<f64>,
    trend: TrendCurve,
}

impl VoomOutput {
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn expression(&self) -> &Array2<f64> {
        &self.expression
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn effective_library_sizes(&self) -> &[f64] {
        &self.effective_library_sizes
    }

    pub fn mean_log_count(&self) -> &[f64] {
        &self.mean_log_count
    }

    pub fn sqrt_sd(&self) -> &[f64] {
        &self.sqrt_sd
    }

    /// Fitted mean-variance trend
    pub fn trend(&self) -> &TrendCurve {
        &self.trend
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }
}

/// Transform counts to log-CPM and estimate observation weights from the
/// mean-variance trend of a preliminary unweighted fit.
pub fn voom(
    counts: &CountMatrix,
    norm_factors: &[f64],
    design: &DesignMatrix,
    params: &VoomParams,
) -> Result<VoomOutput> {
    let n_genes = counts.n_genes();
    let n_samples = counts.n_samples();

    if norm_factors.len() != n_samples {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} normalization factors", n_samples),
            got: format!("{}", norm_factors.len()),
        });
    }
    if design.sample_ids() != counts.sample_ids() {
        return Err(VoomError::SampleMismatch {
            reason: "design rows are not in the same sample order as the count matrix".to_string(),
        });
    }
    if n_genes < 2 {
        return Err(VoomError::degenerate(
            "voom",
            format!("{} gene(s); a mean-variance trend needs at least 2", n_genes),
        ));
    }
    if !(params.span > 0.0 && params.span <= 1.0) {
        return Err(VoomError::InvalidParameter {
            reason: format!("lowess span must be in (0, 1], got {}", params.span),
        });
    }

    let lib: Vec<f64> = counts
        .library_sizes()
        .iter()
        .zip(norm_factors)
        .map(|(l, f)| l * f)
        .collect();
    if let Some(j) = lib.iter().position(|&l| !(l > 0.0 && l.is_finite())) {
        return Err(VoomError::degenerate(
            "voom",
            format!("effective library size of sample '{}' is {}", counts.sample_ids()[j], lib[j]),
        ));
    }

    let raw = counts.counts();
    let mut expression = Array2::zeros((n_genes, n_samples));
    for ((g, j), value) in expression.indexed_iter_mut() {
        *value = ((raw[[g, j]] + COUNT_OFFSET) / (lib[j] + 1.0) * 1e6).log2();
    }

    let fit = fit_linear_models(expression.view(), None, design, counts.gene_ids())?;

    let mean_log_lib = lib.iter().map(|l| (l + 1.0).log2()).sum::<f64>() / n_samples as f64;
    let mean_log_count: Vec<f64> = fit
        .amean()
        .iter()
        .map(|a| a + mean_log_lib - 1e6f64.log2())
        .collect();
    let sqrt_sd: Vec<f64> = fit.sigma2().iter().map(|s2| s2.sqrt().sqrt()).collect();

    // Genes with no reads at all sit on the floor of the transform
    let (trend_x, trend_y): (Vec<f64>, Vec<f64>) = (0..n_genes)
        .filter(|&g| raw.row(g).sum() > 0.0)
        .map(|g| (mean_log_count[g], sqrt_sd[g]))
        .unzip();
    if trend_x.len() < n_genes {
        log::debug!("voom: {} all-zero genes left out of the trend", n_genes - trend_x.len());
    }
    if trend_y.iter().all(|&s| s < MIN_SQRT_SD) {
        return Err(VoomError::degenerate(
            "voom",
            "all residual standard deviations are zero; the mean-variance trend is undefined",
        ));
    }

    let lowess = LowessParams {
        span: params.span,
        iterations: params.iterations,
        ..LowessParams::default()
    };
    let trend = TrendCurve::fit(&trend_x, &trend_y, &lowess)?;

    let fitted = fit.fitted_values(design);
    let fitted_log_counts = Array2::from_shape_fn((n_genes, n_samples), |(g, j)| {
        (2f64.powf(fitted[[g, j]]) * 1e-6 * (lib[j] + 1.0)).log2()
    });
    let weights = observation_weights(&trend, &fitted_log_counts, counts.gene_ids(), counts.sample_ids())?;

    log::info!(
        "voom: {} genes x {} samples, residual df {}, trend through {} genes",
        n_genes,
        n_samples,
        design.residual_df(),
        trend_x.len()
    );

    Ok(VoomOutput {
        gene_ids: counts.gene_ids().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
        expression,
        weights,
        effective_library_sizes: lib,
        mean_log_count,
        sqrt_sd,
        trend,
    })
}

/// Inverse fourth power of the trend at each fitted log-count
pub(crate) fn observation_weights(
    trend: &TrendCurve,
    fitted_log_counts: &Array2<f64>,
    gene_ids: &[String],
    sample_ids: &[String],
) -> Result<Array2<f64>> {
    let mut weights = Array2::zeros(fitted_log_counts.dim());
    for ((g, j), w) in weights.indexed_iter_mut() {
        let predicted = trend.predict(fitted_log_counts[[g, j]]);
        if !(predicted > 0.0 && predicted.is_finite()) {
            return Err(VoomError::degenerate(
                "voom",
                format!(
                    "predicted sqrt standard deviation {} for gene '{}' in sample '{}'",
                    predicted, gene_ids[g], sample_ids[j]
                ),
            ));
        }
        *w = 1.0 / predicted.powi(4);
    }
    Ok(weights)
}
