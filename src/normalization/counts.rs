//! Counts-per-million transformations
//!
//! Provides library sizes, CPM and log2-CPM, and the [`NormalizedMatrix`]
//! that bundles them with per-sample normalization factors.

use ndarray::{Array2, ArrayView2, Axis};

use crate::data::CountMatrix;
use crate::error::{Result, VoomError};

/// Default additive prior for log2-CPM
pub const DEFAULT_PRIOR_COUNT: f64 = 0.25;

/// Column sums of a count matrix
pub fn library_sizes(counts: ArrayView2<f64>) -> Vec<f64> {
    counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
}

/// Counts per million
///
/// CPM = count / library_size * 1e6, column-wise.
pub fn cpm(counts: ArrayView2<f64>, library_sizes: &[f64]) -> Result<Array2<f64>> {
    let (n_genes, n_samples) = counts.dim();

    if library_sizes.len() != n_samples {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} library sizes", n_samples),
            got: format!("{} library sizes", library_sizes.len()),
        });
    }

    if let Some(j) = library_sizes.iter().position(|&l| !(l > 0.0 && l.is_finite())) {
        return Err(VoomError::degenerate(
            "cpm",
            format!("library size of sample {} is {}", j, library_sizes[j]),
        ));
    }

    let mut result = counts.to_owned();
    for j in 0..n_samples {
        let scale = 1e6 / library_sizes[j];
        for i in 0..n_genes {
            result[[i, j]] *= scale;
        }
    }

    Ok(result)
}

/// log2(CPM + prior_count)
pub fn log_cpm(cpm: &Array2<f64>, prior_count: f64) -> Array2<f64> {
    cpm.mapv(|v| (v + prior_count).log2())
}

/// CPM and log-CPM over a count matrix, with the normalization factors and
/// effective library sizes they were computed from
#[derive(Debug, Clone)]
pub struct NormalizedMatrix {
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
    library_sizes: Vec<f64>,
    norm_factors: Vec<f64>,
    effective_library_sizes: Vec<f64>,
    cpm: Array2<f64>,
    log_cpm: Array2<f64>,
    prior_count: f64,
}

impl NormalizedMatrix {
    /// Normalize using the matrix's library sizes scaled by `norm_factors`
    pub fn new(counts: &CountMatrix, norm_factors: &[f64], prior_count: f64) -> Result<Self> {
        let n_samples = counts.n_samples();
        if norm_factors.len() != n_samples {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} normalization factors", n_samples),
                got: format!("{} normalization factors", norm_factors.len()),
            });
        }
        if let Some(j) = norm_factors.iter().position(|&f| !(f > 0.0 && f.is_finite())) {
            return Err(VoomError::degenerate(
                "normalization",
                format!("normalization factor of sample '{}' is {}", counts.sample_ids()[j], norm_factors[j]),
            ));
        }
        if !(prior_count >= 0.0) {
            return Err(VoomError::InvalidParameter {
                reason: format!("prior count must be non-negative, got {}", prior_count),
            });
        }

        let library_sizes = counts.library_sizes().to_vec();
        let effective: Vec<f64> = library_sizes
            .iter()
            .zip(norm_factors.iter())
            .map(|(&l, &f)| l * f)
            .collect();

        let cpm_values = cpm(counts.counts(), &effective)?;
        let log_values = log_cpm(&cpm_values, prior_count);

        Ok(Self {
            gene_ids: counts.gene_ids().to_vec(),
            sample_ids: counts.sample_ids().to_vec(),
            library_sizes,
            norm_factors: norm_factors.to_vec(),
            effective_library_sizes: effective,
            cpm: cpm_values,
            log_cpm: log_values,
            prior_count,
        })
    }

    /// Normalize with all factors equal to 1
    pub fn unscaled(counts: &CountMatrix, prior_count: f64) -> Result<Self> {
        Self::new(counts, &vec![1.0; counts.n_samples()], prior_count)
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn library_sizes(&self) -> &[f64] {
        &self.library_sizes
    }

    pub fn norm_factors(&self) -> &[f64] {
        &self.norm_factors
    }

    /// Library size times normalization factor
    pub fn effective_library_sizes(&self) -> &[f64] {
        &self.effective_library_sizes
    }

    pub fn cpm(&self) -> &Array2<f64> {
        &self.cpm
    }

    pub fn log_cpm(&self) -> &Array2<f64> {
        &self.log_cpm
    }

    pub fn prior_count(&self) -> f64 {
        self.prior_count
    }
}
