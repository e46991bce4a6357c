//! Normalization factors using the trimmed mean of M-values (TMM)

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::error::{Result, VoomError};
use crate::stats::rank_average;

/// Method for normalization factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormMethod {
    /// Trimmed mean of M-values
    Tmm,
    /// All factors equal to 1
    None,
}

/// Configurable parameters for TMM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TmmParams {
    /// Fraction trimmed from each tail of the log-ratios (M)
    pub log_ratio_trim: f64,
    /// Fraction trimmed from each tail of the absolute expression (A)
    pub sum_trim: f64,
    /// Precision-weight the trimmed mean by the inverse asymptotic variance
    pub weighted: bool,
    /// Genes with A at or below this value are excluded
    pub a_cutoff: f64,
    /// Reference sample index; None picks the sample whose library size is
    /// closest to the geometric mean library size
    pub reference: Option<usize>,
    /// Rescale factors to a geometric mean of 1
    pub center: bool,
}

impl Default for TmmParams {
    fn default() -> Self {
        Self {
            log_ratio_trim: 0.3,
            sum_trim: 0.05,
            weighted: true,
            a_cutoff: -1e10,
            reference: None,
            center: true,
        }
    }
}

/// Estimate one normalization factor per sample
pub fn calc_norm_factors(counts: &CountMatrix, method: NormMethod, params: &TmmParams) -> Result<Vec<f64>> {
    match method {
        NormMethod::None => Ok(vec![1.0; counts.n_samples()]),
        NormMethod::Tmm => calc_tmm_factors(counts, params),
    }
}

fn calc_tmm_factors(counts: &CountMatrix, params: &TmmParams) -> Result<Vec<f64>> {
    validate_params(params)?;

    let n_samples = counts.n_samples();
    let lib_sizes = counts.library_sizes();

    let ref_idx = match params.reference {
        Some(r) if r >= n_samples => {
            return Err(VoomError::InvalidParameter {
                reason: format!("reference sample index {} out of bounds ({} samples)", r, n_samples),
            });
        }
        Some(r) => r,
        None => select_reference(lib_sizes)?,
    };
    log::debug!(
        "TMM reference sample: {} (library size {})",
        counts.sample_ids()[ref_idx],
        lib_sizes[ref_idx]
    );

    let reference = counts.sample_counts(ref_idx);
    let mut factors: Vec<f64> = (0..n_samples)
        .map(|j| {
            tmm_factor(
                counts.sample_counts(j),
                reference,
                lib_sizes[j],
                lib_sizes[ref_idx],
                params,
            )
        })
        .collect();

    if params.center {
        let log_mean = factors.iter().map(|f| f.ln()).sum::<f64>() / n_samples as f64;
        let geo_mean = log_mean.exp();
        for f in factors.iter_mut() {
            *f /= geo_mean;
        }
    }

    if let Some(j) = factors.iter().position(|&f| !(f > 0.0 && f.is_finite())) {
        return Err(VoomError::degenerate(
            "TMM normalization",
            format!("factor for sample '{}' is {}", counts.sample_ids()[j], factors[j]),
        ));
    }

    for (id, f) in counts.sample_ids().iter().zip(factors.iter()) {
        log::debug!("TMM factor {}: {:.4}", id, f);
    }

    Ok(factors)
}

fn validate_params(params: &TmmParams) -> Result<()> {
    for (name, trim) in [("log_ratio_trim", params.log_ratio_trim), ("sum_trim", params.sum_trim)] {
        if !(0.0..0.5).contains(&trim) {
            return Err(VoomError::InvalidParameter {
                reason: format!("{} must be in [0, 0.5), got {}", name, trim),
            });
        }
    }
    Ok(())
}

/// Index of the sample whose library size is closest to the geometric mean
/// of all library sizes; ties go to the lowest index
pub fn select_reference(lib_sizes: &[f64]) -> Result<usize> {
    if lib_sizes.is_empty() {
        return Err(VoomError::InvalidParameter {
            reason: "no samples to choose a TMM reference from".to_string(),
        });
    }
    if let Some(j) = lib_sizes.iter().position(|&l| !(l > 0.0)) {
        return Err(VoomError::degenerate(
            "TMM normalization",
            format!("sample {} has library size {}", j, lib_sizes[j]),
        ));
    }

    let geo_mean = (lib_sizes.iter().map(|l| l.ln()).sum::<f64>() / lib_sizes.len() as f64).exp();
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (j, &l) in lib_sizes.iter().enumerate() {
        let dist = (l - geo_mean).abs();
        if dist < best_dist {
            best = j;
            best_dist = dist;
        }
    }
    Ok(best)
}

/// TMM factor of `obs` relative to `reference`.
///
/// Genes with a zero count in either sample have an undefined log-ratio and
/// are left out. Returns 1.0 when no genes survive trimming.
pub fn tmm_factor(
    obs: ArrayView1<f64>,
    reference: ArrayView1<f64>,
    lib_obs: f64,
    lib_ref: f64,
    params: &TmmParams,
) -> f64 {
    let mut log_ratios = Vec::with_capacity(obs.len());
    let mut abs_expr = Vec::with_capacity(obs.len());
    let mut variances = Vec::with_capacity(obs.len());

    for (&x, &r) in obs.iter().zip(reference.iter()) {
        if x <= 0.0 || r <= 0.0 {
            continue;
        }
        let p_obs = x / lib_obs;
        let p_ref = r / lib_ref;
        let m = (p_obs / p_ref).log2();
        let a = (p_obs.log2() + p_ref.log2()) / 2.0;
        let v = (lib_obs - x) / lib_obs / x + (lib_ref - r) / lib_ref / r;
        if !m.is_finite() || !a.is_finite() || a <= params.a_cutoff {
            continue;
        }
        log_ratios.push(m);
        abs_expr.push(a);
        variances.push(v);
    }

    let n = log_ratios.len();
    if n == 0 {
        return 1.0;
    }
    if log_ratios.iter().all(|m| m.abs() < 1e-6) {
        return 1.0;
    }

    let lo_m = (n as f64 * params.log_ratio_trim).floor() + 1.0;
    let hi_m = n as f64 + 1.0 - lo_m;
    let lo_a = (n as f64 * params.sum_trim).floor() + 1.0;
    let hi_a = n as f64 + 1.0 - lo_a;

    let rank_m = rank_average(&log_ratios);
    let rank_a = rank_average(&abs_expr);

    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..n {
        let keep = rank_m[i] >= lo_m && rank_m[i] <= hi_m && rank_a[i] >= lo_a && rank_a[i] <= hi_a;
        if !keep {
            continue;
        }
        if params.weighted {
            // v is 0 only when one gene holds the entire library
            if variances[i] > 0.0 {
                num += log_ratios[i] / variances[i];
                den += 1.0 / variances[i];
            }
        } else {
            num += log_ratios[i];
            den += 1.0;
        }
    }

    let f = num / den;
    if f.is_finite() {
        2f64.powf(f)
    } else {
        1.0
    }
}
