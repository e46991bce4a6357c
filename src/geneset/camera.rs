//! Competitive gene set testing allowing for inter-gene correlation
//!
//! Each set's moderated t statistics are compared with those of all other
//! genes. The variance of the comparison is inflated by the correlation
//! between genes of the set, estimated from the standardized residuals.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::collection::{GeneSet, GeneSetCollection};
use crate::error::{Result, VoomError};
use crate::glm::DesignMatrix;
use crate::stats::{mean, rank_average, tie_sizes};
use crate::testing::{benjamini_hochberg, normal_tails, upper_tail_t, FitResult};

/// Configurable parameters for camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraParams {
    /// Fixed inter-gene correlation for every set. None estimates it per set
    pub inter_gene_cor: Option<f64>,
    /// Wilcoxon rank-sum test instead of the parametric two-sample t
    pub use_ranks: bool,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            inter_gene_cor: None,
            use_ranks: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "Up"),
            Direction::Down => write!(f, "Down"),
        }
    }
}

/// Test result for one gene set
#[derive(Debug, Clone)]
pub struct GeneSetResult {
    pub name: String,
    /// Set members present in the fit
    pub n_genes: usize,
    pub correlation: f64,
    /// None when the set could not be tested
    pub direction: Option<Direction>,
    pub p_value: f64,
    pub fdr: f64,
    /// No member of the set was found among the fitted genes
    pub empty: bool,
}

/// Test every set in `sets` for one contrast of `fit`
pub fn camera(
    fit: &FitResult,
    design: &DesignMatrix,
    contrast: &str,
    sets: &GeneSetCollection,
    params: &CameraParams,
) -> Result<Vec<GeneSetResult>> {
    let k = fit.contrast_index(contrast)?;
    if let Some(cor) = params.inter_gene_cor {
        if !(cor > -1.0 && cor < 1.0) {
            return Err(VoomError::InvalidParameter {
                reason: format!("inter-gene correlation must be in (-1, 1), got {}", cor),
            });
        }
    }
    if fit.residuals().ncols() != design.n_samples() {
        return Err(VoomError::DimensionMismatch {
            expected: format!("residuals over {} samples", design.n_samples()),
            got: format!("{}", fit.residuals().ncols()),
        });
    }

    let n_genes = fit.n_genes();
    if n_genes < 3 {
        return Err(VoomError::degenerate(
            "camera",
            format!("{} genes; competitive testing needs at least 3", n_genes),
        ));
    }

    let stat: Vec<f64> = fit.t_column(k).to_vec();
    let standardized = standardized_residuals(fit);
    let index: HashMap<&str, usize> = fit.gene_ids().iter().enumerate().map(|(i, g)| (g.as_str(), i)).collect();

    let df_camera = (design.residual_df() as f64 + fit.df_prior()).min((n_genes - 2) as f64);
    let ranks = if params.use_ranks { Some(rank_average(&stat)) } else { None };
    let ties = tie_correction(&stat);

    let mut results: Vec<GeneSetResult> = sets
        .iter()
        .map(|set| {
            let members = match_members(set, &index);
            let m = members.len();
            if m == 0 {
                log::warn!("Gene set '{}' has no members among the fitted genes", set.name);
                return GeneSetResult {
                    name: set.name.clone(),
                    n_genes: 0,
                    correlation: f64::NAN,
                    direction: None,
                    p_value: f64::NAN,
                    fdr: f64::NAN,
                    empty: true,
                };
            }

            let correlation = match params.inter_gene_cor {
                Some(c) => c,
                None => estimate_correlation(&standardized, &members, design.residual_df()),
            };

            let (p_down, p_up) = if m == n_genes {
                log::warn!("Gene set '{}' contains every fitted gene; no competitive test", set.name);
                (f64::NAN, f64::NAN)
            } else if let Some(ranks) = &ranks {
                rank_sum_with_correlation(&members, ranks, ties, correlation)
            } else {
                two_sample_t(&members, &stat, correlation, df_camera)
            };

            let (direction, p_value) = if p_up.is_nan() || p_down.is_nan() {
                (None, f64::NAN)
            } else if p_down < p_up {
                (Some(Direction::Down), (2.0 * p_down).min(1.0))
            } else {
                (Some(Direction::Up), (2.0 * p_up).min(1.0))
            };
            GeneSetResult {
                name: set.name.clone(),
                n_genes: m,
                correlation,
                direction,
                p_value,
                fdr: f64::NAN,
                empty: false,
            }
        })
        .collect();

    let pvalues: Vec<f64> = results.iter().map(|r| r.p_value).collect();
    for (r, fdr) in results.iter_mut().zip(benjamini_hochberg(&pvalues)) {
        r.fdr = fdr;
    }

    results.sort_by(|a, b| {
        a.empty
            .cmp(&b.empty)
            .then_with(|| match (a.p_value.is_nan(), b.p_value.is_nan()) {
                (false, false) => a.p_value.total_cmp(&b.p_value),
                (x, y) => x.cmp(&y),
            })
            .then_with(|| a.name.cmp(&b.name))
    });

    log::info!(
        "camera: {} sets tested for contrast '{}' ({} empty)",
        results.len(),
        contrast,
        results.iter().filter(|r| r.empty).count()
    );
    Ok(results)
}

fn match_members(set: &GeneSet, index: &HashMap<&str, usize>) -> Vec<usize> {
    let members: Vec<usize> = set.genes.iter().filter_map(|g| index.get(g.as_str()).copied()).collect();
    if members.len() < set.genes.len() {
        log::debug!(
            "Gene set '{}': {} of {} members not among the fitted genes",
            set.name,
            set.genes.len() - members.len(),
            set.genes.len()
        );
    }
    members
}

/// Residuals divided by each gene's residual standard deviation
fn standardized_residuals(fit: &FitResult) -> Vec<Vec<f64>> {
    fit.residuals()
        .rows()
        .into_iter()
        .zip(fit.sigma2())
        .map(|(row, &s2)| {
            let s = s2.sqrt();
            row.iter().map(|&r| if s > 0.0 { r / s } else { 0.0 }).collect()
        })
        .collect()
}

/// Correlation implied by the variance inflation of the set mean.
///
/// The residual vectors span `residual_df` dimensions, so the squared column
/// means are averaged over that many degrees of freedom.
fn estimate_correlation(u: &[Vec<f64>], members: &[usize], residual_df: usize) -> f64 {
    let m = members.len();
    if m < 2 || residual_df == 0 {
        return 0.0;
    }
    let n_samples = u[members[0]].len();
    let sum_sq: f64 = (0..n_samples)
        .map(|j| {
            let col_mean = members.iter().map(|&g| u[g][j]).sum::<f64>() / m as f64;
            col_mean * col_mean
        })
        .sum();
    let vif = m as f64 * sum_sq / residual_df as f64;
    let cor = (vif - 1.0) / (m - 1) as f64;
    cor.clamp(-1.0 / (m - 1) as f64, 1.0)
}

/// 1 - sum(t^3 - t) / (n^3 - n) over groups of tied statistics
fn tie_correction(stat: &[f64]) -> f64 {
    let n = stat.len() as f64;
    let adjust: f64 = tie_sizes(stat)
        .into_iter()
        .map(|t| {
            let t = t as f64;
            t * (t + 1.0) * (t - 1.0)
        })
        .sum();
    1.0 - adjust / (n * (n + 1.0) * (n - 1.0))
}

/// Wilcoxon rank-sum test of the set against the remaining genes with the
/// variance adjusted for correlation. Returns (p lower, p greater).
fn rank_sum_with_correlation(members: &[usize], ranks: &[f64], ties: f64, correlation: f64) -> (f64, f64) {
    let n = ranks.len() as f64;
    let n1 = members.len() as f64;
    let n2 = n - n1;

    let rank_sum: f64 = members.iter().map(|&g| ranks[g]).sum();
    let u = n1 * n2 + n1 * (n1 + 1.0) / 2.0 - rank_sum;
    let mu = n1 * n2 / 2.0;

    let mut sigma2 = if correlation == 0.0 || members.len() == 1 {
        n1 * n2 * (n + 1.0) / 12.0
    } else {
        let s = (1.0f64).asin() * n1 * n2
            + (0.5f64).asin() * n1 * n2 * (n2 - 1.0)
            + (correlation / 2.0).asin() * n1 * (n1 - 1.0) * n2 * (n2 - 1.0)
            + ((correlation + 1.0) / 2.0).asin() * n1 * (n1 - 1.0) * n2;
        s / 2.0 / std::f64::consts::PI
    };
    sigma2 *= ties;
    if !(sigma2 > 0.0) {
        return (f64::NAN, f64::NAN);
    }

    let sd = sigma2.sqrt();
    // Large U means the set ranks low
    let (_, p_less) = normal_tails((u - 0.5 - mu) / sd);
    let (p_greater, _) = normal_tails((u + 0.5 - mu) / sd);
    (p_less, p_greater)
}

/// Two-sample t of the set mean statistic against the other genes with the
/// set variance inflated by `1 + (m - 1) * correlation`. Returns (p lower,
/// p greater).
fn two_sample_t(members: &[usize], stat: &[f64], correlation: f64, df: f64) -> (f64, f64) {
    let g = stat.len() as f64;
    let m = members.len() as f64;
    let m2 = g - m;

    let mean_all = mean(stat);
    let var_all = stat.iter().map(|t| (t - mean_all).powi(2)).sum::<f64>() / (g - 1.0);
    let mean_set = members.iter().map(|&i| stat[i]).sum::<f64>() / m;

    let vif = 1.0 + (m - 1.0) * correlation;
    let delta = g / m2 * (mean_set - mean_all);
    let var_pooled = ((g - 1.0) * var_all - delta * delta * m * m2 / g) / (g - 2.0);
    let t = delta / (var_pooled * (vif / m + 1.0 / m2)).sqrt();

    let p_greater = upper_tail_t(t, df);
    let p_less = upper_tail_t(-t, df);
    (p_less, p_greater)
}
