//! Removal of lowly expressed genes by a CPM threshold

use serde::{Deserialize, Serialize};

use crate::data::{CountMatrix, SampleDesign};
use crate::error::{Result, VoomError};
use crate::normalization::NormalizedMatrix;

/// What library sizes the filtered matrix carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibrarySizePolicy {
    /// Column sums of the retained genes
    #[default]
    Recompute,
    /// Library sizes of the unfiltered matrix
    Retain,
}

/// Configurable parameters for expression filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// A gene is expressed in a sample when its CPM is strictly above this
    pub cpm_threshold: f64,
    /// Minimum number of expressed samples. None uses the smallest group size
    pub min_samples: Option<usize>,
    pub library_sizes: LibrarySizePolicy,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            cpm_threshold: 1.0,
            min_samples: Some(3),
            library_sizes: LibrarySizePolicy::Recompute,
        }
    }
}

/// Counts of genes kept and removed by a filtering pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSummary {
    pub genes_before: usize,
    pub genes_kept: usize,
}

impl FilterSummary {
    pub fn genes_removed(&self) -> usize {
        self.genes_before - self.genes_kept
    }
}

/// Smallest group size in the design
pub fn min_samples_for_design(design: &SampleDesign) -> usize {
    design
        .group_sizes()
        .iter()
        .map(|(_, n)| *n)
        .min()
        .unwrap_or(1)
}

/// Indices of genes with CPM above `cpm_threshold` in at least `min_samples` samples
pub fn expressed_genes(cpm: &NormalizedMatrix, cpm_threshold: f64, min_samples: usize) -> Vec<usize> {
    cpm.cpm()
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(_, row)| row.iter().filter(|&&v| v > cpm_threshold).count() >= min_samples)
        .map(|(i, _)| i)
        .collect()
}

/// Filter a count matrix by expression.
///
/// `cpm` must have been computed from `counts`; the gene order of both is
/// checked. Fails with a configuration error when no gene passes.
pub fn filter_by_expression(
    counts: &CountMatrix,
    cpm: &NormalizedMatrix,
    cpm_threshold: f64,
    min_samples: usize,
    policy: LibrarySizePolicy,
) -> Result<(CountMatrix, FilterSummary)> {
    if cpm.gene_ids() != counts.gene_ids() || cpm.sample_ids() != counts.sample_ids() {
        return Err(VoomError::DimensionMismatch {
            expected: format!("CPM over {} genes x {} samples", counts.n_genes(), counts.n_samples()),
            got: format!(
                "CPM over {} genes x {} samples with different identifiers",
                cpm.gene_ids().len(),
                cpm.sample_ids().len()
            ),
        });
    }

    if min_samples > counts.n_samples() {
        return Err(VoomError::InvalidParameter {
            reason: format!(
                "min_samples ({}) exceeds the number of samples ({})",
                min_samples,
                counts.n_samples()
            ),
        });
    }

    let keep = expressed_genes(cpm, cpm_threshold, min_samples);
    if keep.is_empty() {
        return Err(VoomError::NoGenesRemaining {
            reason: format!(
                "no gene has CPM > {} in at least {} samples; thresholds are too strict for the data",
                cpm_threshold, min_samples
            ),
        });
    }

    let summary = FilterSummary {
        genes_before: counts.n_genes(),
        genes_kept: keep.len(),
    };
    log::info!(
        "Filtering: kept {} of {} genes (CPM > {} in >= {} samples, library sizes {:?})",
        summary.genes_kept,
        summary.genes_before,
        cpm_threshold,
        min_samples,
        policy
    );

    let filtered = counts.subset_genes(&keep, policy == LibrarySizePolicy::Retain)?;
    Ok((filtered, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::DEFAULT_PRIOR_COUNT;
    use ndarray::Array2;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    /// 9 samples (Basal, LP, ML x 3), library sizes around 10000-12000,
    /// half of the genes barely expressed
    fn tutorial_like_counts() -> CountMatrix {
        let n_genes = 40;
        let mut data = Array2::zeros((n_genes, 9));
        for i in 0..n_genes {
            for j in 0..9 {
                data[[i, j]] = if i < 20 {
                    (400 + 13 * i + 7 * j) as f64
                } else if i % 2 == 0 {
                    0.0
                } else {
                    (j < 2) as u8 as f64
                };
            }
        }
        CountMatrix::new(data, ids("g", n_genes), ids("s", 9)).unwrap()
    }

    fn cpm_of(counts: &CountMatrix) -> NormalizedMatrix {
        NormalizedMatrix::unscaled(counts, DEFAULT_PRIOR_COUNT).unwrap()
    }

    #[test]
    fn test_filter_reduces_gene_count() {
        let counts = tutorial_like_counts();
        let lib = counts.library_sizes();
        assert!(lib.iter().all(|&l| l > 9000.0 && l < 15000.0));

        let (filtered, summary) =
            filter_by_expression(&counts, &cpm_of(&counts), 1.0, 3, LibrarySizePolicy::Recompute).unwrap();
        assert!(filtered.n_genes() < counts.n_genes());
        assert_eq!(summary.genes_kept, 20);
        assert_eq!(summary.genes_removed(), 20);
    }

    #[test]
    fn test_filter_idempotent() {
        let counts = tutorial_like_counts();
        for policy in [LibrarySizePolicy::Recompute, LibrarySizePolicy::Retain] {
            let (once, _) = filter_by_expression(&counts, &cpm_of(&counts), 1.0, 3, policy).unwrap();
            let (twice, _) = filter_by_expression(&once, &cpm_of(&once), 1.0, 3, policy).unwrap();
            assert_eq!(once.gene_ids(), twice.gene_ids());
        }
    }

    #[test]
    fn test_library_size_policy() {
        let counts = tutorial_like_counts();
        let (retained, _) =
            filter_by_expression(&counts, &cpm_of(&counts), 1.0, 3, LibrarySizePolicy::Retain).unwrap();
        assert_eq!(retained.library_sizes(), counts.library_sizes());

        let (recomputed, _) =
            filter_by_expression(&counts, &cpm_of(&counts), 1.0, 3, LibrarySizePolicy::Recompute).unwrap();
        assert_eq!(recomputed.library_sizes(), &recomputed.column_sums()[..]);
        assert!(recomputed.library_sizes()[1] < counts.library_sizes()[1]);
        assert_eq!(LibrarySizePolicy::default(), LibrarySizePolicy::Recompute);
    }

    #[test]
    fn test_filter_everything_is_config_error() {
        let counts = tutorial_like_counts();
        let result = filter_by_expression(&counts, &cpm_of(&counts), 1e9, 3, LibrarySizePolicy::Recompute);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_min_samples_for_design() {
        let design = SampleDesign::new(
            ids("s", 5),
            "group",
            vec!["A", "A", "B", "B", "B"].into_iter().map(String::from).collect(),
        )
        .unwrap();
        assert_eq!(min_samples_for_design(&design), 2);
    }
}
