//! Count matrix representation for RNA-seq data

use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, VoomError};

/// A dense count matrix of RNA-seq read counts
/// Rows are genes, columns are samples
#[derive(Debug, Clone)]
pub struct CountMatrix {
    /// Raw count data (genes x samples), integral values stored as f64
    counts: Array2<f64>,
    /// Gene identifiers
    gene_ids: Vec<String>,
    /// Sample identifiers
    sample_ids: Vec<String>,
    /// Library size per sample. Column sums unless inherited from a parent matrix
    library_sizes: Vec<f64>,
}

impl CountMatrix {
    /// Create a new count matrix; library sizes are the column sums
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let library_sizes = counts.axis_iter(Axis(1)).map(|col| col.sum()).collect();
        Self::with_library_sizes(counts, gene_ids, sample_ids, library_sizes)
    }

    /// Create a count matrix that carries explicit library sizes
    pub fn with_library_sizes(
        counts: Array2<f64>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
        library_sizes: Vec<f64>,
    ) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if n_genes == 0 || n_samples == 0 {
            return Err(VoomError::InvalidCountMatrix {
                reason: format!("matrix must be non-empty, got {} x {}", n_genes, n_samples),
            });
        }

        if gene_ids.len() != n_genes {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if library_sizes.len() != n_samples {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} library sizes", n_samples),
                got: format!("{} library sizes", library_sizes.len()),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(VoomError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            return Err(VoomError::InvalidCountMatrix {
                reason: "Counts must be integers".to_string(),
            });
        }

        let mut seen = HashSet::with_capacity(n_genes);
        if let Some(dup) = gene_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(VoomError::InvalidCountMatrix {
                reason: format!("Duplicate gene ID '{}'", dup),
            });
        }

        let mut seen = HashSet::with_capacity(n_samples);
        if let Some(dup) = sample_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(VoomError::InvalidCountMatrix {
                reason: format!("Duplicate sample ID '{}'", dup),
            });
        }

        if let Some(j) = library_sizes.iter().position(|&l| !(l > 0.0 && l.is_finite())) {
            return Err(VoomError::InvalidCountMatrix {
                reason: format!(
                    "Sample '{}' has library size {}; every sample needs a positive library size",
                    sample_ids[j], library_sizes[j]
                ),
            });
        }

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
            library_sizes,
        })
    }

    /// Get the number of genes
    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    /// Get the number of samples
    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Get the raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    /// Get gene IDs
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    /// Get sample IDs
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Library size per sample
    pub fn library_sizes(&self) -> &[f64] {
        &self.library_sizes
    }

    /// Column sums of the current gene set, regardless of carried library sizes
    pub fn column_sums(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }

    /// Get counts for a specific sample
    pub fn sample_counts(&self, sample_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.column(sample_idx)
    }

    /// Get gene index by ID
    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|id| id == gene_id)
    }

    /// Get sample index by ID
    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Subset to specific genes.
    ///
    /// With `keep_library_sizes` the subset inherits this matrix's library
    /// sizes; otherwise they are recomputed from the retained genes.
    pub fn subset_genes(&self, gene_indices: &[usize], keep_library_sizes: bool) -> Result<Self> {
        let new_counts = self.counts.select(Axis(0), gene_indices);
        let new_gene_ids: Vec<String> = gene_indices.iter().map(|&i| self.gene_ids[i].clone()).collect();

        if keep_library_sizes {
            Self::with_library_sizes(
                new_counts,
                new_gene_ids,
                self.sample_ids.clone(),
                self.library_sizes.clone(),
            )
        } else {
            Self::new(new_counts, new_gene_ids, self.sample_ids.clone())
        }
    }

    /// Reorder or subset samples by index; library sizes follow their samples
    pub fn select_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let new_counts = self.counts.select(Axis(1), sample_indices);
        let new_sample_ids: Vec<String> = sample_indices.iter().map(|&i| self.sample_ids[i].clone()).collect();
        let new_lib: Vec<f64> = sample_indices.iter().map(|&i| self.library_sizes[i]).collect();

        Self::with_library_sizes(new_counts, self.gene_ids.clone(), new_sample_ids, new_lib)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_count_matrix_creation() {
        let counts = array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]];
        let matrix = CountMatrix::new(counts, ids("gene", 2), ids("s", 3)).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.gene_index("gene2"), Some(1));
    }

    #[test]
    fn test_negative_counts_rejected() {
        let counts = array![[10.0, -5.0], [5.0, 15.0]];
        let result = CountMatrix::new(counts, ids("gene", 2), ids("s", 2));
        assert!(result.is_err());
    }

    #[test]
    fn test_fractional_counts_rejected() {
        let counts = array![[10.5, 5.0], [5.0, 15.0]];
        let result = CountMatrix::new(counts, ids("gene", 2), ids("s", 2));
        assert!(matches!(result, Err(VoomError::InvalidCountMatrix { .. })));
    }

    #[test]
    fn test_duplicate_gene_rejected() {
        let counts = array![[10.0, 5.0], [5.0, 15.0]];
        let genes = vec!["g".to_string(), "g".to_string()];
        assert!(CountMatrix::new(counts, genes, ids("s", 2)).is_err());
    }

    #[test]
    fn test_empty_sample_rejected() {
        let counts = array![[10.0, 0.0], [5.0, 0.0]];
        assert!(CountMatrix::new(counts, ids("gene", 2), ids("s", 2)).is_err());
    }

    #[test]
    fn test_library_sizes() {
        let counts = array![[10.0, 20.0], [5.0, 15.0]];
        let matrix = CountMatrix::new(counts, ids("gene", 2), ids("s", 2)).unwrap();
        assert_eq!(matrix.library_sizes(), &[15.0, 35.0]);
    }

    #[test]
    fn test_subset_genes_library_policy() {
        let counts = array![[10.0, 20.0], [5.0, 15.0], [1.0, 1.0]];
        let matrix = CountMatrix::new(counts, ids("gene", 3), ids("s", 2)).unwrap();

        let kept = matrix.subset_genes(&[0, 1], true).unwrap();
        assert_eq!(kept.library_sizes(), &[16.0, 36.0]);
        assert_eq!(kept.column_sums(), vec![15.0, 35.0]);

        let recomputed = matrix.subset_genes(&[0, 1], false).unwrap();
        assert_eq!(recomputed.library_sizes(), &[15.0, 35.0]);
    }

    #[test]
    fn test_select_samples_reorders() {
        let counts = array![[10.0, 20.0], [5.0, 15.0]];
        let matrix = CountMatrix::new(counts, ids("gene", 2), ids("s", 2)).unwrap();
        let swapped = matrix.select_samples(&[1, 0]).unwrap();
        assert_eq!(swapped.sample_ids(), &["s2".to_string(), "s1".to_string()]);
        assert_eq!(swapped.library_sizes(), &[35.0, 15.0]);
        assert_eq!(swapped.counts()[[0, 0]], 20.0);
    }
}
