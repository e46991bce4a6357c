//! Design matrix creation for the linear model

use ndarray::{Array2, ArrayView2};

use crate::data::SampleDesign;
use crate::error::{Result, VoomError};

/// Relative tolerance below which a column is considered linearly dependent
const RANK_TOL: f64 = 1e-7;

/// Dummy-coded design matrix without an intercept
///
/// One column per group level (named by the level) followed by one column per
/// non-reference level of each covariate (named `{factor}{level}`).
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// Samples x coefficients
    matrix: Array2<f64>,
    /// Names of the coefficients
    column_names: Vec<String>,
    /// Number of leading group-effect columns
    n_group_columns: usize,
    sample_ids: Vec<String>,
}

impl DesignMatrix {
    /// Build the zero-intercept design for a sample design
    pub fn from_sample_design(design: &SampleDesign) -> Result<Self> {
        let n_samples = design.n_samples();
        let group_levels = design.group_levels();

        let mut columns: Vec<Vec<f64>> = Vec::new();
        let mut names: Vec<String> = Vec::new();

        for level in &group_levels {
            columns.push(
                design
                    .groups()
                    .iter()
                    .map(|g| if g == level { 1.0 } else { 0.0 })
                    .collect(),
            );
            names.push(level.clone());
        }

        for (factor, values) in design.covariates() {
            let levels = design.covariate_levels(factor).unwrap_or_default();
            // First sorted level is the reference and gets no column
            for level in levels.iter().skip(1) {
                columns.push(values.iter().map(|v| if v == level { 1.0 } else { 0.0 }).collect());
                names.push(format!("{}{}", factor, level));
            }
        }

        let mut matrix = Array2::zeros((n_samples, columns.len()));
        for (j, col) in columns.iter().enumerate() {
            for (i, &v) in col.iter().enumerate() {
                matrix[[i, j]] = v;
            }
        }

        let design_matrix = Self::from_matrix(matrix, names, group_levels.len(), design.sample_ids().to_vec())?;
        log::info!(
            "Design matrix: {} samples x {} coefficients [{}]",
            n_samples,
            design_matrix.n_coefs(),
            design_matrix.column_names.join(", ")
        );
        Ok(design_matrix)
    }

    /// Wrap an explicit matrix, validating names and column rank
    pub fn from_matrix(
        matrix: Array2<f64>,
        column_names: Vec<String>,
        n_group_columns: usize,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let (n_samples, n_coefs) = matrix.dim();

        if column_names.len() != n_coefs {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} column names", n_coefs),
                got: format!("{} column names", column_names.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }
        if n_group_columns == 0 || n_group_columns > n_coefs {
            return Err(VoomError::InvalidParameter {
                reason: format!("{} group columns in a design with {} columns", n_group_columns, n_coefs),
            });
        }
        for (j, name) in column_names.iter().enumerate() {
            if column_names[..j].contains(name) {
                return Err(VoomError::SingularDesign {
                    reason: format!("duplicate column name '{}'", name),
                });
            }
        }

        if let Some(j) = first_aliased_column(matrix.view()) {
            return Err(VoomError::SingularDesign {
                reason: format!(
                    "column '{}' is a linear combination of earlier columns (rank {} of {}); coefficients are not estimable",
                    column_names[j],
                    column_rank(matrix.view()),
                    n_coefs
                ),
            });
        }

        if n_samples <= n_coefs {
            return Err(VoomError::InsufficientReplication {
                reason: format!(
                    "{} samples for {} coefficients leaves no residual degrees of freedom",
                    n_samples, n_coefs
                ),
            });
        }

        Ok(Self {
            matrix,
            column_names,
            n_group_columns,
            sample_ids,
        })
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coefs(&self) -> usize {
        self.matrix.ncols()
    }

    /// Residual degrees of freedom of an unweighted fit
    pub fn residual_df(&self) -> usize {
        self.n_samples() - self.n_coefs()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|n| n == name)
    }

    pub fn is_group_column(&self, idx: usize) -> bool {
        idx < self.n_group_columns
    }

    /// Names of the group-effect columns
    pub fn group_columns(&self) -> &[String] {
        &self.column_names[..self.n_group_columns]
    }
}

/// Index of the first column that lies in the span of the earlier ones.
///
/// Modified Gram-Schmidt in column order: a column whose residual norm falls
/// below `RANK_TOL` times its original norm is aliased.
fn first_aliased_column(x: ArrayView2<f64>) -> Option<usize> {
    let (n, p) = x.dim();
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(p);

    for j in 0..p {
        let mut v: Vec<f64> = x.column(j).to_vec();
        let norm0 = v.iter().map(|a| a * a).sum::<f64>().sqrt();
        if norm0 == 0.0 {
            return Some(j);
        }
        for q in &basis {
            let dot: f64 = (0..n).map(|i| q[i] * v[i]).sum();
            for i in 0..n {
                v[i] -= dot * q[i];
            }
        }
        let norm = v.iter().map(|a| a * a).sum::<f64>().sqrt();
        if norm < RANK_TOL * norm0 {
            return Some(j);
        }
        basis.push(v.iter().map(|a| a / norm).collect());
    }
    None
}

/// Column rank of a matrix
pub fn column_rank(x: ArrayView2<f64>) -> usize {
    let p = x.ncols();
    let mut rank = 0;
    let mut kept: Vec<usize> = Vec::new();
    for j in 0..p {
        let mut cols = kept.clone();
        cols.push(j);
        let sub = x.select(ndarray::Axis(1), &cols);
        if first_aliased_column(sub.view()).is_none() {
            kept.push(j);
            rank += 1;
        }
    }
    rank
}
