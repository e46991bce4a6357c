//! Normalization of RNA-seq count data

mod counts;
mod tmm;

pub use counts::{cpm, library_sizes, log_cpm, NormalizedMatrix, DEFAULT_PRIOR_COUNT};
pub use tmm::{calc_norm_factors, select_reference, tmm_factor, NormMethod, TmmParams};
