//! Linear models: design matrices, contrasts and per-gene least squares

mod contrast;
mod design;
mod fitting;

pub use contrast::ContrastMatrix;
pub use design::{column_rank, DesignMatrix};
pub use fitting::{fit_linear_models, lm_fit, ContrastFit, LinearModelFit};
