//! Mean-variance modelling (voom) and the smoother it relies on

mod lowess;
mod voom;

pub use lowess::{lowess, LowessParams, TrendCurve};
pub use voom::{voom, VoomOutput, VoomParams};
