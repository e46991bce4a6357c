//! Gene filtering before model fitting

mod expression;

pub use expression::{
    expressed_genes, filter_by_expression, min_samples_for_design, FilterParams, FilterSummary,
    LibrarySizePolicy,
};
