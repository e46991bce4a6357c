//! Data structures for differential expression analysis

mod count_matrix;
mod metadata;

pub use count_matrix::CountMatrix;
pub use metadata::{AnnotationRecord, GeneAnnotation, SampleDesign};
