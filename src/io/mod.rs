//! Input/Output: count files, sample sheets, annotation, gene sets and
//! result tables

mod counts;
mod results;
mod tables;

pub use counts::{read_count_directory, read_count_table, read_sample_counts, sample_id_from_path, CountColumns, SampleCounts};
pub use results::{write_camera, write_decisions, write_log_cpm, write_results, write_top_table};
pub use tables::{align_design, read_annotation, read_gene_sets, read_sample_design};
