//! rust_voom: limma-voom style differential expression analysis of RNA-seq
//! counts in Rust
//!
//! Counts are normalized with TMM, lowly expressed genes are filtered out,
//! log-CPM values are given precision weights from their mean-variance
//! trend, and per-gene weighted linear models are tested with moderated t
//! statistics. Gene sets can be tested competitively with camera.
//!
//! # Example
//!
//! ```ignore
//! use rust_voom::prelude::*;
//!
//! let counts = read_count_directory("counts/", CountColumns { gene: 0, count: 2 })?;
//! let design = read_sample_design("samples.tsv", "group", &["lane".to_string()])?;
//!
//! let output = run_pipeline(&counts, &design, &PipelineConfig::default())?;
//! println!("{}", output.decisions);
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod geneset;
pub mod glm;
pub mod io;
pub mod normalization;
pub mod stats;
pub mod testing;
pub mod variance;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::data::{AnnotationRecord, CountMatrix, GeneAnnotation, SampleDesign};
    pub use crate::error::{ErrorKind, Result, VoomError};
    pub use crate::filter::{filter_by_expression, FilterParams, FilterSummary, LibrarySizePolicy};
    pub use crate::geneset::{camera, CameraParams, GeneSetCollection, GeneSetResult};
    pub use crate::glm::{lm_fit, ContrastMatrix, DesignMatrix, LinearModelFit};
    pub use crate::io::{
        align_design, read_annotation, read_count_directory, read_count_table, read_gene_sets, read_sample_design,
        write_decisions, write_results, CountColumns,
    };
    pub use crate::normalization::{calc_norm_factors, NormMethod, NormalizedMatrix, TmmParams};
    pub use crate::testing::{
        decide_tests, ebayes, top_table, treat, CommonMode, DecideParams, DecisionTable, EbayesParams, FitResult,
    };
    pub use crate::variance::{voom, VoomOutput, VoomParams};
    pub use crate::{run_pipeline, PipelineOutput};
}

use prelude::*;
use filter::min_samples_for_design;

/// Every entity produced by [`run_pipeline`]
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Design reordered to the count matrix samples
    pub design: SampleDesign,
    /// CPM of the unfiltered counts, used for filtering
    pub unfiltered: NormalizedMatrix,
    pub filtered_counts: CountMatrix,
    pub filter_summary: FilterSummary,
    pub norm_factors: Vec<f64>,
    /// TMM-normalized CPM and log-CPM of the filtered counts
    pub normalized: NormalizedMatrix,
    pub design_matrix: DesignMatrix,
    pub contrasts: ContrastMatrix,
    pub voom: VoomOutput,
    pub linear_fit: LinearModelFit,
    pub fit: FitResult,
    pub decisions: DecisionTable,
}

impl PipelineOutput {
    /// Run camera on every contrast of the fit
    pub fn gene_set_tests(
        &self,
        sets: &GeneSetCollection,
        params: &CameraParams,
    ) -> Result<Vec<(String, Vec<GeneSetResult>)>> {
        self.fit
            .contrast_names()
            .iter()
            .map(|c| Ok((c.clone(), camera(&self.fit, &self.design_matrix, c, sets, params)?)))
            .collect()
    }
}

/// Run normalization, filtering, voom, linear modelling, moderated tests and
/// significance calls on a count matrix
pub fn run_pipeline(counts: &CountMatrix, design: &SampleDesign, config: &PipelineConfig) -> Result<PipelineOutput> {
    config.validate()?;
    log::info!("Input: {} genes x {} samples", counts.n_genes(), counts.n_samples());

    let design = align_design(counts, design)?;

    // Filtering uses CPM from the raw library sizes
    let unfiltered = NormalizedMatrix::unscaled(counts, config.prior_count)?;
    let min_samples = config
        .filter
        .min_samples
        .unwrap_or_else(|| min_samples_for_design(&design));
    let (filtered_counts, filter_summary) = filter_by_expression(
        counts,
        &unfiltered,
        config.filter.cpm_threshold,
        min_samples,
        config.filter.library_sizes,
    )?;

    let norm_factors = calc_norm_factors(&filtered_counts, config.norm_method, &config.tmm)?;
    let normalized = NormalizedMatrix::new(&filtered_counts, &norm_factors, config.prior_count)?;

    let design_matrix = DesignMatrix::from_sample_design(&design)?;
    let contrasts = if config.contrasts.is_empty() {
        ContrastMatrix::pairwise(&design_matrix)?
    } else {
        ContrastMatrix::from_expressions(&design_matrix, &config.contrasts)?
    };

    let voom_out = voom(&filtered_counts, &norm_factors, &design_matrix, &config.voom)?;
    let linear_fit = lm_fit(&voom_out, &design_matrix)?;
    let fit = if config.lfc_threshold > 0.0 {
        treat(&linear_fit, &contrasts, config.lfc_threshold, &config.ebayes)?
    } else {
        ebayes(&linear_fit, &contrasts, &config.ebayes)?
    };
    let decisions = decide_tests(&fit, &config.decide)?;

    Ok(PipelineOutput {
        design,
        unfiltered,
        filtered_counts,
        filter_summary,
        norm_factors,
        normalized,
        design_matrix,
        contrasts,
        voom: voom_out,
        linear_fit,
        fit,
        decisions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// Nine samples in three groups. Genes 0..60 carry signal, the rest are
    /// almost silent. Every fifth signal gene is 2x higher in Basal than in
    /// LP and ML.
    fn tutorial_like() -> (CountMatrix, SampleDesign) {
        let groups = strings(&["LP", "ML", "Basal", "Basal", "ML", "LP", "Basal", "ML", "LP"]);
        let samples: Vec<String> = (1..=9).map(|i| format!("s{}", i)).collect();
        let n_genes = 80;
        let mut data = Array2::zeros((n_genes, 9));
        for g in 0..n_genes {
            for j in 0..9 {
                data[[g, j]] = if g < 60 {
                    let base = 80.0 + 15.0 * g as f64;
                    let fold = if g % 5 == 0 && groups[j] == "Basal" { 2.0 } else { 1.0 };
                    let wobble = 1.0 + (((g * 13 + j * 7) % 9) as f64 - 4.0) / 40.0;
                    (base * fold * wobble).round()
                } else {
                    ((g + j) % 7 == 0) as u8 as f64
                };
            }
        }
        let genes = (0..n_genes).map(|g| format!("gene{}", g)).collect();
        let counts = CountMatrix::new(data, genes, samples.clone()).unwrap();
        let mut design = SampleDesign::new(samples, "group", groups).unwrap();
        design
            .add_covariate("lane", strings(&["L004", "L004", "L004", "L006", "L006", "L006", "L006", "L008", "L008"]))
            .unwrap();
        (counts, design)
    }

    #[test]
    fn test_full_pipeline() {
        let (counts, design) = tutorial_like();
        let config = PipelineConfig {
            contrasts: strings(&["BasalvsLP = Basal-LP", "Basal-ML", "LP-ML"]),
            ..Default::default()
        };
        let out = run_pipeline(&counts, &design, &config).unwrap();

        assert_eq!(out.filter_summary.genes_kept, 60);
        assert_eq!(out.filtered_counts.n_genes(), 60);
        assert_eq!(out.norm_factors.len(), 9);
        let log_mean = out.norm_factors.iter().map(|f| f.ln()).sum::<f64>() / 9.0;
        assert!(log_mean.abs() < 1e-10);

        assert_eq!(
            out.design_matrix.column_names(),
            &strings(&["Basal", "LP", "ML", "laneL006", "laneL008"])[..]
        );
        assert_eq!(out.fit.contrast_names(), &strings(&["BasalvsLP", "Basal-ML", "LP-ML"])[..]);
        assert!(out.voom.weights().iter().all(|&w| w > 0.0));

        // Basal up genes have logFC close to 1 against LP
        let k = out.fit.contrast_index("BasalvsLP").unwrap();
        let g = out.fit.gene_ids().iter().position(|id| id == "gene10").unwrap();
        assert!((out.fit.effects()[[g, k]] - 1.0).abs() < 0.2);

        for s in out.decisions.summary() {
            assert_eq!(s.down + s.not_sig + s.up, 60);
        }
        let up = &out.decisions.summary()[0];
        assert!(up.up >= 6);

        // LP and ML are indistinguishable for the planted signal
        let common = out
            .decisions
            .common(&["BasalvsLP", "Basal-ML"], CommonMode::SameDirection)
            .unwrap();
        assert!(common.contains(&"gene10".to_string()));
    }

    #[test]
    fn test_pipeline_with_treat_calls_fewer_genes() {
        let (counts, design) = tutorial_like();
        let plain = run_pipeline(&counts, &design, &PipelineConfig::default()).unwrap();
        let config = PipelineConfig {
            lfc_threshold: 0.8,
            ..Default::default()
        };
        let thresholded = run_pipeline(&counts, &design, &config).unwrap();

        assert_eq!(plain.fit.contrast_names(), thresholded.fit.contrast_names());
        for (a, b) in plain.decisions.summary().iter().zip(thresholded.decisions.summary()) {
            assert!(b.up + b.down <= a.up + a.down);
        }
    }

    #[test]
    fn test_pipeline_gene_sets() {
        let (counts, design) = tutorial_like();
        let out = run_pipeline(&counts, &design, &PipelineConfig::default()).unwrap();

        let mut sets = GeneSetCollection::new();
        let basal_up: Vec<String> = (0..60).step_by(5).map(|g| format!("gene{}", g)).collect();
        sets.push("BASAL_UP", "", basal_up).unwrap();
        sets.push("NOT_MEASURED", "", strings(&["absent1", "absent2"])).unwrap();

        let results = out.gene_set_tests(&sets, &CameraParams::default()).unwrap();
        assert_eq!(results.len(), 3);
        let (contrast, basal_lp) = &results[0];
        assert_eq!(contrast, "Basal-LP");

        let empty = basal_lp.iter().find(|r| r.name == "NOT_MEASURED").unwrap();
        assert!(empty.empty);
        assert!(empty.p_value.is_nan());
        assert_eq!(basal_lp.last().unwrap().name, "NOT_MEASURED");

        let up = basal_lp.iter().find(|r| r.name == "BASAL_UP").unwrap();
        assert_eq!(up.n_genes, 12);
        assert_eq!(up.direction, Some(geneset::Direction::Up));
        assert!(up.p_value < 0.05);
    }

    #[test]
    fn test_pipeline_rejects_unknown_contrast_group() {
        let (counts, design) = tutorial_like();
        let config = PipelineConfig {
            contrasts: strings(&["Basal-Stem"]),
            ..Default::default()
        };
        let err = run_pipeline(&counts, &design, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
