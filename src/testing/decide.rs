//! Significance calls, summaries and ranked tables

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::moderated::FitResult;
use crate::error::{Result, VoomError};

/// Configurable thresholds for calling genes significant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecideParams {
    /// Adjusted p-value cutoff (strict)
    pub p_value: f64,
    /// Minimum |log2 fold change|; 0 disables the filter
    pub lfc: f64,
}

impl Default for DecideParams {
    fn default() -> Self {
        Self { p_value: 0.05, lfc: 0.0 }
    }
}

/// Up/down/not-significant calls for every gene and contrast
#[derive(Debug, Clone)]
pub struct DecisionTable {
    gene_ids: Vec<String>,
    contrast_names: Vec<String>,
    /// -1, 0 or +1 (genes x contrasts)
    calls: Array2<i8>,
    p_value: f64,
    lfc: f64,
}

/// Down/NotSig/Up counts of one contrast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContrastSummary {
    pub contrast: String,
    pub down: usize,
    pub not_sig: usize,
    pub up: usize,
}

/// Which genes count as shared between contrasts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommonMode {
    /// Significant in every contrast, in any direction
    AllSignificant,
    /// Significant in every contrast with the same sign
    SameDirection,
}

/// Classify every gene in every contrast
pub fn decide_tests(fit: &FitResult, params: &DecideParams) -> Result<DecisionTable> {
    if !(params.p_value > 0.0 && params.p_value <= 1.0) {
        return Err(VoomError::InvalidParameter {
            reason: format!("p-value cutoff must be in (0, 1], got {}", params.p_value),
        });
    }
    if !(params.lfc >= 0.0 && params.lfc.is_finite()) {
        return Err(VoomError::InvalidParameter {
            reason: format!("fold-change cutoff must be non-negative, got {}", params.lfc),
        });
    }

    let adj = fit.adj_p_values();
    let effects = fit.effects();
    let calls = Array2::from_shape_fn(adj.dim(), |(g, k)| {
        let p = adj[[g, k]];
        let b = effects[[g, k]];
        // NaN comparisons are false, so NaN p-values are never called
        if p < params.p_value && b.abs() >= params.lfc && b != 0.0 {
            if b > 0.0 {
                1
            } else {
                -1
            }
        } else {
            0
        }
    });

    let table = DecisionTable {
        gene_ids: fit.gene_ids().to_vec(),
        contrast_names: fit.contrast_names().to_vec(),
        calls,
        p_value: params.p_value,
        lfc: params.lfc,
    };
    for s in table.summary() {
        log::info!("{}: {} down, {} not significant, {} up", s.contrast, s.down, s.not_sig, s.up);
    }
    Ok(table)
}

impl DecisionTable {
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn contrast_names(&self) -> &[String] {
        &self.contrast_names
    }

    pub fn calls(&self) -> &Array2<i8> {
        &self.calls
    }

    pub fn p_value(&self) -> f64 {
        self.p_value
    }

    pub fn lfc(&self) -> f64 {
        self.lfc
    }

    fn contrast_index(&self, name: &str) -> Result<usize> {
        self.contrast_names
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| VoomError::InvalidContrast {
                contrast: name.to_string(),
                reason: format!("not in the decision table [{}]", self.contrast_names.join(", ")),
            })
    }

    /// Per contrast Down/NotSig/Up counts
    pub fn summary(&self) -> Vec<ContrastSummary> {
        self.contrast_names
            .iter()
            .enumerate()
            .map(|(k, name)| {
                let col = self.calls.column(k);
                let down = col.iter().filter(|&&c| c < 0).count();
                let up = col.iter().filter(|&&c| c > 0).count();
                ContrastSummary {
                    contrast: name.clone(),
                    down,
                    not_sig: col.len() - down - up,
                    up,
                }
            })
            .collect()
    }

    /// Genes significant in all of `contrasts`
    pub fn common(&self, contrasts: &[&str], mode: CommonMode) -> Result<Vec<String>> {
        if contrasts.is_empty() {
            return Err(VoomError::InvalidParameter {
                reason: "no contrasts given".to_string(),
            });
        }
        let cols = contrasts
            .iter()
            .map(|c| self.contrast_index(c))
            .collect::<Result<Vec<_>>>()?;

        Ok(self
            .gene_ids
            .iter()
            .enumerate()
            .filter(|(g, _)| {
                let calls: Vec<i8> = cols.iter().map(|&k| self.calls[[*g, k]]).collect();
                match mode {
                    CommonMode::AllSignificant => calls.iter().all(|&c| c != 0),
                    CommonMode::SameDirection => calls[0] != 0 && calls.iter().all(|&c| c == calls[0]),
                }
            })
            .map(|(_, id)| id.clone())
            .collect())
    }

    /// Number of genes in every combination of significant/not significant
    /// across `contrasts`, including the all-not-significant cell.
    ///
    /// Membership patterns are ordered as binary numbers with the first
    /// contrast as the most significant bit.
    pub fn venn_counts(&self, contrasts: &[&str]) -> Result<Vec<(Vec<bool>, usize)>> {
        let cols = contrasts
            .iter()
            .map(|c| self.contrast_index(c))
            .collect::<Result<Vec<_>>>()?;

        let mut counts: BTreeMap<Vec<bool>, usize> = BTreeMap::new();
        for pattern in 0..(1usize << cols.len()) {
            let key = (0..cols.len()).map(|i| pattern >> (cols.len() - 1 - i) & 1 == 1).collect();
            counts.insert(key, 0);
        }
        for g in 0..self.gene_ids.len() {
            let key: Vec<bool> = cols.iter().map(|&k| self.calls[[g, k]] != 0).collect();
            *counts.entry(key).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

impl fmt::Display for DecisionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary();
        let width = |s: &str, counts: &[usize]| {
            counts
                .iter()
                .map(|c| c.to_string().len())
                .chain(std::iter::once(s.len()))
                .max()
                .unwrap_or(0)
        };
        let widths: Vec<usize> = summary
            .iter()
            .map(|s| width(&s.contrast, &[s.down, s.not_sig, s.up]))
            .collect();

        write!(f, "{:<6}", "")?;
        for (s, w) in summary.iter().zip(&widths) {
            write!(f, " {:>w$}", s.contrast, w = w)?;
        }
        writeln!(f)?;
        for (label, pick) in [
            ("Down", 0usize),
            ("NotSig", 1),
            ("Up", 2),
        ] {
            write!(f, "{:<6}", label)?;
            for (s, w) in summary.iter().zip(&widths) {
                let v = [s.down, s.not_sig, s.up][pick];
                write!(f, " {:>w$}", v, w = w)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// One row of a ranked table
#[derive(Debug, Clone)]
pub struct TopTableRow {
    pub gene_id: String,
    pub log_fc: f64,
    pub ave_expr: f64,
    pub t: f64,
    pub p_value: f64,
    pub adj_p_value: f64,
}

/// Genes ranked for one contrast: ascending adjusted p-value, then
/// descending |logFC|, then gene id. `n = None` returns every gene.
pub fn top_table(fit: &FitResult, contrast: &str, n: Option<usize>) -> Result<Vec<TopTableRow>> {
    let k = fit.contrast_index(contrast)?;

    let mut rows: Vec<TopTableRow> = (0..fit.n_genes())
        .map(|g| TopTableRow {
            gene_id: fit.gene_ids()[g].clone(),
            log_fc: fit.effects()[[g, k]],
            ave_expr: fit.amean()[g],
            t: fit.t()[[g, k]],
            p_value: fit.p_values()[[g, k]],
            adj_p_value: fit.adj_p_values()[[g, k]],
        })
        .collect();

    rows.sort_by(|a, b| {
        nan_last(a.adj_p_value, b.adj_p_value)
            .then_with(|| nan_last(b.log_fc.abs(), a.log_fc.abs()))
            .then_with(|| a.gene_id.cmp(&b.gene_id))
    });
    if let Some(n) = n {
        rows.truncate(n);
    }
    Ok(rows)
}

/// Ascending order with NaN after every number
fn nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(&b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(calls: Array2<i8>) -> DecisionTable {
        let n = calls.nrows();
        DecisionTable {
            gene_ids: (0..n).map(|g| format!("g{}", g)).collect(),
            contrast_names: vec!["A-B".to_string(), "A-C".to_string()],
            calls,
            p_value: 0.05,
            lfc: 0.0,
        }
    }

    fn sample_table() -> DecisionTable {
        table(ndarray::array![[1, 1], [1, -1], [0, 1], [-1, -1], [0, 0]])
    }

    #[test]
    fn test_summary_partitions_genes() {
        let t = sample_table();
        for s in t.summary() {
            assert_eq!(s.down + s.not_sig + s.up, 5);
        }
        let s = &t.summary()[0];
        assert_eq!((s.down, s.not_sig, s.up), (1, 2, 2));
    }

    #[test]
    fn test_common_modes() {
        let t = sample_table();
        let all = t.common(&["A-B", "A-C"], CommonMode::AllSignificant).unwrap();
        assert_eq!(all, vec!["g0", "g1", "g3"]);
        let same = t.common(&["A-B", "A-C"], CommonMode::SameDirection).unwrap();
        assert_eq!(same, vec!["g0", "g3"]);
    }

    #[test]
    fn test_common_unknown_contrast() {
        let err = sample_table().common(&["A-Z"], CommonMode::AllSignificant).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_venn_counts() {
        let venn = sample_table().venn_counts(&["A-B", "A-C"]).unwrap();
        assert_eq!(venn.len(), 4);
        assert_eq!(venn[0], (vec![false, false], 1));
        assert_eq!(venn[1], (vec![false, true], 1));
        assert_eq!(venn[2], (vec![true, false], 0));
        assert_eq!(venn[3], (vec![true, true], 3));
    }

    #[test]
    fn test_display() {
        let text = sample_table().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("A-B") && lines[0].contains("A-C"));
        assert!(lines[1].starts_with("Down"));
        assert!(lines[3].starts_with("Up"));
    }

    #[test]
    fn test_top_table_ranking() {
        // g3/g1 and g4/g2 tie on adjusted p and |logFC|; g0 has no p-value
        let fit = FitResult::from_columns(
            &["g4", "g3", "g2", "g1", "g0"],
            &["A-B"],
            ndarray::array![[-2.0], [1.0], [2.0], [-1.0], [5.0]],
            ndarray::array![[0.01], [0.01], [0.01], [0.01], [f64::NAN]],
            ndarray::array![[0.02], [0.02], [0.02], [0.02], [f64::NAN]],
        );
        let rows = top_table(&fit, "A-B", None).unwrap();
        let order: Vec<&str> = rows.iter().map(|r| r.gene_id.as_str()).collect();
        assert_eq!(order, vec!["g2", "g4", "g1", "g3", "g0"]);
        assert_eq!(rows[1].log_fc, -2.0);
        assert_eq!(rows[1].ave_expr, 0.0);

        let top = top_table(&fit, "A-B", Some(2)).unwrap();
        assert_eq!(top.len(), 2);
        assert!(top_table(&fit, "B-A", None).is_err());
    }

    #[test]
    fn test_nan_last() {
        let mut v = vec![0.3, f64::NAN, 0.1];
        v.sort_by(|a, b| nan_last(*a, *b));
        assert_eq!(v[0], 0.1);
        assert!(v[2].is_nan());
    }
}
