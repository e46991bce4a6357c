//! Tab-delimited output tables

use std::path::Path;

use csv::WriterBuilder;

use crate::data::GeneAnnotation;
use crate::error::Result;
use crate::geneset::GeneSetResult;
use crate::normalization::NormalizedMatrix;
use crate::testing::{DecisionTable, FitResult, TopTableRow};

fn tsv_writer<P: AsRef<Path>>(path: P) -> Result<csv::Writer<std::fs::File>> {
    Ok(WriterBuilder::new().delimiter(b'\t').from_path(path)?)
}

/// Fixed-point value, NA for missing
fn fmt_value(x: f64) -> String {
    if x.is_nan() {
        "NA".to_string()
    } else {
        format!("{:.6}", x)
    }
}

/// Scientific notation for p-values, NA for missing
fn fmt_pvalue(x: f64) -> String {
    if x.is_nan() {
        "NA".to_string()
    } else {
        format!("{:.6e}", x)
    }
}

/// Write one row per gene with every contrast side by side.
///
/// Columns: `gene_id`, `symbol` and `chromosome` when an annotation is
/// given, `AveExpr`, then `{contrast}.logFC`, `.t`, `.P.Value` and
/// `.adj.P.Val` for each contrast.
pub fn write_results<P: AsRef<Path>>(path: P, fit: &FitResult, annotation: Option<&GeneAnnotation>) -> Result<()> {
    let mut writer = tsv_writer(path)?;

    let mut header = vec!["gene_id".to_string()];
    if annotation.is_some() {
        header.push("symbol".to_string());
        header.push("chromosome".to_string());
    }
    header.push("AveExpr".to_string());
    for c in fit.contrast_names() {
        for suffix in ["logFC", "t", "P.Value", "adj.P.Val"] {
            header.push(format!("{}.{}", c, suffix));
        }
    }
    writer.write_record(&header)?;

    let annotated = annotation.map(|a| a.annotate(fit.gene_ids()));
    for (g, gene_id) in fit.gene_ids().iter().enumerate() {
        let mut row = vec![gene_id.clone()];
        if let Some(records) = &annotated {
            match records[g] {
                Some(rec) => {
                    row.push(rec.symbol.clone());
                    row.push(rec.chromosome.clone());
                }
                None => {
                    row.push("NA".to_string());
                    row.push("NA".to_string());
                }
            }
        }
        row.push(fmt_value(fit.amean()[g]));
        for k in 0..fit.n_contrasts() {
            row.push(fmt_value(fit.effects()[[g, k]]));
            row.push(fmt_value(fit.t()[[g, k]]));
            row.push(fmt_pvalue(fit.p_values()[[g, k]]));
            row.push(fmt_pvalue(fit.adj_p_values()[[g, k]]));
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a ranked table for one contrast
pub fn write_top_table<P: AsRef<Path>>(
    path: P,
    rows: &[TopTableRow],
    annotation: Option<&GeneAnnotation>,
) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    let mut header = vec!["gene_id"];
    if annotation.is_some() {
        header.extend(["symbol", "chromosome"]);
    }
    header.extend(["logFC", "AveExpr", "t", "P.Value", "adj.P.Val"]);
    writer.write_record(&header)?;

    for r in rows {
        let mut row = vec![r.gene_id.clone()];
        if let Some(a) = annotation {
            let rec = a.get(&r.gene_id);
            row.push(rec.map_or_else(|| "NA".to_string(), |x| x.symbol.clone()));
            row.push(rec.map_or_else(|| "NA".to_string(), |x| x.chromosome.clone()));
        }
        row.extend([
            fmt_value(r.log_fc),
            fmt_value(r.ave_expr),
            fmt_value(r.t),
            fmt_pvalue(r.p_value),
            fmt_pvalue(r.adj_p_value),
        ]);
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the -1/0/1 decision matrix
pub fn write_decisions<P: AsRef<Path>>(path: P, decisions: &DecisionTable) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    let mut header = vec!["gene_id".to_string()];
    header.extend(decisions.contrast_names().iter().cloned());
    writer.write_record(&header)?;

    for (g, gene_id) in decisions.gene_ids().iter().enumerate() {
        let mut row = vec![gene_id.clone()];
        row.extend(decisions.calls().row(g).iter().map(|c| c.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write gene set results, one block of rows per contrast
pub fn write_camera<P: AsRef<Path>>(path: P, results: &[(String, Vec<GeneSetResult>)]) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(["contrast", "set", "NGenes", "Correlation", "Direction", "PValue", "FDR"])?;
    for (contrast, sets) in results {
        for r in sets {
            writer.write_record([
                contrast.clone(),
                r.name.clone(),
                r.n_genes.to_string(),
                fmt_value(r.correlation),
                r.direction.map_or_else(|| "NA".to_string(), |d| d.to_string()),
                fmt_pvalue(r.p_value),
                fmt_pvalue(r.fdr),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Write the log-CPM matrix (genes x samples)
pub fn write_log_cpm<P: AsRef<Path>>(path: P, normalized: &NormalizedMatrix) -> Result<()> {
    let mut writer = tsv_writer(path)?;
    let mut header = vec!["gene_id".to_string()];
    header.extend(normalized.sample_ids().iter().cloned());
    writer.write_record(&header)?;

    for (g, gene_id) in normalized.gene_ids().iter().enumerate() {
        let mut row = vec![gene_id.clone()];
        row.extend(normalized.log_cpm().row(g).iter().map(|&v| fmt_value(v)));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}
