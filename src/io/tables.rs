//! Sample sheets, gene annotation and gene set files

use std::collections::HashMap;
use std::path::Path;

use super::counts::{parse_error, read_records};
use crate::data::{AnnotationRecord, CountMatrix, GeneAnnotation, SampleDesign};
use crate::error::{Result, VoomError};
use crate::geneset::GeneSetCollection;

/// Position of the first header column matching one of `names`, ignoring case
fn find_column(header: &[String], names: &[&str]) -> Option<usize> {
    header
        .iter()
        .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
}

/// Read a sample sheet with a header row.
///
/// Sample ids come from the `sample` column (or the first column if there is
/// none); `group_column` gives the group labels and every entry of
/// `covariates` names a further categorical column.
pub fn read_sample_design<P: AsRef<Path>>(
    path: P,
    group_column: &str,
    covariates: &[String],
) -> Result<SampleDesign> {
    let path = path.as_ref();
    let records = read_records(path)?;
    let (header_line, header) = records.first().ok_or_else(|| VoomError::InvalidDesign {
        reason: format!("{} is empty", path.display()),
    })?;

    let sample_col = find_column(header, &["sample", "sample_id", "samples"]).unwrap_or(0);
    let group_col = find_column(header, &[group_column])
        .ok_or_else(|| parse_error(path, *header_line, format!("no column named '{}'", group_column)))?;
    let covariate_cols = covariates
        .iter()
        .map(|c| {
            find_column(header, &[c.as_str()])
                .map(|i| (c.clone(), i))
                .ok_or_else(|| parse_error(path, *header_line, format!("no column named '{}'", c)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut sample_ids = Vec::new();
    let mut groups = Vec::new();
    let mut covariate_values: Vec<Vec<String>> = vec![Vec::new(); covariate_cols.len()];
    for (line, fields) in &records[1..] {
        if fields.len() != header.len() {
            return Err(parse_error(
                path,
                *line,
                format!("{} fields, expected {}", fields.len(), header.len()),
            ));
        }
        sample_ids.push(fields[sample_col].clone());
        groups.push(fields[group_col].clone());
        for (values, (_, col)) in covariate_values.iter_mut().zip(&covariate_cols) {
            values.push(fields[*col].clone());
        }
    }

    let mut design = SampleDesign::new(sample_ids, group_column, groups)?;
    for ((name, _), values) in covariate_cols.into_iter().zip(covariate_values) {
        design.add_covariate(&name, values)?;
    }
    log::info!(
        "Read sample design for {} samples, groups: {}",
        design.n_samples(),
        design
            .group_sizes()
            .iter()
            .map(|(g, n)| format!("{} ({})", g, n))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(design)
}

/// Reorder a design to the sample order of the count matrix.
///
/// Every count sample must be in the design and vice versa.
pub fn align_design(counts: &CountMatrix, design: &SampleDesign) -> Result<SampleDesign> {
    let positions: HashMap<&str, usize> = design
        .sample_ids()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();

    let missing: Vec<&str> = counts
        .sample_ids()
        .iter()
        .filter(|s| !positions.contains_key(s.as_str()))
        .map(|s| s.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(VoomError::SampleMismatch {
            reason: format!("samples without a design entry: {}", missing.join(", ")),
        });
    }
    if design.n_samples() != counts.n_samples() {
        let extra: Vec<&str> = design
            .sample_ids()
            .iter()
            .filter(|s| counts.sample_index(s).is_none())
            .map(|s| s.as_str())
            .collect();
        return Err(VoomError::SampleMismatch {
            reason: format!("design samples without counts: {}", extra.join(", ")),
        });
    }

    let order: Vec<usize> = counts.sample_ids().iter().map(|s| positions[s.as_str()]).collect();
    design.subset(&order)
}

/// Read `gene_id, symbol, chromosome` annotation with a header row.
/// Missing symbol or chromosome columns give empty fields.
pub fn read_annotation<P: AsRef<Path>>(path: P) -> Result<GeneAnnotation> {
    let path = path.as_ref();
    let records = read_records(path)?;
    let Some((_, header)) = records.first() else {
        return Ok(GeneAnnotation::default());
    };

    let gene_col = find_column(header, &["gene_id", "geneid", "entrezid", "gene"]).unwrap_or(0);
    let symbol_col = find_column(header, &["symbol", "gene_name"]);
    let chrom_col = find_column(header, &["chromosome", "chr", "txchrom"]);

    let field = |fields: &[String], col: Option<usize>| col.and_then(|c| fields.get(c)).cloned().unwrap_or_default();
    let rows = records[1..].iter().map(|(_, fields)| AnnotationRecord {
        gene_id: field(fields, Some(gene_col)),
        symbol: field(fields, symbol_col),
        chromosome: field(fields, chrom_col),
    });
    let annotation = GeneAnnotation::from_records(rows);
    log::info!("Read annotation for {} genes", annotation.len());
    Ok(annotation)
}

/// Read gene sets in GMT format: `name<TAB>description<TAB>gene...`
pub fn read_gene_sets<P: AsRef<Path>>(path: P) -> Result<GeneSetCollection> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .from_reader(content.as_bytes());

    let mut sets = GeneSetCollection::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let fields: Vec<&str> = record.iter().map(str::trim).collect();
        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }
        if fields.len() < 2 {
            return Err(parse_error(path, line, "a gene set needs a name and a description"));
        }
        let genes: Vec<String> = fields[2..].iter().filter(|g| !g.is_empty()).map(|g| g.to_string()).collect();
        sets.push(fields[0], fields[1], genes)
            .map_err(|e| parse_error(path, line, e.to_string()))?;
    }
    log::info!("Read {} gene sets from {}", sets.len(), path.display());
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_read_sample_design_with_lane() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample\tgroup\tlane").unwrap();
        writeln!(file, "s1\tLP\tL004").unwrap();
        writeln!(file, "s2\tML\tL004").unwrap();
        writeln!(file, "s3\tBasal\tL006").unwrap();

        let design = read_sample_design(file.path(), "group", &strings(&["lane"])).unwrap();
        assert_eq!(design.sample_ids(), &strings(&["s1", "s2", "s3"])[..]);
        assert_eq!(design.group_levels(), strings(&["Basal", "LP", "ML"]));
        assert_eq!(design.covariates()[0].0, "lane");
    }

    #[test]
    fn test_read_sample_design_missing_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample,group").unwrap();
        writeln!(file, "s1,A").unwrap();
        writeln!(file, "s2,B").unwrap();
        let err = read_sample_design(file.path(), "group", &strings(&["batch"])).unwrap_err();
        assert!(matches!(err, VoomError::Parse { .. }));
    }

    #[test]
    fn test_align_design() {
        let counts = CountMatrix::new(
            Array2::from_elem((2, 3), 5.0),
            strings(&["g1", "g2"]),
            strings(&["s3", "s1", "s2"]),
        )
        .unwrap();
        let design = SampleDesign::new(strings(&["s1", "s2", "s3"]), "group", strings(&["A", "B", "A"])).unwrap();

        let aligned = align_design(&counts, &design).unwrap();
        assert_eq!(aligned.sample_ids(), counts.sample_ids());
        assert_eq!(aligned.groups(), &strings(&["A", "A", "B"])[..]);

        let short = SampleDesign::new(strings(&["s1", "s2"]), "group", strings(&["A", "B"])).unwrap();
        let err = align_design(&counts, &short).unwrap_err();
        assert!(err.to_string().contains("s3"));
    }

    #[test]
    fn test_read_annotation_keeps_first_duplicate() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ENTREZID\tSYMBOL\tTXCHROM").unwrap();
        writeln!(file, "497097\tXkr4\tchr1").unwrap();
        writeln!(file, "100503874\tGm19938\tNA").unwrap();
        writeln!(file, "497097\tXkr4-dup\tchr1").unwrap();

        let annotation = read_annotation(file.path()).unwrap();
        assert_eq!(annotation.len(), 2);
        assert_eq!(annotation.get("497097").unwrap().symbol, "Xkr4");
        assert_eq!(annotation.get("100503874").unwrap().chromosome, "NA");
    }

    #[test]
    fn test_read_gene_sets() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "HALLMARK_A\thttp://example\tg1\tg2\tg3").unwrap();
        writeln!(file, "EMPTY_SET\tnone").unwrap();

        let sets = read_gene_sets(file.path()).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets.get("HALLMARK_A").unwrap().genes.len(), 3);
        assert!(sets.get("EMPTY_SET").unwrap().genes.is_empty());
    }
}
