//! Reading count data: per-sample count files and wide count tables

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::data::CountMatrix;
use crate::error::{Result, VoomError};

/// Which columns of a per-sample count file hold the gene id and the count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountColumns {
    pub gene: usize,
    pub count: usize,
}

impl Default for CountColumns {
    fn default() -> Self {
        Self { gene: 0, count: 1 }
    }
}

/// Counts of one sample, in file order
#[derive(Debug, Clone)]
pub struct SampleCounts {
    pub gene_ids: Vec<String>,
    pub counts: Vec<f64>,
}

/// Tab if the first data line has one, otherwise comma
pub(crate) fn detect_delimiter(content: &str) -> u8 {
    let first = content
        .lines()
        .map(str::trim_end)
        .find(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .unwrap_or("");
    if first.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

/// Delimited records with `#` comments and blank lines skipped, paired with
/// their 1-based line numbers
pub(crate) fn read_records(path: &Path) -> Result<Vec<(u64, Vec<String>)>> {
    let content = fs::read_to_string(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .delimiter(detect_delimiter(&content))
        .from_reader(content.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let fields: Vec<String> = record.iter().map(|f| f.trim().to_string()).collect();
        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }
        records.push((line, fields));
    }
    Ok(records)
}

pub(crate) fn parse_error(path: &Path, line: u64, reason: impl Into<String>) -> VoomError {
    VoomError::Parse {
        file: path.display().to_string(),
        line: line as usize,
        reason: reason.into(),
    }
}

/// Parse a non-negative integral count
fn parse_count(path: &Path, line: u64, field: &str) -> Result<f64> {
    let value: f64 = field
        .parse()
        .map_err(|_| parse_error(path, line, format!("count '{}' is not a number", field)))?;
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(parse_error(
            path,
            line,
            format!("count '{}' is not a non-negative integer", field),
        ));
    }
    Ok(value)
}

/// Read one sample's counts from a delimited file.
///
/// A first line whose count field is not numeric is taken as a header.
pub fn read_sample_counts<P: AsRef<Path>>(path: P, columns: CountColumns) -> Result<SampleCounts> {
    let path = path.as_ref();
    let records = read_records(path)?;
    let needed = columns.gene.max(columns.count) + 1;

    let mut gene_ids = Vec::new();
    let mut counts = Vec::new();
    let mut seen: HashMap<String, u64> = HashMap::new();

    for (i, (line, fields)) in records.iter().enumerate() {
        if fields.len() < needed {
            return Err(parse_error(
                path,
                *line,
                format!("{} fields, need at least {}", fields.len(), needed),
            ));
        }
        let count_field = &fields[columns.count];
        if i == 0 && count_field.parse::<f64>().is_err() {
            log::debug!("{}: treating line {} as a header", path.display(), line);
            continue;
        }

        let gene = fields[columns.gene].clone();
        if gene.is_empty() {
            return Err(parse_error(path, *line, "empty gene id"));
        }
        if let Some(first) = seen.insert(gene.clone(), *line) {
            return Err(parse_error(
                path,
                *line,
                format!("gene '{}' already listed on line {}", gene, first),
            ));
        }
        counts.push(parse_count(path, *line, count_field)?);
        gene_ids.push(gene);
    }

    if gene_ids.is_empty() {
        return Err(VoomError::InvalidCountMatrix {
            reason: format!("{} contains no counts", path.display()),
        });
    }
    Ok(SampleCounts { gene_ids, counts })
}

/// Sample id from a file name: the stem up to the first underscore
pub fn sample_id_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.split_once('_') {
        Some((id, _)) if !id.is_empty() => id.to_string(),
        _ => stem,
    }
}

/// Read every regular file of a directory as one sample and join them by
/// gene id. The first file fixes the gene order.
pub fn read_count_directory<P: AsRef<Path>>(dir: P, columns: CountColumns) -> Result<CountMatrix> {
    let dir = dir.as_ref();
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| !p.file_name().map_or(true, |n| n.to_string_lossy().starts_with('.')))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(VoomError::InvalidCountMatrix {
            reason: format!("no count files in {}", dir.display()),
        });
    }

    let first = read_sample_counts(&files[0], columns)?;
    let gene_ids = first.gene_ids.clone();
    let gene_index: HashMap<&str, usize> = gene_ids.iter().enumerate().map(|(i, g)| (g.as_str(), i)).collect();

    let mut data = Array2::zeros((gene_ids.len(), files.len()));
    for (i, &c) in first.counts.iter().enumerate() {
        data[[i, 0]] = c;
    }

    for (j, file) in files.iter().enumerate().skip(1) {
        let sample = read_sample_counts(file, columns)?;
        if sample.gene_ids.len() != gene_ids.len() {
            return Err(VoomError::InvalidCountMatrix {
                reason: format!(
                    "{} lists {} genes but {} lists {}",
                    file.display(),
                    sample.gene_ids.len(),
                    files[0].display(),
                    gene_ids.len()
                ),
            });
        }
        for (gene, &count) in sample.gene_ids.iter().zip(&sample.counts) {
            let row = gene_index.get(gene.as_str()).ok_or_else(|| VoomError::InvalidCountMatrix {
                reason: format!("gene '{}' in {} is missing from {}", gene, file.display(), files[0].display()),
            })?;
            data[[*row, j]] = count;
        }
    }

    let sample_ids: Vec<String> = files.iter().map(|f| sample_id_from_path(f)).collect();
    let matrix = CountMatrix::new(data, gene_ids, sample_ids)?;
    log::info!(
        "Read {} samples x {} genes from {}",
        matrix.n_samples(),
        matrix.n_genes(),
        dir.display()
    );
    Ok(matrix)
}

/// Read a wide count table: header row of sample ids, first column gene ids
pub fn read_count_table<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let path = path.as_ref();
    let records = read_records(path)?;
    let (header_line, header) = records.first().ok_or_else(|| VoomError::InvalidCountMatrix {
        reason: format!("{} is empty", path.display()),
    })?;
    if header.len() < 2 {
        return Err(parse_error(path, *header_line, "header needs a gene column and at least one sample"));
    }

    let sample_ids: Vec<String> = header[1..].to_vec();
    let n_samples = sample_ids.len();
    let mut gene_ids = Vec::new();
    let mut values = Vec::new();

    for (line, fields) in &records[1..] {
        if fields.len() != n_samples + 1 {
            return Err(parse_error(
                path,
                *line,
                format!("{} fields, expected {}", fields.len(), n_samples + 1),
            ));
        }
        gene_ids.push(fields[0].clone());
        for field in &fields[1..] {
            values.push(parse_count(path, *line, field)?);
        }
    }

    if gene_ids.is_empty() {
        return Err(VoomError::InvalidCountMatrix {
            reason: format!("{} contains no genes", path.display()),
        });
    }

    let data = Array2::from_shape_vec((gene_ids.len(), n_samples), values).map_err(|e| {
        VoomError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    CountMatrix::new(data, gene_ids, sample_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn write_file(dir: &Path, name: &str, lines: &[&str]) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        for l in lines {
            writeln!(f, "{}", l).unwrap();
        }
    }

    #[test]
    fn test_read_sample_counts_with_header_and_comments() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# produced by featureCounts").unwrap();
        writeln!(file, "EntrezID\tGeneLength\tCount").unwrap();
        writeln!(file, "497097\t3634\t1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "100503874\t3259\t0").unwrap();

        let s = read_sample_counts(file.path(), CountColumns { gene: 0, count: 2 }).unwrap();
        assert_eq!(s.gene_ids, vec!["497097", "100503874"]);
        assert_eq!(s.counts, vec![1.0, 0.0]);
    }

    #[test]
    fn test_read_sample_counts_rejects_fractional() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "g1,4").unwrap();
        writeln!(file, "g2,2.5").unwrap();
        let err = read_sample_counts(file.path(), CountColumns::default()).unwrap_err();
        match err {
            VoomError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_sample_id_from_path() {
        assert_eq!(sample_id_from_path(Path::new("/x/GSM1545535_10_6_5_11.txt")), "GSM1545535");
        assert_eq!(sample_id_from_path(Path::new("plain.txt")), "plain");
    }

    #[test]
    fn test_read_count_directory_joins_by_gene() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "GSM1_a.txt", &["id\tcount", "g1\t10", "g2\t20", "g3\t0"]);
        write_file(dir.path(), "GSM2_b.txt", &["id\tcount", "g3\t5", "g1\t7", "g2\t1"]);

        let m = read_count_directory(dir.path(), CountColumns::default()).unwrap();
        assert_eq!(m.sample_ids(), &["GSM1".to_string(), "GSM2".to_string()]);
        assert_eq!(m.gene_ids()[2], "g3");
        assert_eq!(m.counts()[[0, 1]], 7.0);
        assert_eq!(m.counts()[[2, 1]], 5.0);
        assert_eq!(m.library_sizes(), &[30.0, 13.0]);
    }

    #[test]
    fn test_read_count_directory_gene_mismatch() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "A_1.txt", &["g1\t10", "g2\t20"]);
        write_file(dir.path(), "B_1.txt", &["g1\t10", "g9\t20"]);
        let err = read_count_directory(dir.path(), CountColumns::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DataShape);
    }

    #[test]
    fn test_read_count_table() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id,s1,s2,s3").unwrap();
        writeln!(file, "gene1,100,200,150").unwrap();
        writeln!(file, "gene2,50,75,60").unwrap();

        let matrix = read_count_table(file.path()).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.counts()[[1, 2]], 60.0);
    }
}
