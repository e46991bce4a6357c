//! Metadata structures for samples and genes

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{Result, VoomError};

/// Sample design: one group label per sample plus optional categorical
/// covariates such as sequencing lane or batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleDesign {
    /// Sample identifiers
    sample_ids: Vec<String>,
    /// Name of the grouping factor (e.g. "group")
    group_name: String,
    /// Group label for each sample
    groups: Vec<String>,
    /// Covariate factors in insertion order (name, value per sample)
    covariates: Vec<(String, Vec<String>)>,
}

impl SampleDesign {
    /// Create a design from sample ids and their group labels
    pub fn new(sample_ids: Vec<String>, group_name: &str, groups: Vec<String>) -> Result<Self> {
        if sample_ids.is_empty() {
            return Err(VoomError::InvalidDesign {
                reason: "design has no samples".to_string(),
            });
        }

        if groups.len() != sample_ids.len() {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} group labels", sample_ids.len()),
                got: format!("{} group labels", groups.len()),
            });
        }

        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(VoomError::InvalidDesign {
                    reason: format!("duplicate sample ID '{}'", id),
                });
            }
        }

        if let Some(i) = groups.iter().position(|g| g.trim().is_empty()) {
            return Err(VoomError::InvalidDesign {
                reason: format!("sample '{}' has an empty group label", sample_ids[i]),
            });
        }

        let design = Self {
            sample_ids,
            group_name: group_name.to_string(),
            groups,
            covariates: Vec::new(),
        };

        let n_levels = design.group_levels().len();
        if n_levels < 2 {
            return Err(VoomError::InvalidDesign {
                reason: format!(
                    "factor '{}' needs at least 2 levels for contrasts, found {}",
                    group_name, n_levels
                ),
            });
        }

        Ok(design)
    }

    /// Add a categorical covariate (batch, lane, ...)
    pub fn add_covariate(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(VoomError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        if name == self.group_name || self.covariates.iter().any(|(n, _)| n == name) {
            return Err(VoomError::InvalidDesign {
                reason: format!("factor '{}' is already part of the design", name),
            });
        }
        self.covariates.push((name.to_string(), values));
        Ok(())
    }

    /// Get sample IDs
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Get number of samples
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    /// Group label per sample
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Covariates as (name, values) pairs in insertion order
    pub fn covariates(&self) -> &[(String, Vec<String>)] {
        &self.covariates
    }

    /// Sorted unique group levels
    pub fn group_levels(&self) -> Vec<String> {
        sorted_levels(&self.groups)
    }

    /// Sorted unique levels of a covariate
    pub fn covariate_levels(&self, name: &str) -> Option<Vec<String>> {
        self.covariates
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| sorted_levels(values))
    }

    /// Indices of samples in a group level
    pub fn samples_in_group(&self, level: &str) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.as_str() == level)
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of samples per group level, in level order
    pub fn group_sizes(&self) -> Vec<(String, usize)> {
        self.group_levels()
            .into_iter()
            .map(|level| {
                let n = self.groups.iter().filter(|g| **g == level).count();
                (level, n)
            })
            .collect()
    }

    /// Reorder/subset the design to the given sample indices
    pub fn subset(&self, sample_indices: &[usize]) -> Result<Self> {
        let new_ids: Vec<String> = sample_indices.iter().map(|&i| self.sample_ids[i].clone()).collect();
        let new_groups: Vec<String> = sample_indices.iter().map(|&i| self.groups[i].clone()).collect();

        let mut design = SampleDesign::new(new_ids, &self.group_name, new_groups)?;
        for (name, values) in &self.covariates {
            let new_values: Vec<String> = sample_indices.iter().map(|&i| values[i].clone()).collect();
            design.add_covariate(name, new_values)?;
        }
        Ok(design)
    }
}

fn sorted_levels(values: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = values.to_vec();
    unique.sort();
    unique.dedup();
    unique
}

/// A single gene annotation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub gene_id: String,
    pub symbol: String,
    pub chromosome: String,
}

/// Gene annotation table keyed by gene id
///
/// Duplicate gene ids keep their first occurrence.
#[derive(Debug, Clone, Default)]
pub struct GeneAnnotation {
    records: Vec<AnnotationRecord>,
    index: HashMap<String, usize>,
}

impl GeneAnnotation {
    pub fn from_records<I: IntoIterator<Item = AnnotationRecord>>(records: I) -> Self {
        let mut annotation = GeneAnnotation::default();
        let mut duplicates = 0usize;

        for record in records {
            if annotation.index.contains_key(&record.gene_id) {
                duplicates += 1;
                continue;
            }
            annotation.index.insert(record.gene_id.clone(), annotation.records.len());
            annotation.records.push(record);
        }

        if duplicates > 0 {
            log::warn!(
                "Annotation contained {} duplicate gene entries; kept the first occurrence of each",
                duplicates
            );
        }
        annotation
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, gene_id: &str) -> Option<&AnnotationRecord> {
        self.index.get(gene_id).map(|&i| &self.records[i])
    }

    /// Join against an ordered gene list
    pub fn annotate<'a>(&'a self, gene_ids: &[String]) -> Vec<Option<&'a AnnotationRecord>> {
        gene_ids.iter().map(|id| self.get(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sample_design() {
        let mut design = SampleDesign::new(
            strings(&["s1", "s2", "s3", "s4"]),
            "group",
            strings(&["LP", "Basal", "LP", "Basal"]),
        )
        .unwrap();
        design
            .add_covariate("lane", strings(&["L004", "L004", "L006", "L006"]))
            .unwrap();

        assert_eq!(design.group_levels(), vec!["Basal", "LP"]);
        assert_eq!(design.samples_in_group("LP"), vec![0, 2]);
        assert_eq!(design.covariate_levels("lane").unwrap(), vec!["L004", "L006"]);
        assert_eq!(
            design.group_sizes(),
            vec![("Basal".to_string(), 2), ("LP".to_string(), 2)]
        );
    }

    #[test]
    fn test_single_group_rejected() {
        let result = SampleDesign::new(strings(&["s1", "s2"]), "group", strings(&["A", "A"]));
        assert!(matches!(result, Err(VoomError::InvalidDesign { .. })));
    }

    #[test]
    fn test_group_length_mismatch() {
        let result = SampleDesign::new(strings(&["s1", "s2"]), "group", strings(&["A"]));
        assert!(matches!(result, Err(VoomError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_subset_keeps_covariates() {
        let mut design = SampleDesign::new(
            strings(&["s1", "s2", "s3"]),
            "group",
            strings(&["A", "B", "C"]),
        )
        .unwrap();
        design.add_covariate("lane", strings(&["x", "y", "z"])).unwrap();

        let sub = design.subset(&[2, 0]).unwrap();
        assert_eq!(sub.sample_ids(), &strings(&["s3", "s1"])[..]);
        assert_eq!(sub.covariates()[0].1, strings(&["z", "x"]));
    }

    #[test]
    fn test_annotation_keeps_first_duplicate() {
        let annotation = GeneAnnotation::from_records(vec![
            AnnotationRecord {
                gene_id: "497097".to_string(),
                symbol: "Xkr4".to_string(),
                chromosome: "chr1".to_string(),
            },
            AnnotationRecord {
                gene_id: "497097".to_string(),
                symbol: "Other".to_string(),
                chromosome: "chr2".to_string(),
            },
        ]);

        assert_eq!(annotation.len(), 1);
        assert_eq!(annotation.get("497097").unwrap().symbol, "Xkr4");

        let joined = annotation.annotate(&strings(&["497097", "missing"]));
        assert!(joined[0].is_some());
        assert!(joined[1].is_none());
    }
}
