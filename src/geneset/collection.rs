//! Named gene sets

use std::collections::HashSet;

use crate::error::{Result, VoomError};

/// A named set of gene identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneSet {
    pub name: String,
    pub description: String,
    pub genes: Vec<String>,
}

/// Ordered collection of gene sets with unique names
#[derive(Debug, Clone, Default)]
pub struct GeneSetCollection {
    sets: Vec<GeneSet>,
}

impl GeneSetCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a set. Repeated gene ids within the set are collapsed.
    pub fn push(&mut self, name: impl Into<String>, description: impl Into<String>, genes: Vec<String>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(VoomError::InvalidParameter {
                reason: "gene set name is empty".to_string(),
            });
        }
        if self.sets.iter().any(|s| s.name == name) {
            return Err(VoomError::InvalidParameter {
                reason: format!("duplicate gene set '{}'", name),
            });
        }

        let mut seen = HashSet::new();
        let genes: Vec<String> = genes.into_iter().filter(|g| seen.insert(g.clone())).collect();
        self.sets.push(GeneSet {
            name,
            description: description.into(),
            genes,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneSet> {
        self.sets.iter()
    }

    pub fn get(&self, name: &str) -> Option<&GeneSet> {
        self.sets.iter().find(|s| s.name == name)
    }
}
