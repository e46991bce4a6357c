//! Pipeline configuration loaded from JSON

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoomError};
use crate::filter::FilterParams;
use crate::geneset::CameraParams;
use crate::normalization::{NormMethod, TmmParams, DEFAULT_PRIOR_COUNT};
use crate::testing::{DecideParams, EbayesParams};
use crate::variance::VoomParams;

/// Settings for every stage of [`crate::run_pipeline`].
///
/// Any field missing from a JSON file takes its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub norm_method: NormMethod,
    pub tmm: TmmParams,
    /// Prior count added to CPM before taking logs
    pub prior_count: f64,
    pub filter: FilterParams,
    pub voom: VoomParams,
    pub ebayes: EbayesParams,
    pub decide: DecideParams,
    pub camera: CameraParams,
    /// Contrast expressions; empty means every pairwise group difference
    pub contrasts: Vec<String>,
    /// Minimum log2 fold change tested by treat; 0 runs the ordinary test
    pub lfc_threshold: f64,
    pub output_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            norm_method: NormMethod::Tmm,
            tmm: TmmParams::default(),
            prior_count: DEFAULT_PRIOR_COUNT,
            filter: FilterParams::default(),
            voom: VoomParams::default(),
            ebayes: EbayesParams::default(),
            decide: DecideParams::default(),
            camera: CameraParams::default(),
            contrasts: Vec::new(),
            lfc_threshold: 0.0,
            output_prefix: "voom".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let config: PipelineConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings no stage could run with
    pub fn validate(&self) -> Result<()> {
        if !(self.prior_count > 0.0 && self.prior_count.is_finite()) {
            return Err(VoomError::InvalidParameter {
                reason: format!("prior_count must be positive, got {}", self.prior_count),
            });
        }
        if !(self.filter.cpm_threshold >= 0.0) {
            return Err(VoomError::InvalidParameter {
                reason: format!("cpm_threshold must be non-negative, got {}", self.filter.cpm_threshold),
            });
        }
        if !(self.lfc_threshold >= 0.0 && self.lfc_threshold.is_finite()) {
            return Err(VoomError::InvalidParameter {
                reason: format!("lfc_threshold must be non-negative, got {}", self.lfc_threshold),
            });
        }
        if !(self.decide.p_value > 0.0 && self.decide.p_value <= 1.0) {
            return Err(VoomError::InvalidParameter {
                reason: format!("p_value must be in (0, 1], got {}", self.decide.p_value),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::LibrarySizePolicy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"contrasts": ["Basal-LP", "Basal-ML"], "filter": {{"library_sizes": "retain"}}, "lfc_threshold": 1.0}}"#
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.contrasts.len(), 2);
        assert_eq!(config.filter.library_sizes, LibrarySizePolicy::Retain);
        assert_eq!(config.filter.cpm_threshold, 1.0);
        assert_eq!(config.lfc_threshold, 1.0);
        assert_eq!(config.prior_count, DEFAULT_PRIOR_COUNT);
        assert_eq!(config.norm_method, NormMethod::Tmm);
    }

    #[test]
    fn test_roundtrip_defaults() {
        let json = PipelineConfig::default().to_json().unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.decide.p_value, 0.05);
        assert!(back.camera.use_ranks);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"lfc_threshold": -1}}"#).unwrap();
        let err = PipelineConfig::from_json_file(file.path()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
