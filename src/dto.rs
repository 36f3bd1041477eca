use crate::error::{DedupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Global offset of a document within the corpus.
pub type DocId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Document {
    pub id: DocId,
    pub text: String,
}

impl Document {
    pub fn new(id: DocId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

/// Run-level parameters shared by every stage of the pipeline.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DedupConfig {
    /// Signature length (number of hash permutations).
    pub num_perm: usize,
    /// Explicit band count. When absent it is derived from `threshold`.
    pub num_bands: Option<usize>,
    /// Target jaccard similarity where the LSH S-curve crosses 0.5.
    pub threshold: f64,
    /// Words per shingle.
    pub shingle_width: usize,
    /// Lower-case and strip punctuation before shingling.
    pub normalize: bool,
    /// Seed from which every hash permutation is drawn.
    pub seed: u64,
    pub workers: usize,
    /// Documents per signature partition.
    pub partition_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            num_perm: 128,
            num_bands: None,
            threshold: 0.5,
            shingle_width: 5,
            normalize: true,
            seed: 1,
            workers: 4,
            partition_size: 100_000,
        }
    }
}

impl DedupConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DedupConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_perm == 0 {
            return Err(DedupError::invalid_config("numPerm must be >= 1"));
        }
        if self.shingle_width == 0 {
            return Err(DedupError::invalid_config("shingleWidth must be >= 1"));
        }
        if self.workers == 0 {
            return Err(DedupError::invalid_config("workers must be >= 1"));
        }
        if self.partition_size == 0 {
            return Err(DedupError::invalid_config("partitionSize must be >= 1"));
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(DedupError::invalid_config(format!(
                "threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if let Some(bands) = self.num_bands {
            if bands == 0 || self.num_perm % bands != 0 {
                return Err(DedupError::invalid_config(format!(
                    "numBands ({bands}) must divide numPerm ({})",
                    self.num_perm
                )));
            }
        }
        Ok(())
    }
}

/// Header stored next to persisted signatures. Any difference between a
/// stored header and the current run invalidates the stored signatures.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHeader {
    pub num_perm: usize,
    pub num_bands: usize,
    pub rows_per_band: usize,
    pub seed: u64,
    pub shingle_width: usize,
    pub normalize: bool,
}

/// A dropped document and the surviving document it duplicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DuplicateRecord {
    pub dropped: DocId,
    pub kept: DocId,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateStats {
    pub total_duplicates: usize,
    pub total_clusters: usize,
    pub threshold: f64,
    /// cluster size -> number of clusters of that size
    pub cluster_sizes: BTreeMap<usize, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config = DedupConfig::from_json(r#"{"numPerm": 256, "threshold": 0.8}"#).unwrap();
        assert_eq!(config.num_perm, 256);
        assert_eq!(config.threshold, 0.8);
        assert_eq!(config.shingle_width, 5);
        assert_eq!(config.num_bands, None);
        assert!(config.normalize);
    }

    #[test]
    fn config_rejects_bad_threshold() {
        let err = DedupConfig::from_json(r#"{"threshold": 0.0}"#).unwrap_err();
        assert!(matches!(err, DedupError::InvalidConfig(_)));
        let err = DedupConfig::from_json(r#"{"threshold": 1.5}"#).unwrap_err();
        assert!(matches!(err, DedupError::InvalidConfig(_)));
    }

    #[test]
    fn config_rejects_bands_not_dividing_perm() {
        let config = DedupConfig {
            num_perm: 100,
            num_bands: Some(7),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
