use crate::dto::DocId;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SkippedDocument {
    pub id: DocId,
    pub reason: String,
}

/// Summary of a pipeline run. Produced even when documents or partitions failed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    pub documents_processed: usize,
    pub signatures: usize,
    /// Documents with fewer tokens than one shingle. Always kept.
    pub too_short: usize,
    pub skipped: Vec<SkippedDocument>,
    pub failed_partitions: Vec<usize>,
    pub candidate_pairs: usize,
    pub malformed_pairs: usize,
    pub clusters_found: usize,
    pub duplicates_dropped: usize,
}

impl RunManifest {
    pub fn remaining(&self) -> usize {
        self.documents_processed - self.duplicates_dropped
    }

    pub fn log_summary(&self) {
        let percent_remaining = if self.documents_processed == 0 {
            100.0
        } else {
            self.remaining() as f64 / self.documents_processed as f64 * 100.0
        };
        info!(
            processed = self.documents_processed,
            skipped = self.skipped.len(),
            too_short = self.too_short,
            failed_partitions = self.failed_partitions.len(),
            clusters = self.clusters_found,
            dropped = self.duplicates_dropped,
            "Remaining: {percent_remaining:.2}%"
        );
    }
}
