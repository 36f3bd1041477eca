use crate::dto::DocId;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DedupError>;

#[derive(Debug, Error)]
pub enum DedupError {
    /// A document could not be read or parsed. Absorbed per document.
    #[error("document {id}: {reason}")]
    DocumentRead { id: DocId, reason: String },

    /// Stored signatures were produced with different run parameters.
    #[error("configuration mismatch in {source_name}: {detail}")]
    ConfigurationMismatch { source_name: String, detail: String },

    /// A candidate pair references an id that has no signature.
    #[error("candidate pair ({a}, {b}) references unknown document {unknown}")]
    MalformedCandidatePair { a: DocId, b: DocId, unknown: DocId },

    /// A partition worker crashed. Retryable independently.
    #[error("partition {partition} failed: {reason}")]
    WorkerFailure { partition: usize, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DedupError {
    pub fn document_read<T: fmt::Display>(id: DocId, reason: T) -> DedupError {
        DedupError::DocumentRead {
            id,
            reason: reason.to_string(),
        }
    }

    pub fn configuration_mismatch<S, T>(source_name: S, detail: T) -> DedupError
    where
        S: fmt::Display,
        T: fmt::Display,
    {
        DedupError::ConfigurationMismatch {
            source_name: source_name.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn worker_failure<T: fmt::Display>(partition: usize, reason: T) -> DedupError {
        DedupError::WorkerFailure {
            partition,
            reason: reason.to_string(),
        }
    }

    pub fn invalid_config<T: fmt::Display>(msg: T) -> DedupError {
        DedupError::InvalidConfig(msg.to_string())
    }

    /// Whether the error aborts the run rather than being counted and skipped.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DedupError::DocumentRead { .. }
                | DedupError::MalformedCandidatePair { .. }
                | DedupError::WorkerFailure { .. }
        )
    }
}
