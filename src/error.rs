//! Error types for pipeline state tracking.

use crate::types::{BatchId, DocId, ProcessStage};
use thiserror::Error;

/// Main error type for state operations.
///
/// Business failures (a parser rejecting a PDF, an indexer timing out) are
/// not errors here: they travel as [`ProcessStatus::Failed`] on a stage
/// result and are recorded by the normal transition operations.
///
/// [`ProcessStatus::Failed`]: crate::types::ProcessStatus::Failed
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document state not found: {0}")]
    DocumentNotFound(DocId),

    #[error("Batch state not found: {0}")]
    BatchNotFound(BatchId),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// A stored record exists but cannot be read back.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A record decoded but carried a malformed tag or shape.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition for {doc_id}: cannot apply {attempted} while at {from}")]
    InvalidTransition {
        doc_id: DocId,
        from: ProcessStage,
        attempted: String,
    },

    #[error("Invalid record id: {0:?}")]
    InvalidId(String),

    #[error("State store is locked by another process")]
    Locked,
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        StateError::Serialization(e.to_string())
    }
}

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
