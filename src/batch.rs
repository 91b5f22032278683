//! Batch grouping of document states.
//!
//! A batch owns snapshots of its documents. The snapshots are not kept in
//! sync with the per-document records; [`StateManager::refresh_batch`]
//! reloads them on demand.
//!
//! [`StateManager::refresh_batch`]: crate::manager::StateManager::refresh_batch

use crate::document::DocumentState;
use crate::types::{BatchId, DocId, ProcessStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rollup counters of a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    #[serde(rename = "total_count")]
    pub total: usize,
    #[serde(rename = "success_count")]
    pub success: usize,
    #[serde(rename = "failed_count")]
    pub failed: usize,
    #[serde(rename = "processing_count")]
    pub processing: usize,
    #[serde(rename = "pending_count")]
    pub pending: usize,
}

impl BatchCounts {
    /// Count documents by overall status.
    pub fn tally<'a>(docs: impl IntoIterator<Item = &'a DocumentState>) -> Self {
        let mut counts = BatchCounts::default();
        for doc in docs {
            counts.total += 1;
            match doc.overall_status() {
                ProcessStatus::Success => counts.success += 1,
                ProcessStatus::Failed => counts.failed += 1,
                ProcessStatus::Processing => counts.processing += 1,
                ProcessStatus::Pending => counts.pending += 1,
                ProcessStatus::Skipped => {}
            }
        }
        counts
    }

    /// Percentage of documents that are done, successfully or not.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.success + self.failed) as f64 / self.total as f64 * 100.0
    }
}

/// A named group of document states tracked together.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchProcessState {
    batch_id: BatchId,
    #[serde(default)]
    pub batch_name: Option<String>,
    #[serde(default)]
    doc_states: Vec<DocumentState>,
    #[serde(flatten)]
    counts: BatchCounts,
    pub created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BatchProcessState {
    pub fn new(batch_id: BatchId, batch_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            batch_id,
            batch_name,
            doc_states: Vec::new(),
            counts: BatchCounts::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    pub fn doc_states(&self) -> &[DocumentState] {
        &self.doc_states
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Counters as of the last recompute.
    pub fn counts(&self) -> BatchCounts {
        self.counts
    }

    pub fn total_count(&self) -> usize {
        self.counts.total
    }

    pub fn success_count(&self) -> usize {
        self.counts.success
    }

    pub fn failed_count(&self) -> usize {
        self.counts.failed
    }

    pub fn processing_count(&self) -> usize {
        self.counts.processing
    }

    pub fn pending_count(&self) -> usize {
        self.counts.pending
    }

    /// Add a snapshot, replacing any snapshot of the same document.
    pub fn add_document(&mut self, state: DocumentState) {
        let existing = self
            .doc_states
            .iter()
            .position(|d| d.doc_id() == state.doc_id());
        match existing {
            Some(pos) => self.doc_states[pos] = state,
            None => self.doc_states.push(state),
        }
        self.recompute();
    }

    /// Remove the snapshot of `doc_id`, returning it.
    pub fn remove_document(&mut self, doc_id: &DocId) -> Option<DocumentState> {
        let pos = self.doc_states.iter().position(|d| d.doc_id() == doc_id)?;
        let removed = self.doc_states.remove(pos);
        self.recompute();
        Some(removed)
    }

    /// Replace every snapshot at once.
    pub fn replace_documents(&mut self, states: Vec<DocumentState>) {
        self.doc_states = states;
        self.recompute();
    }

    /// Recount every counter from the snapshots and stamp `updated_at`.
    pub fn recompute(&mut self) {
        self.recount();
        self.updated_at = Utc::now();
    }

    /// Recount every counter from the snapshots, leaving `updated_at` alone.
    ///
    /// Stored counters are never trusted; loads call this.
    pub fn recount(&mut self) {
        self.counts = BatchCounts::tally(&self.doc_states);
    }

    /// Done percentage in `0.0..=100.0`; failed documents count as done.
    pub fn progress(&self) -> f64 {
        self.counts.progress()
    }
}
