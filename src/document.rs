//! Per-document state and its stage transitions.
//!
//! The transition methods here are pure: they mutate an in-memory
//! [`DocumentState`] and never touch storage. [`StateManager`] wraps each
//! of them in load, mutate, persist.
//!
//! [`StateManager`]: crate::manager::StateManager

use crate::error::{Result, StateError};
use crate::results::{
    ExtractResult, ParserResult, SplitterResult, StageOutcome, StageResult, UpdateResult,
};
use crate::types::{DocId, FileDescriptor, Metadata, ProcessStage, ProcessStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Retry budget given to documents unless configured otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Message recorded when a failed result carries none.
const UNKNOWN_ERROR: &str = "Unknown error";

/// One entry of a document's failure log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: ProcessStage,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
    /// Value of `retry_count` when the failure was recorded.
    pub retry_count: u32,
}

/// Global processing state of a single document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    doc_id: DocId,

    #[serde(flatten)]
    pub file: FileDescriptor,

    current_stage: ProcessStage,
    overall_status: ProcessStatus,

    pub created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub(crate) extract_result: Option<ExtractResult>,
    #[serde(default)]
    pub(crate) parser_result: Option<ParserResult>,
    #[serde(default)]
    pub(crate) splitter_result: Option<SplitterResult>,
    #[serde(default)]
    pub(crate) update_result: Option<UpdateResult>,

    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    error_history: Vec<ErrorRecord>,
    #[serde(default)]
    retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Compact projection of a document for listings.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub doc_id: DocId,
    pub file_name: String,
    pub file_type: String,
    pub current_stage: ProcessStage,
    pub overall_status: ProcessStatus,
    /// Seconds.
    pub processing_duration: Option<f64>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentState {
    /// A pending document at the extract stage.
    pub fn new(doc_id: DocId, file: FileDescriptor) -> Self {
        let now = Utc::now();
        Self {
            doc_id,
            file,
            current_stage: ProcessStage::Extract,
            overall_status: ProcessStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            extract_result: None,
            parser_result: None,
            splitter_result: None,
            update_result: None,
            metadata: Metadata::new(),
            tags: Vec::new(),
            error_history: Vec::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    /// The next stage to run, or the stage that last failed.
    pub fn current_stage(&self) -> ProcessStage {
        self.current_stage
    }

    pub fn overall_status(&self) -> ProcessStatus {
        self.overall_status
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn error_history(&self) -> &[ErrorRecord] {
        &self.error_history
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn extract_result(&self) -> Option<&ExtractResult> {
        self.extract_result.as_ref()
    }

    pub fn parser_result(&self) -> Option<&ParserResult> {
        self.parser_result.as_ref()
    }

    pub fn splitter_result(&self) -> Option<&SplitterResult> {
        self.splitter_result.as_ref()
    }

    pub fn update_result(&self) -> Option<&UpdateResult> {
        self.update_result.as_ref()
    }

    // --- Transitions ---

    /// Mark the document as processing and stamp `started_at`.
    ///
    /// Calling it again re-stamps; a completed document is rejected.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.is_completed() {
            return Err(self.invalid_transition("start_processing"));
        }
        self.overall_status = ProcessStatus::Processing;
        self.started_at = Some(now);
        Ok(())
    }

    /// Attach a stage result and move the document accordingly.
    ///
    /// A failed result marks the document failed and leaves
    /// `current_stage` on the failing stage. Any other result advances to
    /// the next stage, except for the update stage which only completes the
    /// document on success. Advancing out of a failure puts the document
    /// back to processing. `retry_count` is never touched here.
    pub fn apply_result<R: StageOutcome>(&mut self, result: R, now: DateTime<Utc>) -> Result<()> {
        let stage = R::STAGE;
        if self.current_stage != stage {
            return Err(self.invalid_transition(&format!("{} result", stage)));
        }

        let status = result.status();
        let message = result
            .error_message()
            .unwrap_or(UNKNOWN_ERROR)
            .to_string();
        result.attach(self);

        match stage {
            ProcessStage::Update if status == ProcessStatus::Success => {
                self.current_stage = ProcessStage::Completed;
                self.overall_status = ProcessStatus::Success;
                self.completed_at = Some(now);
            }
            ProcessStage::Update => self.record_failure(stage, message, now),
            _ if status == ProcessStatus::Failed => self.record_failure(stage, message, now),
            _ => {
                if let Some(next) = stage.next() {
                    self.current_stage = next;
                }
                if self.overall_status == ProcessStatus::Failed {
                    self.overall_status = ProcessStatus::Processing;
                }
            }
        }
        Ok(())
    }

    /// Explicit failure of `stage`, independent of any result payload.
    ///
    /// Unlike a failed result, this consumes one retry.
    pub fn fail_stage(
        &mut self,
        stage: ProcessStage,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if stage == ProcessStage::Completed {
            return Err(StateError::Validation(
                "cannot fail the completed stage".to_string(),
            ));
        }
        if self.is_completed() {
            return Err(self.invalid_transition(&format!("{} failure", stage)));
        }
        self.record_failure(stage, message.into(), now);
        self.retry_count += 1;
        Ok(())
    }

    /// Refresh `updated_at`; done on every persist.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn record_failure(&mut self, stage: ProcessStage, message: String, now: DateTime<Utc>) {
        self.overall_status = ProcessStatus::Failed;
        self.error_history.push(ErrorRecord {
            stage,
            error_message: message,
            timestamp: now,
            retry_count: self.retry_count,
        });
    }

    fn invalid_transition(&self, attempted: &str) -> StateError {
        StateError::InvalidTransition {
            doc_id: self.doc_id.clone(),
            from: self.current_stage,
            attempted: attempted.to_string(),
        }
    }

    // --- Queries ---

    pub fn is_completed(&self) -> bool {
        self.current_stage == ProcessStage::Completed
            && self.overall_status == ProcessStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.overall_status == ProcessStatus::Failed
    }

    pub fn can_retry(&self) -> bool {
        self.is_failed() && self.retry_count < self.max_retries
    }

    /// Time from `started_at` to `completed_at`, or to now while running.
    pub fn processing_duration(&self) -> Option<Duration> {
        self.processing_duration_at(Utc::now())
    }

    /// Like [`processing_duration`](Self::processing_duration) with an explicit clock.
    pub fn processing_duration_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or(now);
        Some((end - started).max(Duration::zero()))
    }

    pub fn stage_result(&self, stage: ProcessStage) -> Option<StageResult<'_>> {
        match stage {
            ProcessStage::Extract => self.extract_result.as_ref().map(StageResult::Extract),
            ProcessStage::Parser => self.parser_result.as_ref().map(StageResult::Parser),
            ProcessStage::Splitter => self.splitter_result.as_ref().map(StageResult::Splitter),
            ProcessStage::Update => self.update_result.as_ref().map(StageResult::Update),
            ProcessStage::Completed => None,
        }
    }

    /// Failures recorded against `stage`, oldest first.
    pub fn errors_for(&self, stage: ProcessStage) -> impl Iterator<Item = &ErrorRecord> {
        self.error_history.iter().filter(move |e| e.stage == stage)
    }

    /// Add a tag unless it is already present.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if self.tags.contains(&tag) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    pub fn to_summary(&self) -> DocumentSummary {
        DocumentSummary {
            doc_id: self.doc_id.clone(),
            file_name: self.file.name.clone(),
            file_type: self.file.file_type.clone(),
            current_stage: self.current_stage,
            overall_status: self.overall_status,
            processing_duration: self
                .processing_duration()
                .map(|d| d.num_milliseconds() as f64 / 1000.0),
            retry_count: self.retry_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
