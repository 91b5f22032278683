//! Stage results produced by external stage executors.
//!
//! Each pipeline stage reports one result type. Results are plain data: a
//! failing executor hands back a result with [`ProcessStatus::Failed`] and an
//! error message, and the state machine records it.

use crate::document::DocumentState;
use crate::types::{Metadata, ProcessStage, ProcessStatus};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Raw file content carried by an [`ExtractResult`].
///
/// Bytes stay with the stage executor; a persisted record only keeps the
/// placeholder `"<bytes: N bytes>"`. Two values compare equal when their
/// lengths match, so a loaded record equals the one that was saved.
#[derive(Clone)]
pub enum FileBytes {
    /// Content held in memory.
    Held(Vec<u8>),
    /// Content left out of the record; only its length survived.
    Detached { len: u64 },
}

impl FileBytes {
    pub fn len(&self) -> u64 {
        match self {
            FileBytes::Held(bytes) => bytes.len() as u64,
            FileBytes::Detached { len } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The content, if it is still held.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            FileBytes::Held(bytes) => Some(bytes),
            FileBytes::Detached { .. } => None,
        }
    }

    fn placeholder(&self) -> String {
        format!("<bytes: {} bytes>", self.len())
    }

    fn parse_placeholder(s: &str) -> Option<u64> {
        s.strip_prefix("<bytes: ")?
            .strip_suffix(" bytes>")?
            .parse()
            .ok()
    }
}

impl fmt::Debug for FileBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileBytes::Held(_) => write!(f, "FileBytes::Held({})", self.len()),
            FileBytes::Detached { len } => write!(f, "FileBytes::Detached({})", len),
        }
    }
}

impl PartialEq for FileBytes {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
    }
}

impl Serialize for FileBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.placeholder())
    }
}

impl<'de> Deserialize<'de> for FileBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FileBytes::parse_placeholder(&s)
            .map(|len| FileBytes::Detached { len })
            .ok_or_else(|| de::Error::custom(format!("invalid byte placeholder: {:?}", s)))
    }
}

/// Result of the extract stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractResult {
    pub status: ProcessStatus,
    #[serde(default)]
    pub file_bytes: Option<FileBytes>,
    /// Hex SHA-256 of the extracted content.
    #[serde(default)]
    pub file_hash: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub extract_time: f64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ExtractResult {
    /// A successful extraction of `bytes`, hashed with SHA-256.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let file_hash = hex::encode(Sha256::digest(&bytes));
        Self {
            status: ProcessStatus::Success,
            file_bytes: (!bytes.is_empty()).then_some(FileBytes::Held(bytes)),
            file_hash: Some(file_hash),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ProcessStatus::Failed,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Result of the parser stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserResult {
    pub status: ProcessStatus,
    #[serde(default)]
    pub pages: u32,
    /// Markdown rendering of the document.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub struct_content: Option<serde_json::Value>,
    #[serde(default)]
    pub images_info: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub tables_info: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub parse_time: f64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ParserResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ProcessStatus::Failed,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// One chunk produced by the splitter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub chunk_id: String,
    /// Position within the document.
    pub chunk_index: u32,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub token_count: Option<u32>,
}

/// Result of the splitter stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitterResult {
    pub status: ProcessStatus,
    #[serde(default)]
    pub chunks: Vec<ChunkInfo>,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default)]
    pub split_method: String,
    #[serde(default)]
    pub split_time: f64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl SplitterResult {
    /// A successful split into `chunks`.
    pub fn new(chunks: Vec<ChunkInfo>) -> Self {
        Self {
            status: ProcessStatus::Success,
            chunk_count: chunks.len(),
            chunks,
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ProcessStatus::Failed,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Result of the update (indexing) stage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub status: ProcessStatus,
    #[serde(default)]
    pub updated_ids: Vec<String>,
    #[serde(default)]
    pub success_count: usize,
    #[serde(default)]
    pub failed_count: usize,
    #[serde(default)]
    pub update_time: f64,
    #[serde(default)]
    pub db_collection: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl UpdateResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ProcessStatus::Failed,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Borrowed view of whichever result a stage produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StageResult<'a> {
    Extract(&'a ExtractResult),
    Parser(&'a ParserResult),
    Splitter(&'a SplitterResult),
    Update(&'a UpdateResult),
}

impl StageResult<'_> {
    pub fn stage(&self) -> ProcessStage {
        match self {
            StageResult::Extract(_) => ProcessStage::Extract,
            StageResult::Parser(_) => ProcessStage::Parser,
            StageResult::Splitter(_) => ProcessStage::Splitter,
            StageResult::Update(_) => ProcessStage::Update,
        }
    }

    pub fn status(&self) -> ProcessStatus {
        match self {
            StageResult::Extract(r) => r.status,
            StageResult::Parser(r) => r.status,
            StageResult::Splitter(r) => r.status,
            StageResult::Update(r) => r.status,
        }
    }

    /// Elapsed seconds reported by the executor.
    pub fn elapsed_secs(&self) -> f64 {
        match self {
            StageResult::Extract(r) => r.extract_time,
            StageResult::Parser(r) => r.parse_time,
            StageResult::Splitter(r) => r.split_time,
            StageResult::Update(r) => r.update_time,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            StageResult::Extract(r) => r.error_message.as_deref(),
            StageResult::Parser(r) => r.error_message.as_deref(),
            StageResult::Splitter(r) => r.error_message.as_deref(),
            StageResult::Update(r) => r.error_message.as_deref(),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            StageResult::Extract(r) => &r.metadata,
            StageResult::Parser(r) => &r.metadata,
            StageResult::Splitter(r) => &r.metadata,
            StageResult::Update(r) => &r.metadata,
        }
    }
}

/// A result that belongs to one pipeline stage and fills its slot on a
/// [`DocumentState`].
pub trait StageOutcome: Sized {
    /// The stage that produces this result.
    const STAGE: ProcessStage;

    fn status(&self) -> ProcessStatus;

    fn error_message(&self) -> Option<&str>;

    /// Store the result in its slot, replacing any previous one.
    fn attach(self, state: &mut DocumentState);
}

macro_rules! stage_outcome {
    ($ty:ty, $stage:expr, $slot:ident) => {
        impl StageOutcome for $ty {
            const STAGE: ProcessStage = $stage;

            fn status(&self) -> ProcessStatus {
                self.status
            }

            fn error_message(&self) -> Option<&str> {
                self.error_message.as_deref()
            }

            fn attach(self, state: &mut DocumentState) {
                state.$slot = Some(self);
            }
        }
    };
}

stage_outcome!(ExtractResult, ProcessStage::Extract, extract_result);
stage_outcome!(ParserResult, ProcessStage::Parser, parser_result);
stage_outcome!(SplitterResult, ProcessStage::Splitter, splitter_result);
stage_outcome!(UpdateResult, ProcessStage::Update, update_result);
