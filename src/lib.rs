//! # Ingest State
//!
//! Durable, resumable state tracking for documents moving through a fixed
//! ingestion pipeline:
//!
//! ```text
//! extract -> parser -> splitter -> update -> completed
//! ```
//!
//! ## Core Concepts
//!
//! - **Document state**: per-document record of the current stage, overall
//!   status, each stage's result and an append-only failure log
//! - **Stage results**: outcomes reported by external stage executors; a
//!   failing stage is data, not an error
//! - **Batches**: snapshot groups of document states with rollup counters
//! - **Record store**: one indented JSON file per record, written atomically
//!
//! ## Example
//!
//! ```ignore
//! use ingest_state::{ExtractResult, NewDocument, ParserResult, StateManager, StoreConfig};
//!
//! let manager = StateManager::open(StoreConfig {
//!     path: "./states".into(),
//!     ..Default::default()
//! })?;
//!
//! let doc = manager.create_document_state("inbox/a.pdf", NewDocument::default())?;
//! manager.start_processing(doc.doc_id())?;
//! manager.update_extract_result(doc.doc_id(), ExtractResult::from_bytes(bytes))?;
//! manager.update_parser_result(doc.doc_id(), ParserResult::failed("bad pdf"))?;
//!
//! if manager.load_document_state(doc.doc_id())?.is_some_and(|d| d.can_retry()) {
//!     // re-dispatch the parser
//! }
//! ```

pub mod batch;
pub mod codec;
pub mod document;
pub mod error;
pub mod maintenance;
pub mod manager;
pub mod results;
pub mod store;
pub mod types;

// Re-exports
pub use batch::{BatchCounts, BatchProcessState};
pub use document::{DocumentState, DocumentSummary, ErrorRecord, DEFAULT_MAX_RETRIES};
pub use error::{Result, StateError};
pub use maintenance::{StateFilter, Statistics};
pub use manager::{ManagerConfig, NewDocument, StateManager};
pub use results::{
    ChunkInfo, ExtractResult, FileBytes, ParserResult, SplitterResult, StageOutcome, StageResult,
    UpdateResult,
};
pub use store::{FileStore, MemoryStore, Namespace, RecordIds, RecordStore, StoreConfig};
pub use types::*;
