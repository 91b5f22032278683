//! State manager: persistence and transitions for documents and batches.

use crate::batch::BatchProcessState;
use crate::codec;
use crate::document::{DocumentState, DEFAULT_MAX_RETRIES};
use crate::error::{Result, StateError};
use crate::results::{ExtractResult, ParserResult, SplitterResult, StageOutcome, UpdateResult};
use crate::store::{FileStore, Namespace, RecordStore, StoreConfig};
use crate::types::{BatchId, DocId, FileDescriptor, Metadata, ProcessStage};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Manager configuration.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Retry budget given to newly created documents.
    pub max_retries: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Optional inputs for [`StateManager::create_document_state`].
#[derive(Clone, Debug, Default)]
pub struct NewDocument {
    /// Defaults to the file name of the path.
    pub file_name: Option<String>,
    /// Defaults to a generated id.
    pub doc_id: Option<DocId>,
    pub metadata: Metadata,
    pub tags: Vec<String>,
}

/// Number of lock stripes shared by all document ids.
const LOCK_STRIPES: usize = 64;

/// Owns all mutation of document and batch state records.
///
/// Every load-mutate-persist cycle on a document runs under the lock stripe
/// its id hashes to, so concurrent callers in one process cannot interleave
/// on the same record. Documents on different stripes proceed independently.
pub struct StateManager<S: RecordStore = FileStore> {
    store: S,
    config: ManagerConfig,
    doc_locks: Box<[Mutex<()>]>,
    hasher: RandomState,
}

impl StateManager<FileStore> {
    /// Open a file-backed manager.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let path = config.path.clone();
        let manager = Self::new(FileStore::open(config)?);
        info!(path = %path.display(), "state manager opened");
        Ok(manager)
    }
}

impl<S: RecordStore> StateManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, ManagerConfig::default())
    }

    pub fn with_config(store: S, config: ManagerConfig) -> Self {
        Self {
            store,
            config,
            doc_locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn lock_doc(&self, doc_id: &DocId) -> MutexGuard<'_, ()> {
        let stripe = self.hasher.hash_one(doc_id) as usize % self.doc_locks.len();
        self.doc_locks[stripe].lock()
    }

    // --- Document records ---

    /// Create and persist a pending document for the file at `file_path`.
    pub fn create_document_state(
        &self,
        file_path: impl AsRef<Path>,
        options: NewDocument,
    ) -> Result<DocumentState> {
        let mut file = FileDescriptor::probe(file_path);
        if let Some(name) = options.file_name {
            file.name = name;
        }

        let doc_id = options.doc_id.unwrap_or_else(DocId::generate);
        let _guard = self.lock_doc(&doc_id);

        if self
            .store
            .get(Namespace::Documents, doc_id.as_str())?
            .is_some()
        {
            return Err(StateError::AlreadyExists(doc_id.to_string()));
        }

        let mut state = DocumentState::new(doc_id, file);
        state.max_retries = self.config.max_retries;
        state.metadata = options.metadata;
        for tag in options.tags {
            state.add_tag(tag);
        }

        self.save_document_state(&mut state)?;
        info!(
            doc_id = %state.doc_id(),
            file_name = %state.file.name,
            "created document state"
        );
        Ok(state)
    }

    /// Persist `state`, refreshing its `updated_at`.
    ///
    /// On failure the record on disk and `state.updated_at()` are unchanged.
    pub fn save_document_state(&self, state: &mut DocumentState) -> Result<()> {
        let previous = state.updated_at();
        state.touch(Utc::now());

        let written = codec::encode(&*state).and_then(|bytes| {
            self.store
                .put(Namespace::Documents, state.doc_id().as_str(), &bytes)
        });

        match written {
            Ok(()) => {
                debug!(doc_id = %state.doc_id(), "saved document state");
                Ok(())
            }
            Err(e) => {
                state.touch(previous);
                error!(doc_id = %state.doc_id(), error = %e, "failed to save document state");
                Err(e)
            }
        }
    }

    /// Load a document; `None` when no record exists.
    ///
    /// Unreadable or malformed records are errors, not absences.
    pub fn load_document_state(&self, doc_id: &DocId) -> Result<Option<DocumentState>> {
        let Some(bytes) = self.store.get(Namespace::Documents, doc_id.as_str())? else {
            warn!(doc_id = %doc_id, "document state not found");
            return Ok(None);
        };

        let state: DocumentState = codec::decode(doc_id.as_str(), &bytes)?;
        if state.doc_id() != doc_id {
            return Err(StateError::Validation(format!(
                "record {} holds document {}",
                doc_id,
                state.doc_id()
            )));
        }

        debug!(doc_id = %doc_id, "loaded document state");
        Ok(Some(state))
    }

    /// Delete a document record, returning whether it existed.
    pub fn delete_document_state(&self, doc_id: &DocId) -> Result<bool> {
        let deleted = {
            let _guard = self.lock_doc(doc_id);
            self.store.delete(Namespace::Documents, doc_id.as_str())?
        };

        if deleted {
            info!(doc_id = %doc_id, "deleted document state");
        } else {
            warn!(doc_id = %doc_id, "document state not found for deletion");
        }
        Ok(deleted)
    }

    /// Load, mutate and persist a document under its lock.
    fn mutate<F>(&self, doc_id: &DocId, op: F) -> Result<DocumentState>
    where
        F: FnOnce(&mut DocumentState, DateTime<Utc>) -> Result<()>,
    {
        let _guard = self.lock_doc(doc_id);

        let mut state = self
            .load_document_state(doc_id)?
            .ok_or_else(|| StateError::DocumentNotFound(doc_id.clone()))?;
        op(&mut state, Utc::now())?;
        self.save_document_state(&mut state)?;
        Ok(state)
    }

    // --- Transitions ---

    /// Mark a document as processing.
    pub fn start_processing(&self, doc_id: &DocId) -> Result<DocumentState> {
        let state = self.mutate(doc_id, |state, now| state.start(now))?;
        info!(doc_id = %doc_id, "started processing document");
        Ok(state)
    }

    fn apply_result<R: StageOutcome>(&self, doc_id: &DocId, result: R) -> Result<DocumentState> {
        let status = result.status();
        let state = self.mutate(doc_id, |state, now| state.apply_result(result, now))?;

        if state.is_failed() {
            warn!(
                doc_id = %doc_id,
                stage = %R::STAGE,
                status = %status,
                "stage result recorded a failure"
            );
        } else {
            info!(
                doc_id = %doc_id,
                stage = %R::STAGE,
                status = %status,
                next = %state.current_stage(),
                "updated stage result"
            );
        }
        Ok(state)
    }

    pub fn update_extract_result(
        &self,
        doc_id: &DocId,
        result: ExtractResult,
    ) -> Result<DocumentState> {
        self.apply_result(doc_id, result)
    }

    pub fn update_parser_result(
        &self,
        doc_id: &DocId,
        result: ParserResult,
    ) -> Result<DocumentState> {
        self.apply_result(doc_id, result)
    }

    pub fn update_splitter_result(
        &self,
        doc_id: &DocId,
        result: SplitterResult,
    ) -> Result<DocumentState> {
        self.apply_result(doc_id, result)
    }

    /// Record the update result; success is the only way to complete a document.
    pub fn update_update_result(
        &self,
        doc_id: &DocId,
        result: UpdateResult,
    ) -> Result<DocumentState> {
        self.apply_result(doc_id, result)
    }

    /// Explicitly fail `stage`, consuming one retry.
    ///
    /// Failed stage results recorded through the `update_*_result` calls do
    /// not consume retries; only this call does.
    pub fn mark_stage_failed(
        &self,
        doc_id: &DocId,
        stage: ProcessStage,
        message: &str,
    ) -> Result<DocumentState> {
        let state = self.mutate(doc_id, |state, now| state.fail_stage(stage, message, now))?;
        error!(
            doc_id = %doc_id,
            stage = %stage,
            retry_count = state.retry_count(),
            error = message,
            "marked stage as failed"
        );
        Ok(state)
    }

    // --- Batch records ---

    /// Create and persist an empty batch.
    pub fn create_batch_state(
        &self,
        batch_name: Option<&str>,
        batch_id: Option<BatchId>,
    ) -> Result<BatchProcessState> {
        let batch_id = batch_id.unwrap_or_else(BatchId::generate);
        let batch_name = batch_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Batch_{}", Utc::now().format("%Y%m%d_%H%M%S")));

        let mut batch = BatchProcessState::new(batch_id, Some(batch_name));
        self.save_batch_state(&mut batch)?;
        info!(batch_id = %batch.batch_id(), "created batch state");
        Ok(batch)
    }

    /// Recompute counters and persist the batch.
    pub fn save_batch_state(&self, batch: &mut BatchProcessState) -> Result<()> {
        batch.recompute();

        let bytes = codec::encode(&*batch)?;
        if let Err(e) = self
            .store
            .put(Namespace::Batches, batch.batch_id().as_str(), &bytes)
        {
            error!(batch_id = %batch.batch_id(), error = %e, "failed to save batch state");
            return Err(e);
        }

        debug!(
            batch_id = %batch.batch_id(),
            total = batch.total_count(),
            "saved batch state"
        );
        Ok(())
    }

    /// Load a batch; `None` when no record exists.
    pub fn load_batch_state(&self, batch_id: &BatchId) -> Result<Option<BatchProcessState>> {
        let Some(bytes) = self.store.get(Namespace::Batches, batch_id.as_str())? else {
            warn!(batch_id = %batch_id, "batch state not found");
            return Ok(None);
        };

        let mut batch: BatchProcessState = codec::decode(batch_id.as_str(), &bytes)?;
        batch.recount();
        debug!(batch_id = %batch_id, "loaded batch state");
        Ok(Some(batch))
    }

    /// Load a batch that must exist.
    pub fn require_batch_state(&self, batch_id: &BatchId) -> Result<BatchProcessState> {
        self.load_batch_state(batch_id)?
            .ok_or_else(|| StateError::BatchNotFound(batch_id.clone()))
    }

    pub fn delete_batch_state(&self, batch_id: &BatchId) -> Result<bool> {
        let deleted = self.store.delete(Namespace::Batches, batch_id.as_str())?;
        if deleted {
            info!(batch_id = %batch_id, "deleted batch state");
        }
        Ok(deleted)
    }

    /// Ids of every stored batch, sorted.
    pub fn list_batch_ids(&self) -> Result<Vec<BatchId>> {
        let mut ids = self
            .store
            .list(Namespace::Batches)?
            .map(|id| id.map(BatchId::from))
            .collect::<Result<Vec<_>>>()?;
        ids.sort();
        Ok(ids)
    }

    /// Replace every snapshot in `batch` with the current document record.
    ///
    /// Snapshots whose record was deleted are dropped; snapshots whose record
    /// cannot be read are kept as they are. Returns the number dropped.
    pub fn refresh_batch(&self, batch: &mut BatchProcessState) -> usize {
        let mut refreshed = Vec::with_capacity(batch.doc_states().len());
        let mut dropped = 0;

        for snapshot in batch.doc_states() {
            match self.load_document_state(snapshot.doc_id()) {
                Ok(Some(current)) => refreshed.push(current),
                Ok(None) => dropped += 1,
                Err(e) => {
                    error!(
                        batch_id = %batch.batch_id(),
                        doc_id = %snapshot.doc_id(),
                        error = %e,
                        "keeping stale snapshot"
                    );
                    refreshed.push(snapshot.clone());
                }
            }
        }

        batch.replace_documents(refreshed);
        dropped
    }
}
