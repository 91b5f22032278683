//! Listing, statistics and retention cleanup.
//!
//! Everything here scans the full document namespace and filters in memory;
//! there is no secondary index. Records that fail to load are logged and
//! skipped so one corrupt file does not take a listing down.

use crate::document::DocumentState;
use crate::error::Result;
use crate::manager::StateManager;
use crate::store::{Namespace, RecordStore};
use crate::types::{DocId, ProcessStage, ProcessStatus};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info};

/// Filters for [`StateManager::list_document_states`]; `None` matches all.
#[derive(Clone, Copy, Debug, Default)]
pub struct StateFilter {
    pub status: Option<ProcessStatus>,
    pub stage: Option<ProcessStage>,
}

impl StateFilter {
    pub fn status(status: ProcessStatus) -> Self {
        Self {
            status: Some(status),
            stage: None,
        }
    }

    pub fn stage(stage: ProcessStage) -> Self {
        Self {
            status: None,
            stage: Some(stage),
        }
    }

    pub fn matches(&self, state: &DocumentState) -> bool {
        self.status.map_or(true, |s| state.overall_status() == s)
            && self.stage.map_or(true, |s| state.current_stage() == s)
    }
}

/// Snapshot of the document namespace.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total_documents: usize,
    /// Every status, zero counts included.
    pub by_status: BTreeMap<ProcessStatus, usize>,
    /// Every stage, zero counts included.
    pub by_stage: BTreeMap<ProcessStage, usize>,
    /// Bytes used by document and batch records.
    pub storage_size_bytes: u64,
}

impl Statistics {
    pub fn storage_size_mb(&self) -> f64 {
        self.storage_size_bytes as f64 / (1024.0 * 1024.0)
    }
}

impl<S: RecordStore> StateManager<S> {
    /// Every readable document record, in store order.
    fn scan_documents(&self) -> Result<impl Iterator<Item = DocumentState> + '_> {
        let ids = self.store().list(Namespace::Documents)?;

        Ok(ids.filter_map(move |id| {
            let id = match id {
                Ok(id) => DocId::from(id),
                Err(e) => {
                    error!(error = %e, "failed to list document state");
                    return None;
                }
            };
            match self.load_document_state(&id) {
                Ok(state) => state,
                Err(e) => {
                    error!(doc_id = %id, error = %e, "skipping unreadable document state");
                    None
                }
            }
        }))
    }

    /// Documents matching `filter`, oldest first.
    pub fn list_document_states(&self, filter: StateFilter) -> Result<Vec<DocumentState>> {
        let mut states: Vec<_> = self
            .scan_documents()?
            .filter(|state| filter.matches(state))
            .collect();
        states.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.doc_id().cmp(b.doc_id()))
        });
        Ok(states)
    }

    /// Failed documents that still have retries left.
    pub fn retryable_documents(&self) -> Result<Vec<DocumentState>> {
        let mut states = self.list_document_states(StateFilter::status(ProcessStatus::Failed))?;
        states.retain(DocumentState::can_retry);
        Ok(states)
    }

    pub fn get_statistics(&self) -> Result<Statistics> {
        let mut stats = Statistics {
            by_status: ProcessStatus::ALL.iter().map(|s| (*s, 0)).collect(),
            by_stage: ProcessStage::ALL.iter().map(|s| (*s, 0)).collect(),
            storage_size_bytes: self.store().total_size()?,
            ..Default::default()
        };

        for state in self.scan_documents()? {
            stats.total_documents += 1;
            *stats.by_status.entry(state.overall_status()).or_default() += 1;
            *stats.by_stage.entry(state.current_stage()).or_default() += 1;
        }

        Ok(stats)
    }

    /// Delete completed documents finished more than `keep_days` ago.
    ///
    /// A retention window reaching past the representable calendar keeps
    /// everything.
    pub fn cleanup_completed(&self, keep_days: u32) -> Result<usize> {
        let cutoff = Duration::try_days(i64::from(keep_days))
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted = self.cleanup_completed_before(cutoff)?;
        info!(deleted, keep_days, "cleaned up completed document states");
        Ok(deleted)
    }

    /// Delete completed documents whose `completed_at` is before `cutoff`.
    ///
    /// Best effort: a failed deletion is logged and the sweep continues.
    /// Returns the number of confirmed deletions. Batches are never touched.
    pub fn cleanup_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<DocId> = self
            .scan_documents()?
            .filter(|state| state.is_completed())
            .filter(|state| state.completed_at.is_some_and(|done| done < cutoff))
            .map(|state| state.doc_id().clone())
            .collect();

        let mut deleted = 0;
        for doc_id in expired {
            match self.delete_document_state(&doc_id) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => error!(doc_id = %doc_id, error = %e, "failed to delete expired state"),
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::NewDocument;
    use crate::results::ParserResult;
    use crate::store::MemoryStore;

    fn manager_with(ids: &[&str]) -> StateManager<MemoryStore> {
        let manager = StateManager::new(MemoryStore::new());
        for id in ids {
            manager
                .create_document_state(
                    format!("{}.pdf", id),
                    NewDocument {
                        doc_id: Some(DocId::from(*id)),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        manager
    }

    #[test]
    fn test_filter_matches() {
        let manager = manager_with(&["a", "b", "c"]);
        manager.start_processing(&DocId::from("b")).unwrap();

        let processing = manager
            .list_document_states(StateFilter::status(ProcessStatus::Processing))
            .unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].doc_id().as_str(), "b");

        let at_extract = manager
            .list_document_states(StateFilter::stage(ProcessStage::Extract))
            .unwrap();
        assert_eq!(at_extract.len(), 3);

        let none = manager
            .list_document_states(StateFilter {
                status: Some(ProcessStatus::Processing),
                stage: Some(ProcessStage::Parser),
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_listing_skips_corrupt_records() {
        let manager = manager_with(&["a", "b"]);
        manager
            .store()
            .put(Namespace::Documents, "broken", b"{ not json")
            .unwrap();

        let all = manager.list_document_states(StateFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_statistics() {
        let manager = manager_with(&["a", "b"]);
        let a = DocId::from("a");
        manager
            .update_extract_result(&a, crate::results::ExtractResult::from_bytes(vec![1]))
            .unwrap();
        manager
            .update_parser_result(&a, ParserResult::failed("bad pdf"))
            .unwrap();

        let stats = manager.get_statistics().unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.by_status[&ProcessStatus::Failed], 1);
        assert_eq!(stats.by_status[&ProcessStatus::Pending], 1);
        assert_eq!(stats.by_status[&ProcessStatus::Success], 0);
        assert_eq!(stats.by_stage[&ProcessStage::Parser], 1);
        assert_eq!(stats.by_stage[&ProcessStage::Completed], 0);
        assert!(stats.storage_size_bytes > 0);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["by_status"]["failed"], 1);
    }

    #[test]
    fn test_retryable_documents() {
        let manager = manager_with(&["a", "b"]);
        let a = DocId::from("a");
        let b = DocId::from("b");
        manager.mark_stage_failed(&a, ProcessStage::Extract, "io").unwrap();
        for _ in 0..3 {
            manager.mark_stage_failed(&b, ProcessStage::Extract, "io").unwrap();
        }

        let retryable = manager.retryable_documents().unwrap();
        assert_eq!(retryable.len(), 1);
        assert_eq!(retryable[0].doc_id(), &a);
    }

    #[test]
    fn test_cleanup_ignores_unfinished_documents() {
        let manager = manager_with(&["a"]);
        let future = Utc::now() + Duration::days(365);
        assert_eq!(manager.cleanup_completed_before(future).unwrap(), 0);
        assert_eq!(manager.list_document_states(StateFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_with_unbounded_retention() {
        let manager = manager_with(&["a"]);
        let a = DocId::from("a");
        manager
            .update_extract_result(&a, crate::results::ExtractResult::from_bytes(vec![1]))
            .unwrap();
        manager
            .update_parser_result(&a, ParserResult { status: ProcessStatus::Success, ..Default::default() })
            .unwrap();
        manager
            .update_splitter_result(&a, crate::results::SplitterResult::new(Vec::new()))
            .unwrap();
        manager
            .update_update_result(
                &a,
                crate::results::UpdateResult { status: ProcessStatus::Success, ..Default::default() },
            )
            .unwrap();

        assert_eq!(manager.cleanup_completed(u32::MAX).unwrap(), 0);
        assert!(manager.load_document_state(&a).unwrap().unwrap().is_completed());

        let later = Utc::now() + Duration::seconds(1);
        assert_eq!(manager.cleanup_completed_before(later).unwrap(), 1);
    }
}
