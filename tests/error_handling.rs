//! Error handling and edge case tests.

use ingest_state::{
    DocId, ExtractResult, MemoryStore, Namespace, NewDocument, ParserResult, ProcessStage,
    ProcessStatus, RecordIds, RecordStore, StateError, StateFilter, StateManager, StoreConfig,
};
use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

fn test_manager(dir: &TempDir) -> StateManager {
    StateManager::open(StoreConfig {
        path: dir.path().join("states"),
        ..Default::default()
    })
    .unwrap()
}

fn create(manager: &StateManager<impl RecordStore>, id: &str) -> DocId {
    manager
        .create_document_state(
            "a.pdf",
            NewDocument {
                doc_id: Some(DocId::from(id)),
                ..Default::default()
            },
        )
        .unwrap()
        .doc_id()
        .clone()
}

/// Memory store whose writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl RecordStore for FlakyStore {
    fn put(&self, namespace: Namespace, id: &str, bytes: &[u8]) -> ingest_state::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StateError::Io(io::Error::new(
                io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.put(namespace, id, bytes)
    }

    fn get(&self, namespace: Namespace, id: &str) -> ingest_state::Result<Option<Vec<u8>>> {
        self.inner.get(namespace, id)
    }

    fn delete(&self, namespace: Namespace, id: &str) -> ingest_state::Result<bool> {
        self.inner.delete(namespace, id)
    }

    fn list(&self, namespace: Namespace) -> ingest_state::Result<RecordIds<'_>> {
        self.inner.list(namespace)
    }

    fn size(&self, namespace: Namespace) -> ingest_state::Result<u64> {
        self.inner.size(namespace)
    }
}

// --- Missing Records ---

#[test]
fn test_transitions_on_missing_document() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);
    let ghost = DocId::from("ghost");

    assert!(matches!(
        manager.start_processing(&ghost),
        Err(StateError::DocumentNotFound(_))
    ));
    assert!(matches!(
        manager.update_extract_result(&ghost, ExtractResult::from_bytes(vec![1])),
        Err(StateError::DocumentNotFound(_))
    ));
    assert!(matches!(
        manager.mark_stage_failed(&ghost, ProcessStage::Parser, "x"),
        Err(StateError::DocumentNotFound(_))
    ));

    // Read paths report absence instead.
    assert!(manager.load_document_state(&ghost).unwrap().is_none());
    assert!(!manager.delete_document_state(&ghost).unwrap());
}

#[test]
fn test_load_missing_batch() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);

    let id = "nonexistent".into();
    assert!(manager.load_batch_state(&id).unwrap().is_none());
    assert!(matches!(
        manager.require_batch_state(&id),
        Err(StateError::BatchNotFound(_))
    ));
}

// --- Corrupt Records ---

#[test]
fn test_corrupt_record_reported_on_load() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);
    let id = create(&manager, "doc-1");

    fs::write(dir.path().join("states/documents/doc-1.json"), b"{\"doc_id\": ").unwrap();

    assert!(matches!(
        manager.load_document_state(&id),
        Err(StateError::Persistence(_))
    ));
    // Mutations surface it rather than overwriting the record.
    assert!(matches!(
        manager.start_processing(&id),
        Err(StateError::Persistence(_))
    ));
}

#[test]
fn test_corruption_after_cached_read_is_reported() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);
    let id = create(&manager, "doc-1");
    manager.start_processing(&id).unwrap();
    assert!(manager.load_document_state(&id).unwrap().is_some());

    fs::write(dir.path().join("states/documents/doc-1.json"), b"{\"doc_id\": ").unwrap();

    assert!(matches!(
        manager.load_document_state(&id),
        Err(StateError::Persistence(_))
    ));
    let stats = manager.get_statistics().unwrap();
    assert_eq!(stats.total_documents, 0);
}

#[test]
fn test_bad_stage_tag_is_validation_error() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);
    let id = create(&manager, "doc-1");

    let path = dir.path().join("states/documents/doc-1.json");
    let text = fs::read_to_string(&path).unwrap();
    fs::write(&path, text.replace("\"extract\"", "\"indexing\"")).unwrap();

    assert!(matches!(
        manager.load_document_state(&id),
        Err(StateError::Validation(_))
    ));
}

#[test]
fn test_listing_survives_corrupt_records() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);
    create(&manager, "good-1");
    create(&manager, "good-2");
    create(&manager, "bad");

    fs::write(dir.path().join("states/documents/bad.json"), b"garbage").unwrap();

    let states = manager.list_document_states(StateFilter::default()).unwrap();
    assert_eq!(states.len(), 2);

    let stats = manager.get_statistics().unwrap();
    assert_eq!(stats.total_documents, 2);
    assert_eq!(stats.by_status[&ProcessStatus::Pending], 2);
}

#[test]
fn test_cleanup_survives_corrupt_records() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);
    create(&manager, "bad");
    fs::write(dir.path().join("states/documents/bad.json"), b"garbage").unwrap();

    assert_eq!(manager.cleanup_completed(0).unwrap(), 0);
    assert!(dir.path().join("states/documents/bad.json").exists());
}

// --- Write Failures ---

#[test]
fn test_failed_write_aborts_mutation() {
    let manager = StateManager::new(FlakyStore::default());
    let id = create(&manager, "doc-1");

    manager.store().fail_writes.store(true, Ordering::SeqCst);
    let result = manager.update_extract_result(&id, ExtractResult::from_bytes(vec![1]));
    assert!(matches!(result, Err(StateError::Io(_))));

    manager.store().fail_writes.store(false, Ordering::SeqCst);
    let state = manager.load_document_state(&id).unwrap().unwrap();
    assert_eq!(state.current_stage(), ProcessStage::Extract);
    assert!(state.extract_result().is_none());
}

#[test]
fn test_failed_save_keeps_updated_at() {
    let manager = StateManager::new(FlakyStore::default());
    let mut state = manager
        .create_document_state("a.pdf", NewDocument::default())
        .unwrap();
    let before = state.updated_at();

    manager.store().fail_writes.store(true, Ordering::SeqCst);
    assert!(manager.save_document_state(&mut state).is_err());
    assert_eq!(state.updated_at(), before);
}

#[test]
fn test_failed_create_leaves_nothing_behind() {
    let store = FlakyStore::default();
    store.fail_writes.store(true, Ordering::SeqCst);
    let manager = StateManager::new(store);

    assert!(manager
        .create_document_state("a.pdf", NewDocument::default())
        .is_err());
    assert!(manager
        .list_document_states(StateFilter::default())
        .unwrap()
        .is_empty());
}

// --- Invalid Transitions ---

#[test]
fn test_completed_document_rejects_changes() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);
    let id = create(&manager, "doc-1");

    manager
        .update_extract_result(&id, ExtractResult::from_bytes(vec![1]))
        .unwrap();
    manager
        .update_parser_result(
            &id,
            ParserResult {
                status: ProcessStatus::Success,
                ..Default::default()
            },
        )
        .unwrap();
    manager
        .update_splitter_result(&id, ingest_state::SplitterResult::new(Vec::new()))
        .unwrap();
    manager
        .update_update_result(
            &id,
            ingest_state::UpdateResult {
                status: ProcessStatus::Success,
                ..Default::default()
            },
        )
        .unwrap();

    assert!(matches!(
        manager.start_processing(&id),
        Err(StateError::InvalidTransition { .. })
    ));
    assert!(matches!(
        manager.mark_stage_failed(&id, ProcessStage::Update, "late"),
        Err(StateError::InvalidTransition { .. })
    ));
    assert!(manager.load_document_state(&id).unwrap().unwrap().is_completed());
}

#[test]
fn test_skipping_a_stage_is_rejected() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);
    let id = create(&manager, "doc-1");

    let result = manager.update_parser_result(&id, ParserResult::default());
    assert!(matches!(
        result,
        Err(StateError::InvalidTransition {
            from: ProcessStage::Extract,
            ..
        })
    ));
}

#[test]
fn test_fail_completed_stage_is_validation_error() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);
    let id = create(&manager, "doc-1");

    assert!(matches!(
        manager.mark_stage_failed(&id, ProcessStage::Completed, "x"),
        Err(StateError::Validation(_))
    ));
    assert_eq!(manager.load_document_state(&id).unwrap().unwrap().retry_count(), 0);
}

// --- Store Errors ---

#[test]
fn test_concurrent_store_access() {
    let dir = TempDir::new().unwrap();
    let _first = test_manager(&dir);

    let second = StateManager::open(StoreConfig {
        path: dir.path().join("states"),
        ..Default::default()
    });
    assert!(matches!(second, Err(StateError::Locked)));
}

#[test]
fn test_path_traversal_id_rejected() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);

    let result = manager.create_document_state(
        "a.pdf",
        NewDocument {
            doc_id: Some(DocId::from("../outside")),
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(StateError::InvalidId(_))));
    assert!(!dir.path().join("outside.json").exists());
}

#[test]
fn test_unicode_doc_id() {
    let dir = TempDir::new().unwrap();
    let manager = test_manager(&dir);
    let id = create(&manager, "文档_🎉_данные");

    manager.start_processing(&id).unwrap();
    let state = manager.load_document_state(&id).unwrap().unwrap();
    assert_eq!(state.doc_id(), &id);
}
