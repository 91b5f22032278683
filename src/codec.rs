//! Record encoding.
//!
//! Records are indented JSON so they stay human-diffable on disk. Decoding
//! separates records that are unreadable (truncated, not JSON) from records
//! that parse but carry a bad tag or shape.

use crate::error::{Result, StateError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::error::Category;

/// File extension of encoded records.
pub const RECORD_EXTENSION: &str = "json";

/// Encode a record.
pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(record)?)
}

/// Decode a record. `id` is only used for error context.
pub fn decode<T: DeserializeOwned>(id: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| match e.classify() {
        Category::Data => StateError::Validation(format!("{}: {}", id, e)),
        Category::Io | Category::Syntax | Category::Eof => {
            StateError::Persistence(format!("corrupt record {}: {}", id, e))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProcessStage;

    #[test]
    fn test_encoding_is_indented() {
        let bytes = encode(&serde_json::json!({"stage": "parser"})).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\n  \"stage\""));
    }

    #[test]
    fn test_truncated_record_is_persistence_error() {
        let err = decode::<serde_json::Value>("doc-1", b"{\"stage\": ").unwrap_err();
        assert!(matches!(err, StateError::Persistence(_)));
    }

    #[test]
    fn test_bad_tag_is_validation_error() {
        let err = decode::<ProcessStage>("doc-1", b"\"indexing\"").unwrap_err();
        assert!(matches!(err, StateError::Validation(_)));
    }
}
