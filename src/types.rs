//! Core types for pipeline state tracking.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

/// Free-form metadata attached to documents, results and chunks.
///
/// Values are restricted to the JSON value kinds; the typed fields of the
/// owning entity never live in here.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A step of the ingestion pipeline.
///
/// Variant order is the pipeline order, so `Extract < Parser < ... < Completed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStage {
    Extract,
    Parser,
    Splitter,
    Update,
    /// Sentinel reached only after a successful update stage.
    Completed,
}

impl ProcessStage {
    /// Every stage, in pipeline order.
    pub const ALL: [ProcessStage; 5] = [
        ProcessStage::Extract,
        ProcessStage::Parser,
        ProcessStage::Splitter,
        ProcessStage::Update,
        ProcessStage::Completed,
    ];

    /// The stages that produce a result.
    pub const PIPELINE: [ProcessStage; 4] = [
        ProcessStage::Extract,
        ProcessStage::Parser,
        ProcessStage::Splitter,
        ProcessStage::Update,
    ];

    /// The stage following this one.
    pub fn next(self) -> Option<Self> {
        match self {
            ProcessStage::Extract => Some(ProcessStage::Parser),
            ProcessStage::Parser => Some(ProcessStage::Splitter),
            ProcessStage::Splitter => Some(ProcessStage::Update),
            ProcessStage::Update => Some(ProcessStage::Completed),
            ProcessStage::Completed => None,
        }
    }

    /// Wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStage::Extract => "extract",
            ProcessStage::Parser => "parser",
            ProcessStage::Splitter => "splitter",
            ProcessStage::Update => "update",
            ProcessStage::Completed => "completed",
        }
    }
}

impl fmt::Display for ProcessStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a document as a whole, or of a single stage result.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    #[default]
    Pending,
    Processing,
    Success,
    Failed,
    Skipped,
}

impl ProcessStatus {
    pub const ALL: [ProcessStatus; 5] = [
        ProcessStatus::Pending,
        ProcessStatus::Processing,
        ProcessStatus::Success,
        ProcessStatus::Failed,
        ProcessStatus::Skipped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Pending => "pending",
            ProcessStatus::Processing => "processing",
            ProcessStatus::Success => "success",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-sortable, collision-resistant id: `<prefix>_<UTC timestamp>_<8 hex>`.
fn generate_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        prefix,
        Utc::now().format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh id.
            pub fn generate() -> Self {
                $name(generate_id($prefix))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique identifier for a document state.
    DocId,
    "doc"
);

string_id!(
    /// Unique identifier for a batch state.
    BatchId,
    "batch"
);

/// The file a document state tracks.
///
/// Field names are prefixed on the wire because the descriptor is flattened
/// into the document record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    #[serde(rename = "file_name")]
    pub name: String,
    #[serde(rename = "file_path")]
    pub path: String,
    /// Extension without the leading dot, e.g. `pdf`.
    #[serde(rename = "file_type")]
    pub file_type: String,
    /// Size in bytes; 0 when the file was absent at creation time.
    #[serde(rename = "file_size")]
    pub size: u64,
}

impl FileDescriptor {
    /// Describe the file at `path`, probing the filesystem for its size.
    pub fn probe(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_string_lossy().into_owned(),
            file_type: path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size,
        }
    }
}
