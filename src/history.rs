//! Tagged union of transfer-history detail shapes.
//!
//! History rows persist a free-form `details` blob; keeping it a tagged enum
//! (rather than an untyped map) gives consumers compile-time exhaustiveness
//! over the known operation kinds.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationDetails {
    Upload {
        file_id: i64,
        size: u64,
        parts: u32,
    },
    Download {
        file_id: i64,
        size: u64,
        via_scan: bool,
    },
    BatchUpload {
        job_id: i64,
        total: u32,
        completed: u32,
        failed: u32,
    },
    BatchDownload {
        job_id: i64,
        total: u32,
        completed: u32,
        failed: u32,
    },
    VisibilityChange {
        file_id: i64,
        public: bool,
    },
    Delete {
        file_id: i64,
    },
}

impl OperationDetails {
    /// Tag name, denormalized into its own column for cheap filtering.
    pub fn op_name(&self) -> &'static str {
        match self {
            OperationDetails::Upload { .. } => "upload",
            OperationDetails::Download { .. } => "download",
            OperationDetails::BatchUpload { .. } => "batch_upload",
            OperationDetails::BatchDownload { .. } => "batch_download",
            OperationDetails::VisibilityChange { .. } => "visibility_change",
            OperationDetails::Delete { .. } => "delete",
        }
    }

    pub fn file_id(&self) -> Option<i64> {
        match self {
            OperationDetails::Upload { file_id, .. }
            | OperationDetails::Download { file_id, .. }
            | OperationDetails::VisibilityChange { file_id, .. }
            | OperationDetails::Delete { file_id } => Some(*file_id),
            OperationDetails::BatchUpload { .. } | OperationDetails::BatchDownload { .. } => None,
        }
    }
}
