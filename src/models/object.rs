//! Object rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for the current version of an object. The payload itself lives
/// on disk; see `StorageService::object_path`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    pub id: Uuid,

    pub bucket_id: Uuid,

    /// Path-like key within the bucket.
    pub key: String,

    /// Last path segment of the key.
    pub filename: String,

    pub content_type: Option<String>,

    pub size_bytes: i64,

    /// Hex md5 of the payload for single uploads, or `md5-of-md5s-N` for
    /// objects assembled from N copied parts.
    pub etag: Option<String>,

    pub storage_class: String,

    pub last_modified: DateTime<Utc>,

    /// Version id assigned by the write that produced this row.
    pub version_id: Option<String>,

    pub is_deleted: bool,
}

impl Object {
    /// Payload length as an unsigned byte count.
    pub fn len(&self) -> u64 {
        u64::try_from(self.size_bytes).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.size_bytes <= 0
    }
}
