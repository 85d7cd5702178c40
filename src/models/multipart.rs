//! Multipart upload sessions and their parts, as persisted by the local
//! storage backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A multipart session opened by `create_multipart_upload`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartUpload {
    pub id: Uuid,

    pub bucket_id: Uuid,

    /// Destination key of the assembled object.
    pub key: String,

    /// Opaque id handed back to the caller.
    pub upload_id: String,

    /// Content type applied to the assembled object.
    pub content_type: Option<String>,

    /// User metadata serialized as a JSON object.
    pub metadata: String,

    pub initiated_at: DateTime<Utc>,

    /// Set once the session has been assembled. A completed session accepts
    /// no further parts, completion or abort.
    pub completed: bool,
}

impl MultipartUpload {
    /// Decode the stored user metadata. Malformed JSON decodes as empty.
    pub fn user_metadata(&self) -> BTreeMap<String, String> {
        serde_json::from_str(&self.metadata).unwrap_or_default()
    }
}

/// A part copied into a multipart session.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartPart {
    pub id: Uuid,

    /// Row id of the parent `MultipartUpload` (not the public upload id).
    pub upload_id: Uuid,

    /// 1-based part number.
    pub part_number: i32,

    pub size_bytes: i64,

    /// Hex md5 of the part payload.
    pub etag: String,

    pub uploaded_at: DateTime<Utc>,
}
