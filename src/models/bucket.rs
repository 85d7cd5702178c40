//! Bucket rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A namespace for objects, as stored in the `buckets` table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    pub id: Uuid,

    /// DNS-style bucket name, unique across the store.
    pub name: String,

    pub owner_id: Uuid,

    /// Normalized (lowercase) region name.
    pub region: String,

    pub created_at: DateTime<Utc>,

    /// Recorded for S3 compatibility. Every write gets a version id either
    /// way; only the latest version of a key is retained.
    pub versioning_enabled: bool,
}
