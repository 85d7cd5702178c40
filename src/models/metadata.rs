//! User metadata (`x-amz-meta-*`) attached to objects.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One user metadata pair. Keys are stored without the `x-amz-meta-` prefix.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub id: Uuid,

    pub object_id: Uuid,

    pub key: String,

    pub value: String,
}
