//! Routes for the bucket and object operations.
//!
//! - `PUT  /{bucket}`: create bucket
//! - `PUT  /{bucket}/{*key}`: upload object, or server-side copy when
//!   `x-amz-copy-source` is set
//! - `GET  /{bucket}/{*key}`: download object (`?versionId=` optional)
//! - `HEAD /{bucket}/{*key}`: object headers only
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    AppState,
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{create_bucket, get_object, head_object, put_object},
    },
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build the router; callers attach `AppState` with `with_state`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/{bucket}/{*key}",
            put(put_object).get(get_object).head(head_object),
        )
        .route("/{bucket}", put(create_bucket))
}
