//! Data model for the object store and the multipart copy protocol.
//!
//! Persistence rows (`bucket`, `object`, `metadata`, `multipart`) map to
//! SQLite tables through `sqlx::FromRow`. The `copy` module holds the typed
//! request/session/part values that flow through the copy orchestrator.

pub mod bucket;
pub mod copy;
pub mod metadata;
pub mod multipart;
pub mod object;
