//! Service layer: the local storage backend and the multipart copy
//! orchestrator that drives it.

pub mod copy;
pub mod database;
pub mod storage_service;
