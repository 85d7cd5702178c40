//! Local S3-like object store whose server-side copies run as concurrent
//! multipart copies.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use models::copy::CopyOptions;
use services::{copy::CopyOrchestrator, storage_service::StorageService};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub copier: CopyOrchestrator,
    pub copy_options: CopyOptions,
}

impl AppState {
    /// Wire a copier that drives `storage` itself.
    pub fn new(storage: StorageService, copy_options: CopyOptions) -> Self {
        let copier = CopyOrchestrator::new(Arc::new(storage.clone()));
        Self {
            storage,
            copier,
            copy_options,
        }
    }
}
