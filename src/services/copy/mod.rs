//! Concurrent multipart object copy.
//!
//! ```text
//! CopyOrchestrator ── check_sse ── head ──> size ── PartPlan ── initiate ──> UploadSession
//!        │                                                                        │
//!        └── CopyWorkerPool (N tasks) <── PartQueue <── PartJobs <────────────────┘
//!                     │
//!                     └── CompletedParts ── sort ── complete | abort
//! ```
//!
//! Every session that is initiated is retired by exactly one `complete` or
//! `abort`, even when the caller drops the `copy` future early.

pub mod client;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod queue;

pub use client::StorageClient;
pub use error::CopyError;
pub use orchestrator::CopyOrchestrator;
pub use planner::PartPlan;
pub use pool::{CopyWorkerPool, PoolOutcome};
pub use queue::PartQueue;
