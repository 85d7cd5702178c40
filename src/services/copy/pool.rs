//! Fixed-size pool of part-copy workers.

use crate::{
    models::copy::{CompletedPart, CopySource, SseCustomerOptions},
    services::copy::{client::StorageClient, error::CopyError, queue::PartQueue},
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info_span, warn};

/// What the pool hands back once every worker has exited.
#[derive(Debug, Default)]
pub struct PoolOutcome {
    /// Parts copied successfully, in completion order.
    pub completed: Vec<CompletedPart>,
    /// The first worker error observed, if any.
    pub error: Option<CopyError>,
}

/// Runs `worker_count` tasks against one shared `PartQueue`.
#[derive(Clone, Copy, Debug)]
pub struct CopyWorkerPool {
    worker_count: usize,
}

struct WorkerContext {
    client: Arc<dyn StorageClient>,
    queue: Arc<PartQueue>,
    source: CopySource,
    sse: SseCustomerOptions,
}

#[derive(Default)]
struct WorkerReport {
    completed: Vec<CompletedPart>,
    error: Option<CopyError>,
}

impl CopyWorkerPool {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Drain `queue` and wait for every worker to exit.
    ///
    /// A failing worker clears the queue so the others stop after their
    /// in-flight call. When several workers fail, whichever error is joined
    /// first is reported.
    pub async fn run(
        &self,
        client: Arc<dyn StorageClient>,
        queue: Arc<PartQueue>,
        source: CopySource,
        sse: SseCustomerOptions,
    ) -> PoolOutcome {
        let ctx = Arc::new(WorkerContext {
            client,
            queue: Arc::clone(&queue),
            source,
            sse,
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..self.worker_count {
            let ctx = Arc::clone(&ctx);
            workers.spawn(copy_worker(ctx).instrument(info_span!("copy_worker", worker_id)));
        }

        let mut outcome = PoolOutcome::default();
        while let Some(joined) = workers.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(err) => {
                    queue.clear();
                    warn!("copy worker did not finish: {}", err);
                    WorkerReport {
                        completed: Vec::new(),
                        error: Some(CopyError::Worker(err.to_string())),
                    }
                }
            };
            outcome.completed.extend(report.completed);
            if outcome.error.is_none() {
                outcome.error = report.error;
            }
        }

        outcome
    }
}

async fn copy_worker(ctx: Arc<WorkerContext>) -> WorkerReport {
    let mut report = WorkerReport::default();

    while let Some(job) = ctx.queue.shift() {
        debug!(part_number = job.part_number, range = %job.range, "copying part");
        match ctx.client.copy_part(&job, &ctx.source, &ctx.sse).await {
            Ok(etag) => {
                debug!(part_number = job.part_number, %etag, "part copied");
                report.completed.push(CompletedPart {
                    part_number: job.part_number,
                    etag,
                });
            }
            Err(err) => {
                let discarded = ctx.queue.clear();
                warn!(
                    part_number = job.part_number,
                    discarded, "part copy failed, draining queue: {}", err
                );
                report.error = Some(CopyError::PartCopyFailed {
                    part_number: job.part_number,
                    source: err,
                });
                break;
            }
        }
    }

    report
}
