//! Drives one multipart copy from sizing to completion or abort.

use crate::{
    models::copy::{
        CompletedPart, CopyRequest, CopyResult, CopySource, InitiateOptions, ObjectLocation,
        SseCustomerOptions, UploadSession,
    },
    services::copy::{
        client::StorageClient, error::CopyError, planner::PartPlan, pool::CopyWorkerPool,
        queue::PartQueue,
    },
};
use std::sync::Arc;
use tracing::{Instrument, Span, debug, info, instrument, warn};

/// Copies objects through an initiate / copy parts / complete protocol.
///
/// Encryption checks, sizing and planning happen before the session exists,
/// so a request that is refused, cannot be sized or is too small leaves
/// nothing behind. From `initiate` onwards the protocol runs on its own task:
/// dropping the `copy` future (a client disconnect, a timeout) does not stop
/// it, and the session is still completed or aborted.
#[derive(Clone)]
pub struct CopyOrchestrator {
    client: Arc<dyn StorageClient>,
}

impl CopyOrchestrator {
    pub fn new(client: Arc<dyn StorageClient>) -> Self {
        Self { client }
    }

    #[instrument(
        name = "multipart_copy",
        skip_all,
        fields(source = %request.source(), destination = %request.destination())
    )]
    pub async fn copy(&self, request: &CopyRequest) -> Result<CopyResult, CopyError> {
        self.client
            .check_sse(request.sse())
            .map_err(CopyError::Rejected)?;
        let source_size = self.resolve_source_size(request).await?;
        let plan = PartPlan::new(source_size, request.options().min_part_size())?;

        let run = SessionRun {
            client: Arc::clone(&self.client),
            destination: request.destination().clone(),
            initiate_options: request.initiate_options().clone(),
            source: request.source().clone(),
            sse: request.sse().clone(),
            source_size,
            plan,
            workers: request.options().worker_count(),
        };
        tokio::spawn(run.execute().instrument(Span::current()))
            .await
            .map_err(|err| CopyError::Worker(format!("copy session task failed: {}", err)))?
    }

    async fn resolve_source_size(&self, request: &CopyRequest) -> Result<u64, CopyError> {
        if let Some(size) = request.source_size() {
            debug!(size, "using caller-supplied source size");
            return Ok(size);
        }
        let size = self
            .client
            .head(request.source())
            .await
            .map_err(CopyError::SizeLookupFailed)?;
        debug!(size, "looked up source size");
        Ok(size)
    }
}

/// Everything one session needs, owned so it can run detached from the
/// caller.
struct SessionRun {
    client: Arc<dyn StorageClient>,
    destination: ObjectLocation,
    initiate_options: InitiateOptions,
    source: CopySource,
    sse: SseCustomerOptions,
    source_size: u64,
    plan: PartPlan,
    workers: usize,
}

impl SessionRun {
    async fn execute(self) -> Result<CopyResult, CopyError> {
        let expected_parts = self.plan.part_count();
        let upload_id = self
            .client
            .initiate(&self.destination, &self.initiate_options)
            .await
            .map_err(CopyError::InitiateFailed)?;
        let session = Arc::new(UploadSession::new(self.destination, upload_id));
        info!(
            upload_id = session.upload_id(),
            source_size = self.source_size,
            part_size = self.plan.part_size(),
            parts = expected_parts,
            workers = self.workers,
            "multipart copy initiated"
        );

        let queue = Arc::new(PartQueue::new(self.plan.into_jobs(&session)));
        let outcome = CopyWorkerPool::new(self.workers)
            .run(Arc::clone(&self.client), queue, self.source, self.sse)
            .await;

        let client = self.client.as_ref();
        if let Some(err) = outcome.error {
            abort(client, &session).await;
            return Err(err);
        }

        let mut parts = outcome.completed;
        if parts.len() != expected_parts {
            abort(client, &session).await;
            return Err(CopyError::IncompleteCopy {
                expected: expected_parts,
                copied: parts.len(),
            });
        }
        parts.sort_by_key(|part| part.part_number);

        complete(client, &session, &parts).await
    }
}

async fn complete(
    client: &dyn StorageClient,
    session: &UploadSession,
    parts: &[CompletedPart],
) -> Result<CopyResult, CopyError> {
    match client.complete(session, parts).await {
        Ok(result) => {
            info!(
                upload_id = session.upload_id(),
                etag = %result.etag,
                size_bytes = result.size_bytes,
                "multipart copy completed"
            );
            Ok(result)
        }
        Err(source) => {
            // Service-side state is unknown here; one abort attempt.
            abort(client, session).await;
            Err(CopyError::CompleteFailed {
                upload_id: session.upload_id().to_string(),
                source,
            })
        }
    }
}

/// Abort `session`. A failed abort is logged and never replaces the error
/// that triggered it.
async fn abort(client: &dyn StorageClient, session: &UploadSession) {
    match client.abort(session).await {
        Ok(()) => info!(upload_id = session.upload_id(), "multipart copy aborted"),
        Err(err) => warn!(
            upload_id = session.upload_id(),
            "failed to abort multipart copy: {}", err
        ),
    }
}
