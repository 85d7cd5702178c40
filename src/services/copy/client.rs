//! The storage operations the copy orchestrator depends on.

use crate::{
    models::copy::{
        CompletedPart, CopyResult, CopySource, InitiateOptions, ObjectLocation, PartJob,
        SseCustomerOptions, UploadSession,
    },
    services::storage_service::{StorageError, StorageResult, StorageService},
};
use async_trait::async_trait;

/// Remote operations used by `CopyOrchestrator`.
///
/// Implementations own transport, signing, retries and timeouts; the
/// orchestrator applies none of its own.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Refuse customer-key encryption settings this client cannot honour.
    /// Called before the source is sized or a session is opened.
    fn check_sse(&self, _sse: &SseCustomerOptions) -> StorageResult<()> {
        Ok(())
    }

    /// Byte length of the source object (at `source.version_id`, if set).
    async fn head(&self, source: &CopySource) -> StorageResult<u64>;

    /// Open a multipart session on `destination` and return its upload id.
    async fn initiate(
        &self,
        destination: &ObjectLocation,
        options: &InitiateOptions,
    ) -> StorageResult<String>;

    /// Copy `job.range` of `source` into part `job.part_number` of
    /// `job.session` and return the part's etag.
    async fn copy_part(
        &self,
        job: &PartJob,
        source: &CopySource,
        sse: &SseCustomerOptions,
    ) -> StorageResult<String>;

    /// Assemble the session from `parts`, which must be in ascending order.
    async fn complete(
        &self,
        session: &UploadSession,
        parts: &[CompletedPart],
    ) -> StorageResult<CopyResult>;

    /// Discard the session and any parts copied into it.
    async fn abort(&self, session: &UploadSession) -> StorageResult<()>;
}

#[async_trait]
impl StorageClient for StorageService {
    /// Payloads are stored in plaintext, so any customer-key setting is
    /// refused.
    fn check_sse(&self, sse: &SseCustomerOptions) -> StorageResult<()> {
        if sse.is_requested() {
            return Err(StorageError::Unsupported(
                "server-side encryption with customer-provided keys".into(),
            ));
        }
        Ok(())
    }

    async fn head(&self, source: &CopySource) -> StorageResult<u64> {
        let object = self
            .get_object_metadata(&source.bucket, &source.key, source.version_id.as_deref())
            .await?;
        Ok(object.len())
    }

    async fn initiate(
        &self,
        destination: &ObjectLocation,
        options: &InitiateOptions,
    ) -> StorageResult<String> {
        let upload = self
            .create_multipart_upload(
                &destination.bucket,
                &destination.key,
                options.content_type.clone(),
                &options.metadata,
            )
            .await?;
        Ok(upload.upload_id)
    }

    async fn copy_part(
        &self,
        job: &PartJob,
        source: &CopySource,
        sse: &SseCustomerOptions,
    ) -> StorageResult<String> {
        self.check_sse(sse)?;
        let part = self
            .upload_part_copy(
                job.session.bucket(),
                job.session.key(),
                job.session.upload_id(),
                job.part_number,
                source,
                job.range,
            )
            .await?;
        Ok(part.etag)
    }

    async fn complete(
        &self,
        session: &UploadSession,
        parts: &[CompletedPart],
    ) -> StorageResult<CopyResult> {
        let object = self
            .complete_multipart_upload(
                session.bucket(),
                session.key(),
                session.upload_id(),
                parts,
            )
            .await?;
        Ok(CopyResult {
            bucket: session.bucket().to_string(),
            key: object.key.clone(),
            etag: object.etag.clone().unwrap_or_default(),
            size_bytes: object.len(),
            version_id: object.version_id,
        })
    }

    async fn abort(&self, session: &UploadSession) -> StorageResult<()> {
        self.abort_multipart_upload(session.bucket(), session.key(), session.upload_id())
            .await
    }
}
