//! Typed values for the multipart copy protocol.
//!
//! A `CopyRequest` is the immutable input of one copy. The orchestrator turns
//! it into an `UploadSession` (one per initiated multipart upload), a list of
//! `PartJob`s (one per planned byte range) and finally a sorted list of
//! `CompletedPart`s that is handed to the completion call.

use crate::services::copy::{
    error::CopyError,
    planner::{DEFAULT_MIN_PART_SIZE, MIN_PART_SIZE},
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Default number of concurrent part-copy workers.
pub const DEFAULT_WORKER_COUNT: usize = 10;

const VERSION_ID_MARKER: &str = "?versionId=";

/// Bytes escaped when a key is written into a locator. `/` and the RFC 3986
/// unreserved marks stay literal.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A bucket/key pair naming a destination object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// The source of a copy, decoded from a combined locator string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySource {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
}

impl CopySource {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
        }
    }

    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    /// Decode a locator of the form `bucket/key[?versionId=ID]`.
    ///
    /// A single leading `/` is accepted. The key is percent-decoded after the
    /// version suffix has been split off, so an encoded `?` inside the key
    /// survives.
    pub fn parse(locator: &str) -> Result<Self, CopyError> {
        let trimmed = locator.strip_prefix('/').unwrap_or(locator);

        let (path, version_id) = match trimmed.split_once(VERSION_ID_MARKER) {
            Some((path, version)) if !version.is_empty() => (path, Some(version.to_string())),
            Some(_) => {
                return Err(CopyError::InvalidCopySource(format!(
                    "`{}` has an empty versionId",
                    locator
                )));
            }
            None => (trimmed, None),
        };

        let (bucket, raw_key) = path.split_once('/').ok_or_else(|| {
            CopyError::InvalidCopySource(format!("`{}` is not of the form bucket/key", locator))
        })?;
        if bucket.is_empty() || raw_key.is_empty() {
            return Err(CopyError::InvalidCopySource(format!(
                "`{}` is missing a bucket or key",
                locator
            )));
        }

        let key = percent_decode_str(raw_key)
            .decode_utf8()
            .map_err(|err| {
                CopyError::InvalidCopySource(format!("`{}` key is not UTF-8: {}", locator, err))
            })?
            .into_owned();

        Ok(Self {
            bucket: bucket.to_string(),
            key,
            version_id,
        })
    }
}

/// Renders the locator `parse` accepts; the key is percent-encoded.
impl fmt::Display for CopySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.bucket,
            utf8_percent_encode(&self.key, KEY_ENCODE_SET)
        )?;
        if let Some(version) = &self.version_id {
            write!(f, "{}{}", VERSION_ID_MARKER, version)?;
        }
        Ok(())
    }
}

/// An inclusive byte range `[first, last]` of the source object.
///
/// `first <= last` always holds, so a range covers at least one byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub first: u64,
    pub last: u64,
}

impl ByteRange {
    pub fn new(first: u64, last: u64) -> Self {
        debug_assert!(first <= last, "byte range {}-{} is inverted", first, last);
        Self { first, last }
    }

    /// Number of bytes covered; never zero.
    pub fn byte_count(&self) -> u64 {
        self.last - self.first + 1
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.first, self.last)
    }
}

/// Concurrency and part sizing for one copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyOptions {
    worker_count: usize,
    min_part_size: u64,
}

impl CopyOptions {
    /// Validate and build options. `worker_count` must be at least 1 and
    /// `min_part_size` at least the service minimum of 5 MiB.
    pub fn new(worker_count: usize, min_part_size: u64) -> Result<Self, CopyError> {
        if worker_count == 0 {
            return Err(CopyError::InvalidOptions(
                "worker count must be at least 1".into(),
            ));
        }
        if min_part_size < MIN_PART_SIZE {
            return Err(CopyError::InvalidOptions(format!(
                "minimum part size must be at least {} bytes, got {}",
                MIN_PART_SIZE, min_part_size
            )));
        }
        Ok(Self {
            worker_count,
            min_part_size,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn min_part_size(&self) -> u64 {
        self.min_part_size
    }
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            min_part_size: DEFAULT_MIN_PART_SIZE,
        }
    }
}

/// Metadata applied to the destination when the session is initiated.
/// Nothing is inherited from the source implicitly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitiateOptions {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Customer-provided encryption key parameters for a part copy.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SseCustomerOptions {
    pub algorithm: Option<String>,
    pub key: Option<String>,
    pub key_md5: Option<String>,
    pub source_algorithm: Option<String>,
    pub source_key: Option<String>,
    pub source_key_md5: Option<String>,
}

impl SseCustomerOptions {
    pub fn is_requested(&self) -> bool {
        [
            &self.algorithm,
            &self.key,
            &self.key_md5,
            &self.source_algorithm,
            &self.source_key,
            &self.source_key_md5,
        ]
        .iter()
        .any(|value| value.is_some())
    }
}

// Keys never reach logs.
impl fmt::Debug for SseCustomerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseCustomerOptions")
            .field("algorithm", &self.algorithm)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("source_algorithm", &self.source_algorithm)
            .field("source_key", &self.source_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Immutable input of a single multipart copy.
#[derive(Clone, Debug)]
pub struct CopyRequest {
    source: CopySource,
    destination: ObjectLocation,
    source_size: Option<u64>,
    options: CopyOptions,
    initiate_options: InitiateOptions,
    sse: SseCustomerOptions,
}

impl CopyRequest {
    pub fn new(source: CopySource, destination: ObjectLocation, options: CopyOptions) -> Self {
        Self {
            source,
            destination,
            source_size: None,
            options,
            initiate_options: InitiateOptions::default(),
            sse: SseCustomerOptions::default(),
        }
    }

    /// Skip the size lookup and trust the caller-supplied length.
    pub fn with_source_size(mut self, size: u64) -> Self {
        self.source_size = Some(size);
        self
    }

    pub fn with_initiate_options(mut self, initiate_options: InitiateOptions) -> Self {
        self.initiate_options = initiate_options;
        self
    }

    pub fn with_sse(mut self, sse: SseCustomerOptions) -> Self {
        self.sse = sse;
        self
    }

    pub fn source(&self) -> &CopySource {
        &self.source
    }

    pub fn destination(&self) -> &ObjectLocation {
        &self.destination
    }

    pub fn source_size(&self) -> Option<u64> {
        self.source_size
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    pub fn initiate_options(&self) -> &InitiateOptions {
        &self.initiate_options
    }

    pub fn sse(&self) -> &SseCustomerOptions {
        &self.sse
    }
}

/// One in-flight multipart session. Created by a successful initiate and
/// retired by exactly one complete or abort.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    destination: ObjectLocation,
    upload_id: String,
}

impl UploadSession {
    pub fn new(destination: ObjectLocation, upload_id: impl Into<String>) -> Self {
        Self {
            destination,
            upload_id: upload_id.into(),
        }
    }

    pub fn destination(&self) -> &ObjectLocation {
        &self.destination
    }

    pub fn bucket(&self) -> &str {
        &self.destination.bucket
    }

    pub fn key(&self) -> &str {
        &self.destination.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }
}

/// A planned part copy bound to its session.
#[derive(Clone, Debug)]
pub struct PartJob {
    pub part_number: u32,
    pub range: ByteRange,
    pub session: Arc<UploadSession>,
}

/// Result of a successful part copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Description of the assembled destination object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyResult {
    pub bucket: String,
    pub key: String,
    pub etag: String,
    pub size_bytes: u64,
    pub version_id: Option<String>,
}
