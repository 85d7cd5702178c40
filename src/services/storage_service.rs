//! src/services/storage_service.rs
//!
//! StorageService, a local S3-like backend with SQLite metadata and on-disk
//! payloads sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//! Multipart sessions keep their parts under `base_path/.multipart/{upload_id}`
//! until they are completed (concatenated into the destination object) or
//! aborted (deleted). Part copies are performed server-side: the bytes of a
//! source range go straight from the source payload into the part file.

use crate::{
    models::{
        bucket::Bucket,
        copy::{ByteRange, CompletedPart, CopySource},
        metadata::ObjectMetadata,
        multipart::{MultipartPart, MultipartUpload},
        object::Object,
    },
    services::copy::planner::MAX_PARTS,
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::{
    collections::{BTreeMap, HashMap},
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("version `{version_id}` of `{bucket}/{key}` not found")]
    VersionNotFound {
        bucket: String,
        key: String,
        version_id: String,
    },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("multipart upload `{0}` not found")]
    UploadNotFound(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("invalid part: {0}")]
    InvalidPart(String),
    #[error("parts must be listed in strictly ascending order")]
    InvalidPartOrder,
    #[error("{0} is not supported")]
    Unsupported(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the S3-like operations the copy orchestrator and
/// the HTTP handlers need:
/// - bucket creation
/// - streaming object upload, download and metadata lookup
/// - multipart sessions: create, copy a part from an existing object,
///   complete, abort
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const MULTIPART_DIR: &str = ".multipart";
const COPY_BUFFER_SIZE: usize = 256 * 1024;
const SUPPORTED_REGIONS: [&str; 16] = [
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-southeast-1",
    "ap-northeast-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-2",
    "ap-northeast-3",
    "me-south-1",
];

const OBJECT_COLUMNS: &str = "id, bucket_id, key, filename, content_type, size_bytes, etag, \
                              storage_class, last_modified, version_id, is_deleted";
const UPLOAD_COLUMNS: &str =
    "id, bucket_id, key, upload_id, content_type, metadata, initiated_at, completed";
const PART_COLUMNS: &str = "id, upload_id, part_number, size_bytes, etag, uploaded_at";

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Reject empty, oversized, absolute, traversing or control-character keys.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    ///
    /// Bucket names never start with a dot, so they cannot collide with the
    /// multipart staging directory.
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        if name.trim() != name {
            return Err(invalid("cannot begin or end with whitespace"));
        }
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len()) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }
        Ok(())
    }

    /// Case-insensitive check against SUPPORTED_REGIONS.
    fn ensure_region_valid(&self, region: &str) -> StorageResult<()> {
        if SUPPORTED_REGIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(region))
        {
            Ok(())
        } else {
            Err(StorageError::UnsupportedRegion(region.to_string()))
        }
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard directories from MD5(bucket/key), as lowercase hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// `base_path/bucket/{shard}/{shard}/{key}`. Parents may not exist yet.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn multipart_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(MULTIPART_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.multipart_dir(upload_id)
            .join(format!("{:05}", part_number))
    }

    /// Fetch bucket metadata, validating the name first.
    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<Sqlite, Bucket>(
            "SELECT id, name, owner_id, region, created_at, versioning_enabled
             FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Fetch the live object row for `key`, optionally pinned to a version.
    async fn fetch_object(
        &self,
        bucket: &Bucket,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<Object> {
        let object = sqlx::query_as::<_, Object>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0"
        ))
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })?;

        match version_id {
            Some(wanted) if object.version_id.as_deref() != Some(wanted) => {
                Err(StorageError::VersionNotFound {
                    bucket: bucket.name.clone(),
                    key: key.to_string(),
                    version_id: wanted.to_string(),
                })
            }
            _ => Ok(object),
        }
    }

    /// Fetch an open (not yet completed) multipart session for `key`.
    async fn fetch_upload(
        &self,
        bucket: &Bucket,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<MultipartUpload> {
        sqlx::query_as::<_, MultipartUpload>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM multipart_uploads
             WHERE upload_id = ? AND bucket_id = ? AND key = ? AND completed = 0"
        ))
        .bind(upload_id)
        .bind(bucket.id)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::UploadNotFound(upload_id.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Stream-upload an object to disk and update metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into final location.
    /// - Upserts metadata row (S3-like overwrite semantics) and replaces the
    ///   object's user metadata.
    pub async fn upload_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        metadata: &BTreeMap<String, String>,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let tmp_path = self.staging_path(&bucket_rec, key).await?;
        let (size_bytes, etag) = match write_stream(&tmp_path, stream).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };

        self.commit_object(
            &bucket_rec,
            key,
            content_type,
            metadata,
            &tmp_path,
            size_bytes,
            etag,
        )
        .await
    }

    /// Open an object for reading. Returns ObjectNotFound when the metadata
    /// row exists but the payload is missing.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<(Object, File)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key, version_id).await?;
        let file = self.open_payload(&bucket_rec, key).await?;
        Ok((object, file))
    }

    /// Fetch only object metadata.
    pub async fn get_object_metadata(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StorageResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key, version_id).await
    }

    /// User metadata pairs of an object, ordered by key.
    pub async fn object_user_metadata(&self, object: &Object) -> StorageResult<Vec<ObjectMetadata>> {
        let rows = sqlx::query_as::<_, ObjectMetadata>(
            "SELECT id, object_id, key, value FROM object_metadata
             WHERE object_id = ? ORDER BY key ASC",
        )
        .bind(object.id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Create a bucket and its directory.
    ///
    /// Validates name and region; BucketAlreadyExists on a name conflict.
    pub async fn create_bucket(&self, name: &str, region: String) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        let normalized_region = region.to_lowercase();
        self.ensure_region_valid(&normalized_region)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            owner_id: Uuid::new_v4(),
            region: normalized_region,
            created_at: Utc::now(),
            versioning_enabled: false,
        };

        match sqlx::query(
            "INSERT INTO buckets (id, name, owner_id, region, created_at, versioning_enabled)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(bucket.owner_id)
        .bind(&bucket.region)
        .bind(bucket.created_at)
        .bind(bucket.versioning_enabled)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StorageError::Sqlx(err)),
        }
    }

    /// Open a multipart session for `bucket/key`.
    ///
    /// `content_type` and `metadata` are applied to the assembled object on
    /// completion; nothing is taken from the copy source.
    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        metadata: &BTreeMap<String, String>,
    ) -> StorageResult<MultipartUpload> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let upload_id = Uuid::new_v4().simple().to_string();
        fs::create_dir_all(self.multipart_dir(&upload_id)).await?;

        let upload = sqlx::query_as::<_, MultipartUpload>(&format!(
            "INSERT INTO multipart_uploads ({UPLOAD_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, 0)
             RETURNING {UPLOAD_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(&upload_id)
        .bind(content_type)
        .bind(serde_json::to_string(metadata)?)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        debug!("created multipart upload {} for {}/{}", upload_id, bucket, key);
        Ok(upload)
    }

    /// Copy `range` of `source` into part `part_number` of an open session.
    ///
    /// The range must lie within the source object. Re-copying a part number
    /// replaces the earlier part. The returned part's etag is the hex md5 of
    /// the copied bytes.
    pub async fn upload_part_copy(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        source: &CopySource,
        range: ByteRange,
    ) -> StorageResult<MultipartPart> {
        if part_number == 0 || u64::from(part_number) > MAX_PARTS {
            return Err(StorageError::InvalidPart(format!(
                "part number {} is outside 1..={}",
                part_number, MAX_PARTS
            )));
        }
        self.ensure_key_safe(key)?;
        self.ensure_key_safe(&source.key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload = self.fetch_upload(&bucket_rec, key, upload_id).await?;

        let source_bucket = self.fetch_bucket(&source.bucket).await?;
        let source_object = self
            .fetch_object(&source_bucket, &source.key, source.version_id.as_deref())
            .await?;
        if range.last >= source_object.len() {
            return Err(StorageError::InvalidRange(format!(
                "{} is outside {} ({} bytes)",
                range,
                source,
                source_object.len()
            )));
        }

        let mut payload = self.open_payload(&source_bucket, &source.key).await?;
        payload.seek(SeekFrom::Start(range.first)).await?;
        let reader = payload.take(range.byte_count());

        let part_dir = self.multipart_dir(upload_id);
        fs::create_dir_all(&part_dir).await?;
        let tmp_path = part_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let (copied, etag) = match write_reader(&tmp_path, reader).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };
        if copied != range.byte_count() {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::InvalidRange(format!(
                "{} of {} yielded {} bytes",
                range, source, copied
            )));
        }
        fs::rename(&tmp_path, self.part_path(upload_id, part_number)).await?;

        let part = sqlx::query_as::<_, MultipartPart>(&format!(
            "INSERT INTO multipart_parts ({PART_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(upload_id, part_number) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded_at = excluded.uploaded_at
             RETURNING {PART_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(upload.id)
        .bind(part_number as i32)
        .bind(copied as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        debug!(
            "copied {} of {} into part {} of upload {}",
            range, source, part_number, upload_id
        );
        Ok(part)
    }

    /// Assemble an open session into the destination object.
    ///
    /// `parts` must be non-empty, strictly ascending by part number, and name
    /// parts that were copied with matching etags. Copied parts that are not
    /// listed are discarded. The resulting etag is
    /// `md5(concat(binary part md5s))-N`.
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload = self.fetch_upload(&bucket_rec, key, upload_id).await?;

        if parts.is_empty() {
            return Err(StorageError::InvalidPart(
                "at least one part is required".into(),
            ));
        }
        if parts
            .windows(2)
            .any(|pair| pair[0].part_number >= pair[1].part_number)
        {
            return Err(StorageError::InvalidPartOrder);
        }

        let stored: HashMap<i32, MultipartPart> = sqlx::query_as::<_, MultipartPart>(&format!(
            "SELECT {PART_COLUMNS} FROM multipart_parts WHERE upload_id = ?"
        ))
        .bind(upload.id)
        .fetch_all(&*self.db)
        .await?
        .into_iter()
        .map(|part| (part.part_number, part))
        .collect();

        let mut etag_material = Vec::with_capacity(parts.len() * 16);
        let mut size_bytes: i64 = 0;
        for part in parts {
            let stored_part = i32::try_from(part.part_number)
                .ok()
                .and_then(|number| stored.get(&number))
                .ok_or_else(|| {
                    StorageError::InvalidPart(format!("part {} was never copied", part.part_number))
                })?;
            if stored_part.etag != part.etag.trim_matches('"') {
                return Err(StorageError::InvalidPart(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            let digest = decode_md5_hex(&stored_part.etag).ok_or_else(|| {
                StorageError::InvalidPart(format!("part {} has a malformed etag", part.part_number))
            })?;
            etag_material.extend_from_slice(&digest);
            size_bytes += stored_part.size_bytes;
        }

        let tmp_path = self.staging_path(&bucket_rec, key).await?;
        if let Err(err) = self.concatenate_parts(upload_id, parts, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        let etag = format!("{:x}-{}", md5::compute(&etag_material), parts.len());

        let object = self
            .commit_object(
                &bucket_rec,
                key,
                upload.content_type.clone(),
                &upload.user_metadata(),
                &tmp_path,
                size_bytes,
                etag,
            )
            .await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE multipart_uploads SET completed = 1 WHERE id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.remove_multipart_dir(upload_id).await;

        debug!(
            "completed multipart upload {} into {}/{} ({} parts)",
            upload_id,
            bucket,
            key,
            parts.len()
        );
        Ok(object)
    }

    /// Discard an open session, its part rows and its part files.
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload = self.fetch_upload(&bucket_rec, key, upload_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM multipart_uploads WHERE id = ?")
            .bind(upload.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.remove_multipart_dir(upload_id).await;

        debug!("aborted multipart upload {} for {}/{}", upload_id, bucket, key);
        Ok(())
    }

    /// Number of parts currently stored for an open session.
    pub async fn stored_part_count(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<usize> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let upload = self.fetch_upload(&bucket_rec, key, upload_id).await?;
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM multipart_parts WHERE upload_id = ?")
                .bind(upload.id)
                .fetch_one(&*self.db)
                .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Number of sessions that are neither completed nor aborted.
    pub async fn open_upload_count(&self) -> StorageResult<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM multipart_uploads WHERE completed = 0")
                .fetch_one(&*self.db)
                .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn open_payload(&self, bucket: &Bucket, key: &str) -> StorageResult<File> {
        File::open(self.object_path(&bucket.name, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StorageError::ObjectNotFound {
                        bucket: bucket.name.clone(),
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Io(err)
                }
            })
    }

    /// A fresh temporary path next to the object's final location, so the
    /// commit is a same-directory rename.
    async fn staging_path(&self, bucket: &Bucket, key: &str) -> StorageResult<PathBuf> {
        let file_path = self.object_path(&bucket.name, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        Ok(parent.join(format!(".tmp-{}", Uuid::new_v4())))
    }

    async fn concatenate_parts(
        &self,
        upload_id: &str,
        parts: &[CompletedPart],
        target: &Path,
    ) -> StorageResult<()> {
        let mut out = File::create(target).await?;
        for part in parts {
            let path = self.part_path(upload_id, part.part_number);
            let mut part_file = File::open(&path).await.map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StorageError::InvalidPart(format!(
                        "payload of part {} is missing",
                        part.part_number
                    ))
                } else {
                    StorageError::Io(err)
                }
            })?;
            tokio::io::copy(&mut part_file, &mut out).await?;
        }
        out.flush().await?;
        out.sync_all().await?;
        Ok(())
    }

    /// Move a fully written temp file into place and upsert its metadata
    /// row. Every commit gets a new version id; the user metadata of the
    /// object is replaced with `metadata`.
    #[allow(clippy::too_many_arguments)]
    async fn commit_object(
        &self,
        bucket: &Bucket,
        key: &str,
        content_type: Option<String>,
        metadata: &BTreeMap<String, String>,
        tmp_path: &Path,
        size_bytes: i64,
        etag: String,
    ) -> StorageResult<Object> {
        let file_path = self.object_path(&bucket.name, key);
        if let Err(err) = fs::rename(tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let filename = key.rsplit('/').next().unwrap_or(key).to_string();
        let version_id = Uuid::new_v4().simple().to_string();

        let mut tx = self.db.begin().await?;
        let committed = upsert_object(
            &mut tx,
            bucket,
            key,
            &filename,
            content_type,
            size_bytes,
            &etag,
            &version_id,
            metadata,
        )
        .await;

        match committed {
            Ok(object) => {
                tx.commit().await?;
                Ok(object)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    async fn remove_multipart_dir(&self, upload_id: &str) {
        let dir = self.multipart_dir(upload_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => debug!("removed multipart directory {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!(
                "failed to remove multipart directory {}: {}",
                dir.display(),
                err
            ),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn upsert_object(
    tx: &mut Transaction<'_, Sqlite>,
    bucket: &Bucket,
    key: &str,
    filename: &str,
    content_type: Option<String>,
    size_bytes: i64,
    etag: &str,
    version_id: &str,
    metadata: &BTreeMap<String, String>,
) -> StorageResult<Object> {
    let object = sqlx::query_as::<_, Object>(&format!(
        r#"
        INSERT INTO objects ({OBJECT_COLUMNS})
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
        ON CONFLICT(bucket_id, key) DO UPDATE SET
            filename = excluded.filename,
            content_type = excluded.content_type,
            size_bytes = excluded.size_bytes,
            etag = excluded.etag,
            storage_class = excluded.storage_class,
            last_modified = excluded.last_modified,
            version_id = excluded.version_id,
            is_deleted = 0
        RETURNING {OBJECT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(bucket.id)
    .bind(key)
    .bind(filename)
    .bind(content_type)
    .bind(size_bytes)
    .bind(etag)
    .bind("STANDARD")
    .bind(Utc::now())
    .bind(version_id)
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
        .bind(object.id)
        .execute(&mut **tx)
        .await?;
    for (name, value) in metadata {
        sqlx::query("INSERT INTO object_metadata (id, object_id, key, value) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(object.id)
            .bind(name)
            .bind(value)
            .execute(&mut **tx)
            .await?;
    }

    Ok(object)
}

/// Write `stream` to `path`, fsync it, and return its size and hex md5.
async fn write_stream<S>(path: &Path, stream: S) -> io::Result<(i64, String)>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: i64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as i64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((size_bytes, format!("{:x}", digest.compute())))
}

/// Like `write_stream`, for an `AsyncRead` source.
async fn write_reader<R>(path: &Path, mut reader: R) -> io::Result<(u64, String)>
where
    R: AsyncRead + Unpin,
{
    let mut file = File::create(path).await?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied: u64 = 0;
    let mut digest = Context::new();
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.consume(&buf[..n]);
        file.write_all(&buf[..n]).await?;
        copied += n as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((copied, format!("{:x}", digest.compute())))
}

fn decode_md5_hex(etag: &str) -> Option<[u8; 16]> {
    if etag.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(etag.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(out)
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
