use bytes::Bytes;
use object_copier::{
    models::copy::{
        ByteRange, CompletedPart, CopyOptions, CopyRequest, CopySource, InitiateOptions,
        ObjectLocation, SseCustomerOptions,
    },
    services::{
        copy::{CopyError, CopyOrchestrator},
        database,
        storage_service::{StorageError, StorageService},
    },
};
use std::{collections::BTreeMap, io, sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

const MIB: usize = 1024 * 1024;

async fn setup() -> (StorageService, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("meta").join("store.db").display());
    let pool = database::connect(&url, 5).await.unwrap();
    database::run_migrations(&pool).await.unwrap();

    let storage = StorageService::new(Arc::new(pool), dir.path().join("objects"));
    storage.create_bucket("src-bucket", "local".into()).await.unwrap();
    storage.create_bucket("dst-bucket", "us-east-1".into()).await.unwrap();
    (storage, dir)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn put(storage: &StorageService, bucket: &str, key: &str, data: &[u8]) -> String {
    let chunks: Vec<io::Result<Bytes>> = data
        .chunks(64 * 1024)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let object = storage
        .upload_object_stream(
            bucket,
            key,
            Some("application/octet-stream".into()),
            &BTreeMap::new(),
            futures::stream::iter(chunks),
        )
        .await
        .unwrap();
    object.version_id.unwrap()
}

async fn read_all(storage: &StorageService, bucket: &str, key: &str) -> Vec<u8> {
    let (_, mut file) = storage.get_object_reader(bucket, key, None).await.unwrap();
    let mut out = Vec::new();
    file.read_to_end(&mut out).await.unwrap();
    out
}

fn copy_request(source: CopySource, key: &str) -> CopyRequest {
    CopyRequest::new(
        source,
        ObjectLocation::new("dst-bucket", key),
        CopyOptions::new(3, 5 * MIB as u64).unwrap(),
    )
}

#[tokio::test]
async fn multipart_copy_reproduces_the_source() {
    let (storage, dir) = setup().await;
    let data = payload(11 * MIB);
    put(&storage, "src-bucket", "videos/raw.bin", &data).await;

    let copier = CopyOrchestrator::new(Arc::new(storage.clone()));
    let request = copy_request(CopySource::new("src-bucket", "videos/raw.bin"), "copy.bin")
        .with_initiate_options(InitiateOptions {
            content_type: Some("video/mp4".into()),
            metadata: BTreeMap::from([("origin".to_string(), "copier".to_string())]),
        });
    let result = copier.copy(&request).await.unwrap();

    let mut md5s = Vec::new();
    for chunk in data.chunks(5 * MIB) {
        md5s.extend_from_slice(&md5::compute(chunk).0);
    }
    assert_eq!(result.etag, format!("{:x}-3", md5::compute(&md5s)));
    assert_eq!(result.size_bytes, data.len() as u64);
    assert_eq!(read_all(&storage, "dst-bucket", "copy.bin").await, data);

    let meta = storage
        .get_object_metadata("dst-bucket", "copy.bin", None)
        .await
        .unwrap();
    assert_eq!(meta.content_type.as_deref(), Some("video/mp4"));
    assert_eq!(meta.version_id, result.version_id);
    let user_meta = storage.object_user_metadata(&meta).await.unwrap();
    assert_eq!(user_meta.len(), 1);
    assert_eq!(user_meta[0].key, "origin");
    assert_eq!(user_meta[0].value, "copier");

    assert_eq!(storage.open_upload_count().await.unwrap(), 0);
    let staging = dir.path().join("objects").join(".multipart");
    assert_eq!(std::fs::read_dir(staging).unwrap().count(), 0);
}

#[tokio::test]
async fn customer_key_copy_is_refused_before_initiate() {
    let (storage, dir) = setup().await;
    put(&storage, "src-bucket", "secret.bin", &payload(6 * MIB)).await;

    let copier = CopyOrchestrator::new(Arc::new(storage.clone()));
    let request = copy_request(CopySource::new("src-bucket", "secret.bin"), "secret-copy.bin")
        .with_sse(SseCustomerOptions {
            algorithm: Some("AES256".into()),
            ..Default::default()
        });
    let err = copier.copy(&request).await.unwrap_err();

    assert!(matches!(
        err,
        CopyError::Rejected(StorageError::Unsupported(_))
    ));
    assert_eq!(storage.open_upload_count().await.unwrap(), 0);
    let staging = dir.path().join("objects").join(".multipart");
    assert!(!staging.exists() || std::fs::read_dir(&staging).unwrap().count() == 0);
    assert!(matches!(
        storage
            .get_object_metadata("dst-bucket", "secret-copy.bin", None)
            .await,
        Err(StorageError::ObjectNotFound { .. })
    ));
}

#[tokio::test]
async fn cancelled_copy_does_not_leak_its_session() {
    let (storage, dir) = setup().await;
    let data = payload(96 * MIB);
    put(&storage, "src-bucket", "large.bin", &data).await;

    let copier = CopyOrchestrator::new(Arc::new(storage.clone()));
    let request = CopyRequest::new(
        CopySource::new("src-bucket", "large.bin"),
        ObjectLocation::new("dst-bucket", "large-copy.bin"),
        CopyOptions::new(1, 5 * MIB as u64).unwrap(),
    );
    let handle = tokio::spawn(async move { copier.copy(&request).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while storage.open_upload_count().await.unwrap() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "copy never initiated");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    let staging = dir.path().join("objects").join(".multipart");
    while storage.open_upload_count().await.unwrap() != 0
        || std::fs::read_dir(&staging).unwrap().count() != 0
    {
        assert!(tokio::time::Instant::now() < deadline, "session left open");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(read_all(&storage, "dst-bucket", "large-copy.bin").await, data);
}

#[tokio::test]
async fn source_versions_are_honoured() {
    let (storage, _dir) = setup().await;
    let version = put(&storage, "src-bucket", "doc.bin", &payload(6 * MIB)).await;
    let copier = CopyOrchestrator::new(Arc::new(storage.clone()));

    let stale = copy_request(
        CopySource::new("src-bucket", "doc.bin").with_version("not-a-version"),
        "doc-copy.bin",
    );
    let err = copier.copy(&stale).await.unwrap_err();
    assert!(matches!(
        err,
        CopyError::SizeLookupFailed(StorageError::VersionNotFound { .. })
    ));

    let current = copy_request(
        CopySource::new("src-bucket", "doc.bin").with_version(version),
        "doc-copy.bin",
    );
    let result = copier.copy(&current).await.unwrap();
    assert!(result.etag.ends_with("-2"));
}

#[tokio::test]
async fn overwrites_get_a_new_version() {
    let (storage, _dir) = setup().await;
    let first = put(&storage, "src-bucket", "a.txt", b"one").await;
    let second = put(&storage, "src-bucket", "a.txt", b"two").await;
    assert_ne!(first, second);

    assert!(matches!(
        storage
            .get_object_metadata("src-bucket", "a.txt", Some(&first))
            .await,
        Err(StorageError::VersionNotFound { .. })
    ));
    let current = storage
        .get_object_metadata("src-bucket", "a.txt", Some(&second))
        .await
        .unwrap();
    assert_eq!(current.size_bytes, 3);
}

#[tokio::test]
async fn completion_validates_the_part_list() {
    let (storage, _dir) = setup().await;
    put(&storage, "src-bucket", "small.bin", &payload(100)).await;
    let source = CopySource::new("src-bucket", "small.bin");

    let upload = storage
        .create_multipart_upload("dst-bucket", "out.bin", None, &BTreeMap::new())
        .await
        .unwrap();
    let id = upload.upload_id.as_str();
    let p1 = storage
        .upload_part_copy("dst-bucket", "out.bin", id, 1, &source, ByteRange::new(0, 49))
        .await
        .unwrap();
    let p2 = storage
        .upload_part_copy("dst-bucket", "out.bin", id, 2, &source, ByteRange::new(50, 99))
        .await
        .unwrap();
    let part = |n: u32, etag: &str| CompletedPart {
        part_number: n,
        etag: etag.to_string(),
    };

    let unordered = [part(2, &p2.etag), part(1, &p1.etag)];
    assert!(matches!(
        storage
            .complete_multipart_upload("dst-bucket", "out.bin", id, &unordered)
            .await,
        Err(StorageError::InvalidPartOrder)
    ));

    let wrong_etag = [part(1, &p1.etag), part(2, &p1.etag)];
    assert!(matches!(
        storage
            .complete_multipart_upload("dst-bucket", "out.bin", id, &wrong_etag)
            .await,
        Err(StorageError::InvalidPart(_))
    ));

    assert!(matches!(
        storage
            .complete_multipart_upload("dst-bucket", "out.bin", id, &[])
            .await,
        Err(StorageError::InvalidPart(_))
    ));

    let quoted = format!("\"{}\"", p2.etag);
    let object = storage
        .complete_multipart_upload(
            "dst-bucket",
            "out.bin",
            id,
            &[part(1, &p1.etag), part(2, &quoted)],
        )
        .await
        .unwrap();
    assert_eq!(object.size_bytes, 100);
    assert_eq!(read_all(&storage, "dst-bucket", "out.bin").await, payload(100));

    // The session is retired.
    assert!(matches!(
        storage.abort_multipart_upload("dst-bucket", "out.bin", id).await,
        Err(StorageError::UploadNotFound(_))
    ));
}

#[tokio::test]
async fn part_copies_are_bounds_checked_and_replaceable() {
    let (storage, _dir) = setup().await;
    put(&storage, "src-bucket", "small.bin", &payload(100)).await;
    let source = CopySource::new("src-bucket", "small.bin");

    let upload = storage
        .create_multipart_upload("dst-bucket", "out.bin", None, &BTreeMap::new())
        .await
        .unwrap();
    let id = upload.upload_id.as_str();

    assert!(matches!(
        storage
            .upload_part_copy("dst-bucket", "out.bin", id, 1, &source, ByteRange::new(50, 100))
            .await,
        Err(StorageError::InvalidRange(_))
    ));
    assert!(matches!(
        storage
            .upload_part_copy("dst-bucket", "out.bin", id, 0, &source, ByteRange::new(0, 9))
            .await,
        Err(StorageError::InvalidPart(_))
    ));

    let first = storage
        .upload_part_copy("dst-bucket", "out.bin", id, 1, &source, ByteRange::new(0, 9))
        .await
        .unwrap();
    let second = storage
        .upload_part_copy("dst-bucket", "out.bin", id, 1, &source, ByteRange::new(10, 29))
        .await
        .unwrap();
    assert_ne!(first.etag, second.etag);
    assert_eq!(second.size_bytes, 20);
    assert_eq!(
        storage
            .stored_part_count("dst-bucket", "out.bin", id)
            .await
            .unwrap(),
        1
    );

    storage
        .abort_multipart_upload("dst-bucket", "out.bin", id)
        .await
        .unwrap();
    assert!(matches!(
        storage
            .upload_part_copy("dst-bucket", "out.bin", id, 2, &source, ByteRange::new(0, 9))
            .await,
        Err(StorageError::UploadNotFound(_))
    ));
    assert_eq!(storage.open_upload_count().await.unwrap(), 0);
}
