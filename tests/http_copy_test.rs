use object_copier::{
    AppState,
    models::copy::CopyOptions,
    routes::routes::routes,
    services::{database, storage_service::StorageService},
};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tempfile::TempDir;

const MIB: usize = 1024 * 1024;

/// Serves the full router on an ephemeral port and returns its base URL.
async fn serve() -> (String, StorageService, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("store.db").display());
    let pool = database::connect(&url, 5).await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    let storage = StorageService::new(Arc::new(pool), dir.path().join("objects"));

    let state = AppState::new(storage.clone(), CopyOptions::new(2, 5 * MIB as u64).unwrap());
    let app = routes().with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), storage, dir)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 241) as u8).collect()
}

async fn create_buckets(client: &Client, base: &str) {
    for bucket in ["src", "dst"] {
        let resp = client.put(format!("{base}/{bucket}")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

async fn upload(client: &Client, base: &str, path: &str, data: Vec<u8>) -> String {
    let resp = client
        .put(format!("{base}/{path}"))
        .header("content-type", "application/octet-stream")
        .body(data)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    resp.headers()["x-amz-version-id"]
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn copy_header_runs_a_multipart_copy() {
    let (base, storage, _dir) = serve().await;
    let client = Client::new();
    create_buckets(&client, &base).await;
    let data = payload(11 * MIB);
    let version = upload(&client, &base, "src/raw/my%20clip.bin", data.clone()).await;

    let resp = client
        .put(format!("{base}/dst/clips/copy.bin"))
        .header(
            "x-amz-copy-source",
            format!("/src/raw/my%20clip.bin?versionId={version}"),
        )
        .header("content-type", "video/mp4")
        .header("x-amz-meta-origin", "http-copy")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/xml");
    assert_eq!(resp.headers()["x-amz-copy-source-version-id"], version.as_str());
    let new_version = resp.headers()["x-amz-version-id"]
        .to_str()
        .unwrap()
        .to_string();
    let body = resp.text().await.unwrap();

    let mut md5s = Vec::new();
    for chunk in data.chunks(5 * MIB) {
        md5s.extend_from_slice(&md5::compute(chunk).0);
    }
    let etag = format!("{:x}-3", md5::compute(&md5s));
    assert!(body.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
    assert!(body.contains("<CopyObjectResult"));
    assert!(body.contains("<LastModified>"));
    assert!(body.contains(&format!("<ETag>\"{etag}\"</ETag>")), "{body}");

    let head = client
        .head(format!("{base}/dst/clips/copy.bin"))
        .send()
        .await
        .unwrap();
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(head.headers()["content-type"], "video/mp4");
    assert_eq!(head.headers()["x-amz-meta-origin"], "http-copy");
    assert_eq!(head.headers()["x-amz-version-id"], new_version.as_str());
    assert_eq!(head.headers()["etag"], format!("\"{etag}\"").as_str());

    let get = client
        .get(format!("{base}/dst/clips/copy.bin"))
        .send()
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);
    assert_eq!(get.bytes().await.unwrap().as_ref(), data.as_slice());
    assert_eq!(storage.open_upload_count().await.unwrap(), 0);
}

#[tokio::test]
async fn copy_errors_map_to_http_statuses() {
    let (base, storage, _dir) = serve().await;
    let client = Client::new();
    create_buckets(&client, &base).await;
    upload(&client, &base, "src/small.bin", payload(MIB)).await;
    upload(&client, &base, "src/big.bin", payload(6 * MIB)).await;

    let copy = |source: &str| {
        client
            .put(format!("{base}/dst/out.bin"))
            .header("x-amz-copy-source", source.to_string())
    };

    let too_small = copy("src/small.bin").send().await.unwrap();
    assert_eq!(too_small.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value =
        serde_json::from_slice(&too_small.bytes().await.unwrap()).unwrap();
    assert_eq!(body["status"], 400);

    let missing = copy("src/absent.bin").send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let no_key = copy("src").send().await.unwrap();
    assert_eq!(no_key.status(), StatusCode::BAD_REQUEST);

    let customer_key = copy("src/big.bin")
        .header(
            "x-amz-copy-source-server-side-encryption-customer-key-md5",
            "bWQ1",
        )
        .send()
        .await
        .unwrap();
    assert_eq!(customer_key.status(), StatusCode::NOT_IMPLEMENTED);

    assert_eq!(storage.open_upload_count().await.unwrap(), 0);
    let absent = client.head(format!("{base}/dst/out.bin")).send().await.unwrap();
    assert_eq!(absent.status(), StatusCode::NOT_FOUND);
}
