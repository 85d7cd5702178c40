//! HTTP handlers for object and bucket operations.
//! Streams object bodies to avoid buffering in memory. A PUT carrying
//! `x-amz-copy-source` becomes a server-side multipart copy driven by the
//! shared `CopyOrchestrator`.

use crate::{
    AppState,
    errors::AppError,
    models::{
        copy::{CopyRequest, CopySource, InitiateOptions, ObjectLocation, SseCustomerOptions},
        metadata::ObjectMetadata,
        object::Object,
    },
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use futures::StreamExt;
use serde::Deserialize;
use std::{collections::BTreeMap, io};
use tokio_util::io::ReaderStream;
use tracing::info;

const META_PREFIX: &str = "x-amz-meta-";
const COPY_SOURCE: &str = "x-amz-copy-source";
const VERSION_ID: &str = "x-amz-version-id";
const COPY_SOURCE_VERSION_ID: &str = "x-amz-copy-source-version-id";

/// `?versionId=` on object reads.
#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    #[serde(rename = "versionId")]
    pub version_id: Option<String>,
}

/// Minimal request body for `PUT /{bucket}` (create bucket).
#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    #[serde(rename = "LocationConstraint")]
    pub location_constraint: Option<String>,
}

/// PUT `/{bucket}/{*key}`: upload the body, or copy from
/// `x-amz-copy-source` when that header is present.
pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    if headers.contains_key(COPY_SOURCE) {
        return copy_object(&state, bucket, key, &headers).await;
    }

    let content_type = header_str(&headers, header::CONTENT_TYPE.as_str()).map(str::to_string);
    let metadata = user_metadata(&headers);

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = state
        .storage
        .upload_object_stream(&bucket, &key, content_type, &metadata, stream)
        .await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    let resp_headers = response.headers_mut();
    if let Some(value) = object
        .etag
        .as_ref()
        .and_then(|e| HeaderValue::from_str(&format!("\"{}\"", e)).ok())
    {
        resp_headers.insert(header::ETAG, value);
    }
    insert_version_header(resp_headers, VERSION_ID, object.version_id.as_deref());
    Ok(response)
}

async fn copy_object(
    state: &AppState,
    bucket: String,
    key: String,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let locator = header_str(headers, COPY_SOURCE)
        .ok_or_else(|| AppError::bad_request("x-amz-copy-source is not valid UTF-8"))?;
    let source = CopySource::parse(locator)?;

    let initiate_options = InitiateOptions {
        content_type: header_str(headers, header::CONTENT_TYPE.as_str()).map(str::to_string),
        metadata: user_metadata(headers),
    };
    let request = CopyRequest::new(
        source.clone(),
        ObjectLocation::new(bucket, key),
        state.copy_options,
    )
    .with_initiate_options(initiate_options)
    .with_sse(sse_options(headers));

    let result = state.copier.copy(&request).await?;
    info!("copied {} to {}/{}", source, result.bucket, result.key);

    let xml = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<CopyObjectResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
            r#"<LastModified>{}</LastModified>"#,
            r#"<ETag>"{}"</ETag>"#,
            r#"</CopyObjectResult>"#
        ),
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        xml_escape(&result.etag)
    );

    let mut response = Response::new(Body::from(xml));
    let resp_headers = response.headers_mut();
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    insert_version_header(resp_headers, VERSION_ID, result.version_id.as_deref());
    insert_version_header(
        resp_headers,
        COPY_SOURCE_VERSION_ID,
        source.version_id.as_deref(),
    );
    Ok(response)
}

/// Download an object `/{bucket}/{*key}` as a streaming response.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<VersionQuery>,
) -> Result<Response, AppError> {
    let (meta, file) = state
        .storage
        .get_object_reader(&bucket, &key, query.version_id.as_deref())
        .await?;
    let user_meta = state.storage.object_user_metadata(&meta).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta, &user_meta);
    Ok(response)
}

/// HEAD `/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<VersionQuery>,
) -> Result<Response, AppError> {
    let meta = state
        .storage
        .get_object_metadata(&bucket, &key, query.version_id.as_deref())
        .await?;
    let user_meta = state.storage.object_user_metadata(&meta).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta, &user_meta);
    Ok(response)
}

/// PUT `/{bucket}`: create bucket. The body, when present, is JSON with an
/// optional `LocationConstraint`.
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let constraint = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<CreateBucketReq>(&body)
            .map_err(|err| AppError::bad_request(format!("invalid bucket configuration: {}", err)))?
            .location_constraint
    };
    let region = constraint.unwrap_or_else(|| "local".into());

    state.storage.create_bucket(&bucket, region).await?;

    let xml = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<CreateBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
            r#"<Location>/{}</Location>"#,
            r#"</CreateBucketResult>"#
        ),
        xml_escape(&bucket)
    );
    let mut response = Response::new(Body::from(xml));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    Ok(response)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `x-amz-meta-*` request headers, keyed without the prefix.
fn user_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn sse_options(headers: &HeaderMap) -> SseCustomerOptions {
    let get = |name: &str| header_str(headers, name).map(str::to_string);
    SseCustomerOptions {
        algorithm: get("x-amz-server-side-encryption-customer-algorithm"),
        key: get("x-amz-server-side-encryption-customer-key"),
        key_md5: get("x-amz-server-side-encryption-customer-key-md5"),
        source_algorithm: get("x-amz-copy-source-server-side-encryption-customer-algorithm"),
        source_key: get("x-amz-copy-source-server-side-encryption-customer-key"),
        source_key_md5: get("x-amz-copy-source-server-side-encryption-customer-key-md5"),
    }
}

fn insert_version_header(headers: &mut HeaderMap, name: &'static str, version: Option<&str>) {
    if let Some(value) = version.and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object, user_meta: &[ObjectMetadata]) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    insert_version_header(headers, VERSION_ID, meta.version_id.as_deref());

    for pair in user_meta {
        let name = HeaderName::try_from(format!("{}{}", META_PREFIX, pair.key));
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(&pair.value)) {
            headers.insert(name, value);
        }
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
