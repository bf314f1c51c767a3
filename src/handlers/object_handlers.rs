//! HTTP handlers for buckets and objects. Bodies are streamed in and out;
//! storage concerns live in `StorageService`.

use crate::{
    errors::AppError,
    models::object::{Object, ObjectRef},
    state::AppState,
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;

/// Optional body of `PUT /{bucket}`.
#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    #[serde(rename = "LocationConstraint")]
    pub location_constraint: Option<String>,
}

/// `PUT /{bucket}/{*key}`: store an object and, when enabled, announce its
/// creation to the router.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));

    let object = state
        .storage
        .put_object_stream(&bucket, &key, content_type, stream)
        .await?;

    if let Some(notifier) = &state.notifier {
        notifier.notify(ObjectRef::new(&bucket, &key));
    }

    let mut response = Response::new(Body::empty());
    if let Some(value) = object
        .etag
        .as_ref()
        .and_then(|e| HeaderValue::from_str(&format!("\"{}\"", e)).ok())
    {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// `GET /{bucket}/{*key}`: stream the payload.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, file) = state.storage.get_object_reader(&bucket, &key).await?;
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// `HEAD /{bucket}/{*key}`: headers only.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = state.storage.get_object_metadata(&bucket, &key).await?;
    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// `DELETE /{bucket}/{*key}`
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_object(&bucket, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /{bucket}`: body `{"LocationConstraint": "..."}` is optional.
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let region = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<CreateBucketReq>(&body)
            .map_err(|e| AppError::bad_request(format!("invalid bucket request: {}", e)))?
            .location_constraint
    }
    .unwrap_or_else(|| "local".into());

    let created = state.storage.create_bucket(&bucket, region).await?;
    Ok((
        StatusCode::OK,
        [(header::LOCATION, format!("/{}", created.name))],
    ))
}

/// `DELETE /{bucket}`
pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object) {
    let content_type = meta
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );

    if let Some(value) = meta
        .etag
        .as_ref()
        .and_then(|etag| HeaderValue::from_str(&format!("\"{}\"", etag)).ok())
    {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
