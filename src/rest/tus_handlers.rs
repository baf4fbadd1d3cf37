//! TUS resumable-upload REST surface (spec §4.5 / §6 "TUS endpoints"), wiring `TusEngine` (C5)
//! into the tenant-scoped router the same way `rest::objects` wires `ObjectLifecycleManager`.
//! `tus::router` only ever advertised protocol capability headers off a single engine instance;
//! these handlers resolve a fresh per-tenant `TusEngine` via [`AppState::authenticate`] instead,
//! matching how every other REST handler in this crate reaches its tenant's catalog.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::{Result, StorageError};
use crate::rest::AppState;
use crate::tus::CreateUploadRequest;

const TUS_RESUMABLE: &str = "1.0.0";

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name).and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok())
}

/// Parses `Upload-Concat` (TUS concatenation extension, SPEC_FULL.md §B): `partial` marks this
/// upload as a fragment for a later final concat; `final;<url> <url> ...` lists the fragments
/// (by their trailing `/tus/:bucket/:upload_id` path segment) to stitch together now.
fn parse_upload_concat(headers: &HeaderMap) -> (bool, Option<Vec<uuid::Uuid>>) {
    let value = headers.get("upload-concat").and_then(|v| v.to_str().ok());
    if value == Some("partial") {
        return (true, None);
    }
    if let Some(rest) = value.and_then(|v| v.strip_prefix("final;")) {
        let ids = rest.split_whitespace().filter_map(|url| url.rsplit('/').next()).filter_map(|seg| uuid::Uuid::parse_str(seg).ok()).collect();
        return (false, Some(ids));
    }
    (false, None)
}

#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn create(State(state): State<Arc<AppState>>, Path(bucket): Path<String>, headers: HeaderMap) -> Result<Response> {
    let (ctx, identity) = state.authenticate(&headers).await?;
    let object_name = headers
        .get("upload-object-name")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| StorageError::MissingParameter("Upload-Object-Name".into()))?
        .to_owned();
    let content_type = headers.get("upload-content-type").and_then(|v| v.to_str().ok()).map(str::to_owned);
    let upload_length = header_i64(&headers, "upload-length");
    let (concat_partial, concat_final_parts) = parse_upload_concat(&headers);

    let record = ctx
        .tus
        .create(&identity, &ctx.lifecycle, CreateUploadRequest { bucket: bucket.clone(), object_name, upload_length, content_type, concat_partial, concat_final_parts })
        .await?;

    let location = format!("/tus/{bucket}/{}", record.id);
    let mut resp = vec![("Tus-Resumable", TUS_RESUMABLE.to_owned()), ("Location", location), ("Upload-Offset", record.offset.to_string())];
    if record.concat_partial {
        resp.push(("Upload-Concat", "partial".to_owned()));
    }
    Ok((StatusCode::CREATED, resp).into_response())
}

#[tracing::instrument(level = "debug", skip(state, headers))]
pub async fn head(State(state): State<Arc<AppState>>, Path((bucket, upload_id)): Path<(String, String)>, headers: HeaderMap) -> Result<Response> {
    let (ctx, _identity) = state.authenticate(&headers).await?;
    let bucket_row = ctx.meta.get_bucket(&bucket).await?.ok_or(StorageError::NoSuchBucket)?;
    let upload_id = parse_upload_id(&upload_id)?;
    let record = ctx.tus.head(bucket_row.id, upload_id).await?;

    let mut resp = vec![("Tus-Resumable", TUS_RESUMABLE.to_owned()), ("Upload-Offset", record.offset.to_string())];
    if let Some(len) = record.upload_length {
        resp.push(("Upload-Length", len.to_string()));
    }
    if record.concat_partial {
        resp.push(("Upload-Concat", "partial".to_owned()));
    }
    Ok((StatusCode::OK, resp).into_response())
}

#[tracing::instrument(level = "info", skip(state, headers, body))]
pub async fn patch(
    State(state): State<Arc<AppState>>,
    Path((bucket, upload_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let (ctx, identity) = state.authenticate(&headers).await?;
    let bucket_row = ctx.meta.get_bucket(&bucket).await?.ok_or(StorageError::NoSuchBucket)?;
    let upload_id = parse_upload_id(&upload_id)?;
    let expected_offset = header_i64(&headers, "upload-offset").ok_or_else(|| StorageError::MissingParameter("Upload-Offset".into()))?;

    let record = ctx.tus.patch(bucket_row.id, upload_id, expected_offset, body).await?;

    // A concat `partial` upload becomes eligible for a final concat once complete, but is never
    // auto-finalized into a standalone catalog object on its own (spec §4.5 "where supported").
    let complete = record.upload_length.map(|total| record.offset >= total).unwrap_or(false);
    if complete && !record.concat_partial {
        ctx.tus.finalize(&identity, &bucket, bucket_row.id, upload_id, &ctx.lifecycle).await?;
    }

    Ok((StatusCode::NO_CONTENT, [("Tus-Resumable", TUS_RESUMABLE.to_owned()), ("Upload-Offset", record.offset.to_string())]).into_response())
}

#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn delete(State(state): State<Arc<AppState>>, Path((bucket, upload_id)): Path<(String, String)>, headers: HeaderMap) -> Result<StatusCode> {
    let (ctx, _identity) = state.authenticate(&headers).await?;
    let bucket_row = ctx.meta.get_bucket(&bucket).await?.ok_or(StorageError::NoSuchBucket)?;
    let upload_id = parse_upload_id(&upload_id)?;
    ctx.tus.abort(bucket_row.id, upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_upload_id(s: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(s).map_err(|e| StorageError::InvalidParameter(format!("invalid upload id: {e}")))
}
