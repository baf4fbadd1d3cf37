//! Bucket endpoints (spec §6 "Bucket endpoints: standard CRUD + `empty`").

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use crate::error::{Result, StorageError};
use crate::metadata::Bucket;
use crate::rest::AppState;

fn bucket_to_json(b: &Bucket) -> serde_json::Value {
    serde_json::json!({
        "id": b.id,
        "name": b.name,
        "owner": b.owner,
        "public": b.public,
        "sizeLimit": b.size_limit,
        "allowedMimeTypes": b.allowed_mime_types,
        "createdAt": b.created_at,
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateBucketRequest {
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub size_limit: Option<i64>,
}

#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn create(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<CreateBucketRequest>) -> Result<Json<serde_json::Value>> {
    let (ctx, identity) = state.authenticate(&headers).await?;
    if ctx.meta.get_bucket(&req.name).await?.is_some() {
        return Err(StorageError::BucketAlreadyExists);
    }
    let bucket = ctx.meta.create_bucket(&identity.owner, &req.name, req.public, req.size_limit).await?;
    Ok(Json(bucket_to_json(&bucket)))
}

#[tracing::instrument(level = "debug", skip(state, headers))]
pub async fn get(State(state): State<Arc<AppState>>, Path(bucket): Path<String>, headers: HeaderMap) -> Result<Json<serde_json::Value>> {
    let (ctx, _identity) = state.authenticate(&headers).await?;
    let bucket = ctx.meta.get_bucket(&bucket).await?.ok_or(StorageError::NoSuchBucket)?;
    Ok(Json(bucket_to_json(&bucket)))
}

/// Deletion is blocked while non-empty (spec §3 "Bucket ... Deletion is blocked while
/// non-empty"); `empty` below is the companion operation that reclaims capacity first.
#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn delete(State(state): State<Arc<AppState>>, Path(bucket): Path<String>, headers: HeaderMap) -> Result<StatusCode> {
    let (ctx, _identity) = state.authenticate(&headers).await?;
    let bucket_row = ctx.meta.get_bucket(&bucket).await?.ok_or(StorageError::NoSuchBucket)?;
    if ctx.meta.count_objects_in_bucket(bucket_row.id, 1).await? > 0 {
        return Err(StorageError::InvalidParameter("bucket is not empty".into()));
    }
    ctx.meta.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct EmptyRequest {
    #[serde(default = "default_empty_batch")]
    pub max_objects: i64,
}

fn default_empty_batch() -> i64 {
    1000
}

#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn empty(State(state): State<Arc<AppState>>, Path(bucket): Path<String>, headers: HeaderMap, Json(req): Json<EmptyRequest>) -> Result<Json<serde_json::Value>> {
    let (ctx, _identity) = state.authenticate(&headers).await?;
    let deleted = ctx.meta.empty_bucket(&bucket, req.max_objects).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}
