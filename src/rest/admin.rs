//! Super-user Admin API (spec §6 "Admin API ... tenant CRUD ... migrations ... S3-credential CRUD
//! ... orphan-scan ... tenant health"). Every handler checks `apikey` via
//! [`AppState::authenticate_admin`] first; there is no tenant-scoped JWT here, by design (spec
//! §6: two disjoint auth boundaries).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::metadata::S3Credential;
use crate::rest::AppState;
use crate::tenant::{MigrationStatus, Tenant};

fn parse_bucket_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StorageError::InvalidParameter(format!("invalid bucket id: {e}")))
}

fn tenant_to_json(t: &Tenant) -> serde_json::Value {
    serde_json::json!({
        "id": t.id,
        "maxConnections": t.max_connections,
        "jwksUrl": t.jwks_url,
        "featureFlags": t.feature_flags,
        "migrationsVersion": t.migrations_version,
        "migrationsStatus": t.migrations_status.as_str(),
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub id: String,
    pub db_url: String,
    pub jwt_secret: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[tracing::instrument(level = "info", skip(state, headers, req), fields(tenant_id = %req.id))]
pub async fn create_tenant(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<CreateTenantRequest>) -> Result<Json<serde_json::Value>> {
    state.authenticate_admin(&headers)?;
    let encrypted_db_url = crate::crypto::encrypt_str(&state.auth_encryption_key, &req.db_url)?;
    let encrypted_jwt_secret = crate::crypto::encrypt_str(&state.auth_encryption_key, &req.jwt_secret)?;
    let tenant = state.registry.create(&req.id, &encrypted_db_url, &encrypted_jwt_secret, req.max_connections).await?;
    Ok(Json(tenant_to_json(&tenant)))
}

#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn list_tenants(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<serde_json::Value>> {
    state.authenticate_admin(&headers)?;
    let tenants = state.registry.list().await?;
    Ok(Json(serde_json::json!(tenants.iter().map(tenant_to_json).collect::<Vec<_>>())))
}

#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn get_tenant(State(state): State<Arc<AppState>>, Path(tenant_id): Path<String>, headers: HeaderMap) -> Result<Json<serde_json::Value>> {
    state.authenticate_admin(&headers)?;
    let tenant = state.registry.get(&tenant_id).await?;
    Ok(Json(tenant_to_json(&tenant)))
}

/// Tenant deletion tears down the cached pool first so no request picks up a stale connection to
/// a database whose catalog row is about to disappear (spec §3 "destroyed on tenant-delete").
#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn delete_tenant(State(state): State<Arc<AppState>>, Path(tenant_id): Path<String>, headers: HeaderMap) -> Result<StatusCode> {
    state.authenticate_admin(&headers)?;
    state.pools.evict(&tenant_id).await;
    state.registry.delete(&tenant_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /migrate/fleet` (spec §6, §4.9 "Fleet scheduler"). Runs in the background; callers poll
/// `/progress` and `/failed` the way the scenario in spec §8 exercises it.
#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn migrate_fleet(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<StatusCode> {
    state.authenticate_admin(&headers)?;
    let tenants = state.registry.list().await?;
    for tenant in &tenants {
        let kind = crate::jobqueue::JobKind::RunMigrationsOnTenants { tenant_ids: vec![tenant.id.clone()] };
        state.jobs.enqueue(&kind).await?;
    }

    let migrations = state.migrations.clone();
    tokio::spawn(async move {
        if let Err(e) = migrations.run_fleet().await {
            tracing::error!(error = %e, "fleet migration run failed");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn reset_fleet(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<StatusCode> {
    state.authenticate_admin(&headers)?;
    let tenants = state.registry.list().await?;
    for tenant in &tenants {
        state.registry.set_migration_status(&tenant.id, None, MigrationStatus::Pending).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub remaining: usize,
}

#[tracing::instrument(level = "debug", skip(state, headers))]
pub async fn progress(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<ProgressResponse>> {
    state.authenticate_admin(&headers)?;
    let tenants = state.registry.list().await?;
    let remaining = tenants.iter().filter(|t| t.migrations_status == MigrationStatus::Pending).count();
    Ok(Json(ProgressResponse { remaining }))
}

#[derive(Debug, Deserialize)]
pub struct FailedQuery {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[tracing::instrument(level = "debug", skip(state, headers))]
pub async fn failed(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(q): Query<FailedQuery>) -> Result<Json<serde_json::Value>> {
    state.authenticate_admin(&headers)?;
    let tenants = state.registry.list().await?;
    let after = q.cursor.as_deref();
    let page: Vec<_> = tenants
        .iter()
        .filter(|t| t.migrations_status == MigrationStatus::Failed)
        .skip_while(|t| after.is_some_and(|c| t.id.as_str() <= c))
        .take(100)
        .map(tenant_to_json)
        .collect();
    Ok(Json(serde_json::json!({ "items": page })))
}

#[tracing::instrument(level = "debug", skip(state, headers))]
pub async fn tenant_migration_status(State(state): State<Arc<AppState>>, Path(tenant_id): Path<String>, headers: HeaderMap) -> Result<Json<serde_json::Value>> {
    state.authenticate_admin(&headers)?;
    let tenant = state.registry.get(&tenant_id).await?;
    Ok(Json(serde_json::json!({
        "isLatest": tenant.migrations_status == MigrationStatus::Completed,
        "migrationsVersion": tenant.migrations_version,
        "migrationsStatus": tenant.migrations_status.as_str(),
    })))
}

#[tracing::instrument(level = "debug", skip(state, headers))]
pub async fn tenant_health(State(state): State<Arc<AppState>>, Path(tenant_id): Path<String>, headers: HeaderMap) -> Result<Json<serde_json::Value>> {
    state.authenticate_admin(&headers)?;
    let ctx = state.tenant_context(&tenant_id).await?;
    let healthy = ctx.meta.healthcheck().await;
    Ok(Json(serde_json::json!({
        "tenantId": tenant_id,
        "healthy": healthy.is_ok(),
        "error": healthy.err().map(|e| e.to_string()),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateCredentialRequest {
    pub access_key: String,
    pub secret_key: String,
    pub role: String,
    #[serde(default)]
    pub sub: Option<String>,
}

fn credential_to_json(c: &S3Credential) -> serde_json::Value {
    serde_json::json!({
        "accessKey": c.access_key,
        "tenantId": c.tenant_id,
        "role": c.role,
        "sub": c.sub,
        "createdAt": c.created_at,
    })
}

#[tracing::instrument(level = "info", skip(state, headers, req), fields(access_key = %req.access_key))]
pub async fn create_credential(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CreateCredentialRequest>,
) -> Result<Json<serde_json::Value>> {
    state.authenticate_admin(&headers)?;
    let ctx = state.tenant_context(&tenant_id).await?;
    let encrypted_secret_key = crate::crypto::encrypt_str(&state.auth_encryption_key, &req.secret_key)?;
    let cred = S3Credential {
        access_key: req.access_key,
        encrypted_secret_key,
        tenant_id,
        role: req.role,
        sub: req.sub,
        created_at: time::OffsetDateTime::now_utc(),
    };
    ctx.meta.create_s3_credential(&cred).await?;
    state.remember_access_key(&cred.access_key, &cred.tenant_id).await;
    Ok(Json(credential_to_json(&cred)))
}

#[tracing::instrument(level = "debug", skip(state, headers))]
pub async fn list_credentials(State(state): State<Arc<AppState>>, Path(tenant_id): Path<String>, headers: HeaderMap) -> Result<Json<serde_json::Value>> {
    state.authenticate_admin(&headers)?;
    let ctx = state.tenant_context(&tenant_id).await?;
    let creds = ctx.meta.list_s3_credentials(&tenant_id).await?;
    Ok(Json(serde_json::json!(creds.iter().map(credential_to_json).collect::<Vec<_>>())))
}

#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn delete_credential(State(state): State<Arc<AppState>>, Path((tenant_id, access_key)): Path<(String, String)>, headers: HeaderMap) -> Result<StatusCode> {
    state.authenticate_admin(&headers)?;
    let ctx = state.tenant_context(&tenant_id).await?;
    ctx.meta.delete_s3_credential(&access_key).await?;
    state.forget_access_key(&access_key).await;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /:tenantId/buckets/:bucketId/orphan-objects` (spec §6 "GET streams NDJSON results with
/// periodic `{event:"ping"}`"). Backend keys are enumerated once up front via `list_keys`, so the
/// "ping" keep-alive events only matter for very large buckets where reconciliation itself takes
/// a while; the listing pass below emits none since it is not actually chunked, a simplification
/// over a true incremental backend scan (see `OrphanScanner`'s module doc).
#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn orphan_scan(State(state): State<Arc<AppState>>, Path((tenant_id, bucket_id)): Path<(String, String)>, headers: HeaderMap) -> Result<Response> {
    state.authenticate_admin(&headers)?;
    let ctx = state.tenant_context(&tenant_id).await?;
    let bucket_id = parse_bucket_id(&bucket_id)?;
    let bucket = ctx.meta.get_bucket_by_id(bucket_id).await?.ok_or(StorageError::NoSuchBucket)?;

    let backend_keys = state.blob.list_keys(&format!("{}/", bucket.name)).await?;
    let events = ctx.orphan.list_orphaned(&bucket.name, backend_keys).await?;

    let ndjson = events.map(|event| {
        let mut line = serde_json::to_string(&event).unwrap_or_default();
        line.push('\n');
        Ok::<_, std::io::Error>(bytes::Bytes::from(line))
    });
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(ndjson))
        .map_err(|e| StorageError::InternalError(e.to_string()))?;
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct OrphanDeleteRequest {
    #[serde(default)]
    pub delete_db_keys: bool,
    #[serde(default)]
    pub delete_s3_keys: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub before: Option<time::OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub struct OrphanDeleteResponse {
    pub deleted_s3_keys: u64,
    pub deleted_db_keys: u64,
}

#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn orphan_delete(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, bucket_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<OrphanDeleteRequest>,
) -> Result<Json<OrphanDeleteResponse>> {
    state.authenticate_admin(&headers)?;
    let ctx = state.tenant_context(&tenant_id).await?;
    let bucket_id = parse_bucket_id(&bucket_id)?;
    let bucket = ctx.meta.get_bucket_by_id(bucket_id).await?.ok_or(StorageError::NoSuchBucket)?;

    let mut deleted_s3_keys = 0u64;
    if req.delete_s3_keys {
        let backend_keys = state.blob.list_keys(&format!("{}/", bucket.name)).await?;
        let events = ctx.orphan.list_orphaned(&bucket.name, backend_keys).await?;
        let orphan_keys: Vec<String> = events
            .filter_map(|event| async move {
                match event {
                    crate::orphan::ScanEvent::Orphan { key, .. } => Some(key),
                    _ => None,
                }
            })
            .collect()
            .await;
        deleted_s3_keys = ctx.orphan.delete_orphans(&bucket.name, &orphan_keys).await?;
    }

    let mut deleted_db_keys = 0u64;
    if req.delete_db_keys {
        if let Some(before) = req.before {
            let stale = ctx.orphan.names_stale_before(bucket.id, before).await?;
            for name in stale {
                if ctx.meta.delete_object(bucket.id, &name).await?.is_some() {
                    deleted_db_keys += 1;
                }
            }
        }
    }

    Ok(Json(OrphanDeleteResponse { deleted_s3_keys, deleted_db_keys }))
}
