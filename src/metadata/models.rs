//! Data model from spec §3, generalized from the teacher's `Bucket`/`Object`/`Blob` structs in
//! `meta_store.rs` into the full catalog: buckets, objects, object versions, upload records,
//! S3 credentials, and the shard placement rows (§4.8).

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::blob::UploadedPart;

pub type Timestamp = OffsetDateTime;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Bucket {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    pub public: bool,
    pub size_limit: Option<i64>,
    pub allowed_mime_types: Option<Vec<String>>,
    pub disk_reference: Option<String>,
    pub created_at: Timestamp,
}

/// System-managed object metadata (spec §3 "Object": `metadata (system: size, mime, etag,
/// lastModified, cacheControl, contentRange)`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObjectMetadata {
    pub size: i64,
    pub mime: Option<String>,
    pub etag: Option<String>,
    #[serde(rename = "lastModified")]
    pub last_modified: Option<Timestamp>,
    #[serde(rename = "cacheControl")]
    pub cache_control: Option<String>,
    #[serde(rename = "contentRange")]
    pub content_range: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Object {
    pub id: Uuid,
    pub bucket_id: Uuid,
    pub name: String,
    pub owner: String,
    pub metadata: Json<ObjectMetadata>,
    pub user_metadata: Json<serde_json::Value>,
    pub last_accessed_at: Option<Timestamp>,
    /// Current live version token (spec §3 "Object Version").
    pub version: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum UploadKind {
    Standard,
    Multipart,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadRecord {
    pub id: Uuid,
    pub bucket_id: Uuid,
    pub object_name: String,
    pub version: String,
    pub kind: UploadKind,
    /// TUS byte offset accepted so far; `None` until `Upload-Length` is known (defer-length).
    pub offset: i64,
    pub upload_length: Option<i64>,
    /// Backend multipart upload id, when `kind == Multipart`.
    pub backend_upload_id: Option<String>,
    /// Parts already flushed to the backend multipart upload, in completion order.
    pub parts: Json<Vec<UploadedPart>>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    /// Set when this upload was created with `Upload-Concat: partial` (TUS concatenation
    /// extension, spec §4.5 "where supported"). A partial upload is never auto-finalized into a
    /// catalog object on its own; it only becomes reachable once a `final` upload consumes it.
    pub concat_partial: bool,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct S3Credential {
    pub access_key: String,
    pub encrypted_secret_key: String,
    pub tenant_id: String,
    pub role: String,
    pub sub: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ResourceKind {
    Vector,
    #[sqlx(rename = "iceberg-table")]
    IcebergTable,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::IcebergTable => "iceberg-table",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ShardStatus {
    Active,
    Draining,
    Disabled,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Shard {
    pub id: Uuid,
    pub kind: ResourceKind,
    pub shard_key: String,
    pub capacity: i64,
    pub next_slot: i64,
    pub status: ShardStatus,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShardSlot {
    pub shard_id: Uuid,
    pub slot_no: i64,
    pub resource_id: Option<Uuid>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShardReservation {
    pub id: Uuid,
    pub kind: ResourceKind,
    pub resource_id: Uuid,
    pub tenant_id: String,
    pub shard_id: Uuid,
    pub slot_no: i64,
    pub status: ReservationStatus,
    pub lease_expires_at: Timestamp,
}

/// Options accepted by `findOrCreateObjectForUpload` (spec §4.2).
pub struct FindOrCreateUpload<'a> {
    pub bucket_id: Uuid,
    pub object_name: &'a str,
    pub version: &'a str,
    pub owner: &'a str,
    pub is_upsert: bool,
    pub user_metadata: Option<serde_json::Value>,
}

/// Row-lock mode accepted by object reads inside a transaction (spec §4.2 "Object CRUD with
/// optional row lock").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    None,
    ForUpdate,
    ForShare,
    ForKeyShare,
}

impl RowLock {
    pub fn sql_suffix(self) -> &'static str {
        match self {
            Self::None => "",
            Self::ForUpdate => " FOR UPDATE",
            Self::ForShare => " FOR SHARE",
            Self::ForKeyShare => " FOR KEY SHARE",
        }
    }
}

pub struct ListOptions<'a> {
    pub prefix: Option<&'a str>,
    pub delimiter: Option<&'a str>,
    pub next_token: Option<&'a str>,
    pub start_after: Option<&'a str>,
    pub before_date: Option<Timestamp>,
    pub max_keys: i64,
}

pub struct ListPage {
    pub entries: Vec<Object>,
    pub next_token: Option<String>,
}
