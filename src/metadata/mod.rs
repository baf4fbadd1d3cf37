//! Transactional metadata catalog (C2), generalized from the teacher's `meta_store::MetaStore`
//! trait and `pg_database::PostgresDatabase` impl into the full object/bucket/upload/shard
//! surface spec §4.2 names.

pub mod models;
pub mod postgres;

pub use models::*;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// The full catalog surface (spec §4.2): buckets, objects, uploads, S3 credentials, shard
/// placement, and orphan-scan support, all reachable off one pooled handle per tenant.
#[async_trait]
pub trait MetaStore: Send + Sync + std::fmt::Debug + 'static {
    async fn healthcheck(&self) -> Result<()>;

    // --- Buckets ---
    async fn create_bucket(&self, owner: &str, name: &str, public: bool, size_limit: Option<i64>) -> Result<Bucket>;
    async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>>;
    async fn get_bucket_by_id(&self, id: Uuid) -> Result<Option<Bucket>>;
    async fn list_buckets(&self, owner: Option<&str>) -> Result<Vec<Bucket>>;
    async fn delete_bucket(&self, name: &str) -> Result<()>;
    async fn empty_bucket(&self, name: &str, max_objects: i64) -> Result<u64>;
    async fn count_objects_in_bucket(&self, bucket_id: Uuid, limit: i64) -> Result<i64>;

    // --- Objects ---
    async fn get_object(&self, bucket_id: Uuid, name: &str, lock: RowLock) -> Result<Option<Object>>;
    async fn find_or_create_object_for_upload(&self, opts: FindOrCreateUpload<'_>) -> Result<Object>;
    async fn update_object_version(&self, object_id: Uuid, new_version: &str, metadata: &ObjectMetadata) -> Result<()>;
    async fn delete_object(&self, bucket_id: Uuid, name: &str) -> Result<Option<Object>>;
    async fn list_objects(&self, bucket_id: Uuid, opts: ListOptions<'_>) -> Result<ListPage>;

    /// Refreshes `lastAccessedAt` on read, independent of `version`/`metadata` (spec §4.3, used
    /// by the orphan scanner's grace window in §4.7).
    async fn touch_last_accessed(&self, object_id: Uuid) -> Result<()>;

    // --- Uploads ---
    async fn create_upload_record(&self, rec: &UploadRecord) -> Result<UploadRecord>;
    async fn get_upload_record(&self, bucket_id: Uuid, object_name: &str, version: &str) -> Result<Option<UploadRecord>>;
    async fn get_upload_record_by_id(&self, id: Uuid) -> Result<Option<UploadRecord>>;
    async fn update_upload_offset(&self, id: Uuid, new_offset: i64) -> Result<()>;
    /// Records a newly flushed backend multipart part alongside the byte offset it brought the
    /// upload to (spec §4.5, TUS-over-multipart bridging).
    async fn append_upload_part(&self, id: Uuid, new_offset: i64, part: crate::blob::UploadedPart) -> Result<()>;
    async fn delete_upload_record(&self, id: Uuid) -> Result<()>;
    async fn list_expired_uploads(&self, now: Timestamp) -> Result<Vec<UploadRecord>>;

    // --- S3 credentials ---
    async fn get_s3_credential(&self, access_key: &str) -> Result<Option<S3Credential>>;
    async fn create_s3_credential(&self, cred: &S3Credential) -> Result<()>;
    async fn delete_s3_credential(&self, access_key: &str) -> Result<()>;
    async fn list_s3_credentials(&self, tenant_id: &str) -> Result<Vec<S3Credential>>;

    // --- Shard store (spec §4.8), exposed on the same handle so reservations share the
    // metadata store's transaction/connection pool. ---
    async fn shard_get_least_loaded(&self, kind: ResourceKind) -> Result<Option<Shard>>;
    async fn shard_claim_free_slot(&self, shard_id: Uuid) -> Result<Option<i64>>;
    async fn shard_mint_slot(&self, shard_id: Uuid, capacity: i64) -> Result<Option<i64>>;
    async fn shard_insert_reservation(
        &self,
        kind: ResourceKind,
        resource_id: Uuid,
        tenant_id: &str,
        shard_id: Uuid,
        slot_no: i64,
        lease_expires_at: Timestamp,
    ) -> Result<Uuid>;
    async fn shard_confirm_reservation(&self, reservation_id: Uuid, resource_id: Uuid, tenant_id: &str) -> Result<u64>;
    async fn shard_cancel_reservation(&self, reservation_id: Uuid) -> Result<()>;
    async fn shard_expire_leases(&self, now: Timestamp) -> Result<u64>;
    async fn shard_free_by_resource(&self, resource_id: Uuid) -> Result<()>;
    async fn shard_free_by_location(&self, shard_id: Uuid, slot_no: i64) -> Result<()>;

    // --- Orphan scan support (C7) ---
    async fn object_names_in_bucket(&self, bucket_id: Uuid, before: Option<Timestamp>) -> Result<Vec<String>>;
}
