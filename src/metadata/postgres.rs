use std::fmt::Debug;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use super::models::*;
use super::MetaStore;
use crate::error::{try_, Result, StorageError};

/// Postgres-backed [`MetaStore`], generalized from the teacher's `PostgresDatabase` (same
/// `try_!`/`#[tracing::instrument]` idiom, runtime-bound `sqlx::query` rather than the
/// compile-time `query!` macro so the schema can evolve without a live database at build time).
pub struct PgMetaStore {
    pool: PgPool,
}

impl Debug for PgMetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgMetaStore").finish()
    }
}

impl PgMetaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}


#[async_trait]
impl MetaStore for PgMetaStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn healthcheck(&self) -> Result<()> {
        try_!(sqlx::query("SELECT 1").execute(&self.pool).await);
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn create_bucket(&self, owner: &str, name: &str, public: bool, size_limit: Option<i64>) -> Result<Bucket> {
        let existing = try_!(sqlx::query("SELECT 1 FROM buckets WHERE name = $1").bind(name).fetch_optional(&self.pool).await);
        if existing.is_some() {
            return Err(StorageError::BucketAlreadyExists);
        }
        let bucket = try_!(
            sqlx::query_as::<_, Bucket>(
                r#"INSERT INTO buckets (id, name, owner, public, size_limit, created_at)
                   VALUES (gen_random_uuid(), $1, $2, $3, $4, now())
                   RETURNING id, name, owner, public, size_limit, allowed_mime_types, disk_reference, created_at"#
            )
            .bind(name)
            .bind(owner)
            .bind(public)
            .bind(size_limit)
            .fetch_one(&self.pool)
            .await
        );
        Ok(bucket)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>> {
        let row = try_!(
            sqlx::query_as::<_, Bucket>(
                r#"SELECT id, name, owner, public, size_limit, allowed_mime_types, disk_reference, created_at
                   FROM buckets WHERE name = $1"#
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await
        );
        Ok(row)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_bucket_by_id(&self, id: Uuid) -> Result<Option<Bucket>> {
        let row = try_!(
            sqlx::query_as::<_, Bucket>(
                r#"SELECT id, name, owner, public, size_limit, allowed_mime_types, disk_reference, created_at
                   FROM buckets WHERE id = $1"#
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        );
        Ok(row)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_buckets(&self, owner: Option<&str>) -> Result<Vec<Bucket>> {
        let rows = try_!(
            sqlx::query_as::<_, Bucket>(
                r#"SELECT id, name, owner, public, size_limit, allowed_mime_types, disk_reference, created_at
                   FROM buckets WHERE ($1::text IS NULL OR owner = $1) ORDER BY name ASC"#
            )
            .bind(owner)
            .fetch_all(&self.pool)
            .await
        );
        Ok(rows)
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let count = try_!(sqlx::query("SELECT count(*) AS c FROM objects o JOIN buckets b ON o.bucket_id = b.id WHERE b.name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await);
        let count: i64 = try_!(count.try_get("c"));
        if count > 0 {
            return Err(StorageError::InvalidParameter("bucket is not empty".into()));
        }
        try_!(sqlx::query("DELETE FROM buckets WHERE name = $1").bind(name).execute(&self.pool).await);
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn empty_bucket(&self, name: &str, max_objects: i64) -> Result<u64> {
        let Some(bucket) = self.get_bucket(name).await? else {
            return Err(StorageError::NoSuchBucket);
        };
        let count = self.count_objects_in_bucket(bucket.id, max_objects + 1).await?;
        if count > max_objects {
            // spec §9: "UnableToEmptyBucket" threshold.
            return Err(StorageError::InvalidParameter(format!(
                "bucket has more than {max_objects} objects; refusing to empty in one pass"
            )));
        }
        let result = try_!(sqlx::query("DELETE FROM objects WHERE bucket_id = $1").bind(bucket.id).execute(&self.pool).await);
        Ok(result.rows_affected())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn count_objects_in_bucket(&self, bucket_id: Uuid, limit: i64) -> Result<i64> {
        let row = try_!(
            sqlx::query("SELECT count(*) AS c FROM (SELECT 1 FROM objects WHERE bucket_id = $1 LIMIT $2) t")
                .bind(bucket_id)
                .bind(limit)
                .fetch_one(&self.pool)
                .await
        );
        Ok(try_!(row.try_get("c")))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_object(&self, bucket_id: Uuid, name: &str, lock: RowLock) -> Result<Option<Object>> {
        let sql = format!(
            r#"SELECT id, bucket_id, name, owner, metadata, user_metadata, last_accessed_at, version, created_at, updated_at
               FROM objects WHERE bucket_id = $1 AND name = $2{}"#,
            lock.sql_suffix()
        );
        let row = try_!(sqlx::query_as::<_, Object>(&sql).bind(bucket_id).bind(name).fetch_optional(&self.pool).await);
        Ok(row)
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn find_or_create_object_for_upload(&self, opts: FindOrCreateUpload<'_>) -> Result<Object> {
        let mut tx = try_!(self.pool.begin().await);
        let existing = try_!(
            sqlx::query_as::<_, Object>(
                r#"SELECT id, bucket_id, name, owner, metadata, user_metadata, last_accessed_at, version, created_at, updated_at
                   FROM objects WHERE bucket_id = $1 AND name = $2 FOR UPDATE"#
            )
            .bind(opts.bucket_id)
            .bind(opts.object_name)
            .fetch_optional(&mut *tx)
            .await
        );

        if let Some(existing) = existing {
            if !opts.is_upsert {
                return Err(StorageError::KeyAlreadyExists);
            }
            try_!(tx.commit().await);
            return Ok(existing);
        }

        let empty_meta = Json(ObjectMetadata::default());
        let user_meta = Json(opts.user_metadata.clone().unwrap_or_else(|| serde_json::Value::Object(Default::default())));
        let created = try_!(
            sqlx::query_as::<_, Object>(
                r#"INSERT INTO objects (id, bucket_id, name, owner, metadata, user_metadata, version, created_at, updated_at)
                   VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, now(), now())
                   RETURNING id, bucket_id, name, owner, metadata, user_metadata, last_accessed_at, version, created_at, updated_at"#
            )
            .bind(opts.bucket_id)
            .bind(opts.object_name)
            .bind(opts.owner)
            .bind(empty_meta)
            .bind(user_meta)
            .bind(opts.version)
            .fetch_one(&mut *tx)
            .await
        );
        try_!(tx.commit().await);
        Ok(created)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn update_object_version(&self, object_id: Uuid, new_version: &str, metadata: &ObjectMetadata) -> Result<()> {
        try_!(
            sqlx::query("UPDATE objects SET version = $2, metadata = $3, updated_at = now() WHERE id = $1")
                .bind(object_id)
                .bind(new_version)
                .bind(Json(metadata))
                .execute(&self.pool)
                .await
        );
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn touch_last_accessed(&self, object_id: Uuid) -> Result<()> {
        try_!(sqlx::query("UPDATE objects SET last_accessed_at = now() WHERE id = $1").bind(object_id).execute(&self.pool).await);
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn delete_object(&self, bucket_id: Uuid, name: &str) -> Result<Option<Object>> {
        let row = try_!(
            sqlx::query_as::<_, Object>(
                r#"DELETE FROM objects WHERE bucket_id = $1 AND name = $2
                   RETURNING id, bucket_id, name, owner, metadata, user_metadata, last_accessed_at, version, created_at, updated_at"#
            )
            .bind(bucket_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
        );
        Ok(row)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_objects(&self, bucket_id: Uuid, opts: ListOptions<'_>) -> Result<ListPage> {
        let like_pattern = opts.prefix.map(|p| format!("{p}%"));
        let rows = try_!(
            sqlx::query_as::<_, Object>(
                r#"SELECT id, bucket_id, name, owner, metadata, user_metadata, last_accessed_at, version, created_at, updated_at
                   FROM objects
                   WHERE bucket_id = $1
                     AND ($2::text IS NULL OR name LIKE $2)
                     AND ($3::text IS NULL OR name > $3)
                     AND ($4::timestamptz IS NULL OR created_at < $4)
                   ORDER BY name ASC
                   LIMIT $5"#
            )
            .bind(bucket_id)
            .bind(like_pattern)
            .bind(opts.start_after.or(opts.next_token))
            .bind(opts.before_date)
            .bind(opts.max_keys)
            .fetch_all(&self.pool)
            .await
        );
        let next_token = if rows.len() as i64 == opts.max_keys { rows.last().map(|o| o.name.clone()) } else { None };
        Ok(ListPage { entries: rows, next_token })
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn create_upload_record(&self, rec: &UploadRecord) -> Result<UploadRecord> {
        let row = try_!(
            sqlx::query_as::<_, UploadRecord>(
                r#"INSERT INTO uploads (id, bucket_id, object_name, version, kind, "offset", upload_length,
                                        backend_upload_id, parts, content_type, cache_control, concat_partial, created_at, expires_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now(), $13)
                   RETURNING id, bucket_id, object_name, version, kind, "offset", upload_length,
                             backend_upload_id, parts, content_type, cache_control, concat_partial, created_at, expires_at"#
            )
            .bind(rec.id)
            .bind(rec.bucket_id)
            .bind(&rec.object_name)
            .bind(&rec.version)
            .bind(rec.kind)
            .bind(rec.offset)
            .bind(rec.upload_length)
            .bind(&rec.backend_upload_id)
            .bind(&rec.parts)
            .bind(&rec.content_type)
            .bind(&rec.cache_control)
            .bind(rec.concat_partial)
            .bind(rec.expires_at)
            .fetch_one(&self.pool)
            .await
        );
        Ok(row)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_upload_record(&self, bucket_id: Uuid, object_name: &str, version: &str) -> Result<Option<UploadRecord>> {
        let row = try_!(
            sqlx::query_as::<_, UploadRecord>(
                r#"SELECT id, bucket_id, object_name, version, kind, "offset", upload_length,
                          backend_upload_id, parts, content_type, cache_control, concat_partial, created_at, expires_at
                   FROM uploads WHERE bucket_id = $1 AND object_name = $2 AND version = $3"#
            )
            .bind(bucket_id)
            .bind(object_name)
            .bind(version)
            .fetch_optional(&self.pool)
            .await
        );
        Ok(row)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_upload_record_by_id(&self, id: Uuid) -> Result<Option<UploadRecord>> {
        let row = try_!(
            sqlx::query_as::<_, UploadRecord>(
                r#"SELECT id, bucket_id, object_name, version, kind, "offset", upload_length,
                          backend_upload_id, parts, content_type, cache_control, concat_partial, created_at, expires_at
                   FROM uploads WHERE id = $1"#
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        );
        Ok(row)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn update_upload_offset(&self, id: Uuid, new_offset: i64) -> Result<()> {
        try_!(sqlx::query(r#"UPDATE uploads SET "offset" = $2 WHERE id = $1"#).bind(id).bind(new_offset).execute(&self.pool).await);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn append_upload_part(&self, id: Uuid, new_offset: i64, part: crate::blob::UploadedPart) -> Result<()> {
        try_!(
            sqlx::query(r#"UPDATE uploads SET "offset" = $2, parts = parts || $3::jsonb WHERE id = $1"#)
                .bind(id)
                .bind(new_offset)
                .bind(Json(vec![part]))
                .execute(&self.pool)
                .await
        );
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_upload_record(&self, id: Uuid) -> Result<()> {
        try_!(sqlx::query("DELETE FROM uploads WHERE id = $1").bind(id).execute(&self.pool).await);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_expired_uploads(&self, now: Timestamp) -> Result<Vec<UploadRecord>> {
        let rows = try_!(
            sqlx::query_as::<_, UploadRecord>(
                r#"SELECT id, bucket_id, object_name, version, kind, "offset", upload_length,
                          backend_upload_id, parts, content_type, cache_control, concat_partial, created_at, expires_at
                   FROM uploads WHERE expires_at < $1"#
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await
        );
        Ok(rows)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_s3_credential(&self, access_key: &str) -> Result<Option<S3Credential>> {
        let row = try_!(
            sqlx::query_as::<_, S3Credential>(
                r#"SELECT access_key, encrypted_secret_key, tenant_id, role, sub, created_at
                   FROM s3_credentials WHERE access_key = $1"#
            )
            .bind(access_key)
            .fetch_optional(&self.pool)
            .await
        );
        Ok(row)
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn create_s3_credential(&self, cred: &S3Credential) -> Result<()> {
        try_!(
            sqlx::query(
                r#"INSERT INTO s3_credentials (access_key, encrypted_secret_key, tenant_id, role, sub, created_at)
                   VALUES ($1, $2, $3, $4, $5, now())"#
            )
            .bind(&cred.access_key)
            .bind(&cred.encrypted_secret_key)
            .bind(&cred.tenant_id)
            .bind(&cred.role)
            .bind(&cred.sub)
            .execute(&self.pool)
            .await
        );
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn delete_s3_credential(&self, access_key: &str) -> Result<()> {
        try_!(sqlx::query("DELETE FROM s3_credentials WHERE access_key = $1").bind(access_key).execute(&self.pool).await);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_s3_credentials(&self, tenant_id: &str) -> Result<Vec<S3Credential>> {
        let rows = try_!(
            sqlx::query_as::<_, S3Credential>(
                r#"SELECT access_key, encrypted_secret_key, tenant_id, role, sub, created_at
                   FROM s3_credentials WHERE tenant_id = $1 ORDER BY created_at ASC"#
            )
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
        );
        Ok(rows)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn shard_get_least_loaded(&self, kind: ResourceKind) -> Result<Option<Shard>> {
        // free_capacity = (capacity - next_slot) + free existing slots (spec §4.8 step 2).
        let row = try_!(
            sqlx::query_as::<_, Shard>(
                r#"SELECT s.id, s.kind, s.shard_key, s.capacity, s.next_slot, s.status
                   FROM shards s
                   WHERE s.kind = $1 AND s.status = 'active'
                   ORDER BY (
                     (s.capacity - s.next_slot) + (
                       SELECT count(*) FROM shard_slots sl
                       WHERE sl.shard_id = s.id AND sl.resource_id IS NULL
                         AND NOT EXISTS (
                           SELECT 1 FROM shard_reservations r
                           WHERE r.shard_id = sl.shard_id AND r.slot_no = sl.slot_no
                             AND r.status = 'pending' AND r.lease_expires_at > now()
                         )
                     )
                   ) DESC, s.shard_key ASC
                   LIMIT 1"#
            )
            .bind(kind)
            .fetch_optional(&self.pool)
            .await
        );
        Ok(row)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn shard_claim_free_slot(&self, shard_id: Uuid) -> Result<Option<i64>> {
        let row = try_!(
            sqlx::query(
                r#"SELECT sl.slot_no FROM shard_slots sl
                   WHERE sl.shard_id = $1 AND sl.resource_id IS NULL
                     AND NOT EXISTS (
                       SELECT 1 FROM shard_reservations r
                       WHERE r.shard_id = sl.shard_id AND r.slot_no = sl.slot_no
                         AND r.status = 'pending' AND r.lease_expires_at > now()
                     )
                   ORDER BY sl.slot_no ASC
                   FOR UPDATE OF sl SKIP LOCKED
                   LIMIT 1"#
            )
            .bind(shard_id)
            .fetch_optional(&self.pool)
            .await
        );
        Ok(row.map(|r| r.try_get::<i64, _>("slot_no")).transpose().map_err(StorageError::from)?)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn shard_mint_slot(&self, shard_id: Uuid, capacity: i64) -> Result<Option<i64>> {
        let mut tx = try_!(self.pool.begin().await);
        let row = try_!(
            sqlx::query(
                r#"UPDATE shards SET next_slot = next_slot + 1
                   WHERE id = $1 AND next_slot < $2
                   RETURNING next_slot - 1 AS minted"#
            )
            .bind(shard_id)
            .bind(capacity)
            .fetch_optional(&mut *tx)
            .await
        );
        let Some(row) = row else {
            try_!(tx.rollback().await);
            return Ok(None);
        };
        let slot_no: i64 = try_!(row.try_get("minted"));
        try_!(
            sqlx::query("INSERT INTO shard_slots (shard_id, slot_no, resource_id, tenant_id) VALUES ($1, $2, NULL, NULL)")
                .bind(shard_id)
                .bind(slot_no)
                .execute(&mut *tx)
                .await
        );
        try_!(tx.commit().await);
        Ok(Some(slot_no))
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn shard_insert_reservation(
        &self,
        kind: ResourceKind,
        resource_id: Uuid,
        tenant_id: &str,
        shard_id: Uuid,
        slot_no: i64,
        lease_expires_at: Timestamp,
    ) -> Result<Uuid> {
        let row = try_!(
            sqlx::query(
                r#"INSERT INTO shard_reservations (id, kind, resource_id, tenant_id, shard_id, slot_no, status, lease_expires_at)
                   VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, 'pending', $6)
                   RETURNING id"#
            )
            .bind(kind)
            .bind(resource_id)
            .bind(tenant_id)
            .bind(shard_id)
            .bind(slot_no)
            .bind(lease_expires_at)
            .fetch_one(&self.pool)
            .await
        );
        Ok(try_!(row.try_get("id")))
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn shard_confirm_reservation(&self, reservation_id: Uuid, resource_id: Uuid, tenant_id: &str) -> Result<u64> {
        let mut tx = try_!(self.pool.begin().await);
        let reservation = try_!(
            sqlx::query_as::<_, ShardReservation>(
                r#"SELECT id, kind, resource_id, tenant_id, shard_id, slot_no, status, lease_expires_at
                   FROM shard_reservations WHERE id = $1 FOR UPDATE"#
            )
            .bind(reservation_id)
            .fetch_optional(&mut *tx)
            .await
        );
        let Some(reservation) = reservation else {
            try_!(tx.rollback().await);
            return Err(StorageError::InvalidParameter("no such reservation".into()));
        };

        if reservation.status == ReservationStatus::Confirmed {
            try_!(tx.rollback().await);
            return Ok(0); // idempotent no-op
        }
        if reservation.status != ReservationStatus::Pending || reservation.lease_expires_at < now_utc() {
            try_!(tx.rollback().await);
            return Err(StorageError::InvalidParameter("reservation lease has expired".into()));
        }

        try_!(
            sqlx::query("UPDATE shard_slots SET resource_id = $3, tenant_id = $4 WHERE shard_id = $1 AND slot_no = $2")
                .bind(reservation.shard_id)
                .bind(reservation.slot_no)
                .bind(resource_id)
                .bind(tenant_id)
                .execute(&mut *tx)
                .await
        );
        let result = try_!(sqlx::query("UPDATE shard_reservations SET status = 'confirmed' WHERE id = $1")
            .bind(reservation_id)
            .execute(&mut *tx)
            .await);
        try_!(tx.commit().await);
        Ok(result.rows_affected())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn shard_cancel_reservation(&self, reservation_id: Uuid) -> Result<()> {
        try_!(
            sqlx::query("UPDATE shard_reservations SET status = 'cancelled' WHERE id = $1 AND status = 'pending'")
                .bind(reservation_id)
                .execute(&self.pool)
                .await
        );
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn shard_expire_leases(&self, now: Timestamp) -> Result<u64> {
        let result = try_!(
            sqlx::query("UPDATE shard_reservations SET status = 'expired' WHERE status = 'pending' AND lease_expires_at < $1")
                .bind(now)
                .execute(&self.pool)
                .await
        );
        Ok(result.rows_affected())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn shard_free_by_resource(&self, resource_id: Uuid) -> Result<()> {
        let mut tx = try_!(self.pool.begin().await);
        try_!(sqlx::query("UPDATE shard_slots SET resource_id = NULL, tenant_id = NULL WHERE resource_id = $1")
            .bind(resource_id)
            .execute(&mut *tx)
            .await);
        try_!(sqlx::query("DELETE FROM shard_reservations WHERE resource_id = $1").bind(resource_id).execute(&mut *tx).await);
        try_!(tx.commit().await);
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn shard_free_by_location(&self, shard_id: Uuid, slot_no: i64) -> Result<()> {
        let mut tx = try_!(self.pool.begin().await);
        try_!(
            sqlx::query("UPDATE shard_slots SET resource_id = NULL, tenant_id = NULL WHERE shard_id = $1 AND slot_no = $2")
                .bind(shard_id)
                .bind(slot_no)
                .execute(&mut *tx)
                .await
        );
        try_!(
            sqlx::query("DELETE FROM shard_reservations WHERE shard_id = $1 AND slot_no = $2")
                .bind(shard_id)
                .bind(slot_no)
                .execute(&mut *tx)
                .await
        );
        try_!(tx.commit().await);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn object_names_in_bucket(&self, bucket_id: Uuid, before: Option<Timestamp>) -> Result<Vec<String>> {
        let rows = try_!(
            sqlx::query("SELECT name FROM objects WHERE bucket_id = $1 AND ($2::timestamptz IS NULL OR created_at < $2)")
                .bind(bucket_id)
                .bind(before)
                .fetch_all(&self.pool)
                .await
        );
        rows.into_iter().map(|r| r.try_get::<String, _>("name").map_err(StorageError::from)).collect()
    }
}

fn now_utc() -> Timestamp {
    time::OffsetDateTime::now_utc()
}

