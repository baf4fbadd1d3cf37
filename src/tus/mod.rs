//! TUS resumable upload engine (C5). No teacher precedent (`s3s-rados` only ever did whole-body
//! S3 puts and multipart), so the state machine below is built fresh against the TUS 1.0.0
//! protocol, in the same `Arc<dyn MetaStore>`/`Arc<dyn BlobBackend>`/`try_!` idiom as the rest of
//! this crate.

use std::sync::Arc;

use axum::body::Bytes as AxumBytes;
use axum::http::{HeaderName, HeaderValue};
use futures::stream;
use futures::StreamExt;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::Identity;
use crate::blob::{BlobBackend, BlobMetadata, ByteStream, PutOptions, UploadedPart};
use crate::config::TusConfig;
use crate::error::{Result, StorageError};
use crate::lock::DistributedLock;
use crate::metadata::{MetaStore, UploadKind, UploadRecord};

/// States a TUS upload moves through (spec §4.5): `New` is implicit (no row yet); `Created` once
/// POST succeeds; `InProgress` on the first successful PATCH; terminal states are mutually
/// exclusive and recorded by deleting (or never creating) the upload row rather than storing a
/// status column, mirroring how the teacher models terminal object state as row-presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TusUploadState {
    Created,
    InProgress,
    Finalized,
}

pub struct TusEngine {
    meta: Arc<dyn MetaStore>,
    blob: Arc<dyn BlobBackend>,
    lock: Arc<dyn DistributedLock>,
    cfg: TusConfig,
}

impl std::fmt::Debug for TusEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TusEngine").finish()
    }
}

#[derive(Debug, Clone)]
pub struct CreateUploadRequest {
    pub bucket: String,
    pub object_name: String,
    pub upload_length: Option<i64>,
    pub content_type: Option<String>,
    /// `Upload-Concat: partial` (TUS concatenation extension, spec §4.5 "where supported").
    pub concat_partial: bool,
    /// `Upload-Concat: final;<url> <url> ...` — the referenced partial uploads' ids, in order.
    pub concat_final_parts: Option<Vec<Uuid>>,
}

impl TusEngine {
    pub fn new(meta: Arc<dyn MetaStore>, blob: Arc<dyn BlobBackend>, lock: Arc<dyn DistributedLock>, cfg: TusConfig) -> Self {
        Self { meta, blob, lock, cfg }
    }

    /// Same key format `lifecycle::ObjectLifecycleManager` uses (bucket name, not id), so the
    /// backend multipart upload a TUS session writes to lands exactly where `finalize_multipart`
    /// expects the committed object's bytes to already be — no copy between a working key and a
    /// final key, unlike the old get-then-reupload shape.
    fn storage_key(bucket: &str, object_name: &str, version: &str) -> String {
        format!("{bucket}/{object_name}/{version}")
    }

    fn buffer_key(bucket: &str, object_name: &str, version: &str) -> String {
        format!("{}.tus-buffer", Self::storage_key(bucket, object_name, version))
    }

    #[tracing::instrument(level = "info", skip(self, lifecycle))]
    pub async fn create(&self, identity: &Identity, lifecycle: &crate::lifecycle::ObjectLifecycleManager, req: CreateUploadRequest) -> Result<UploadRecord> {
        if let Some(part_ids) = req.concat_final_parts.clone() {
            return self.create_final_concat(identity, lifecycle, req, part_ids).await;
        }

        let bucket_row = self.meta.get_bucket(&req.bucket).await?.ok_or(StorageError::NoSuchBucket)?;
        let version = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc();

        let key = Self::storage_key(&req.bucket, &req.object_name, &version);
        let put_opts = PutOptions { content_type: req.content_type.clone(), cache_control: None };
        let handle = self.lock.acquire(&key).await?;
        let opened = self.blob.create_multipart_upload(&key, put_opts).await;
        if let Err(e) = handle.release().await {
            tracing::warn!(error = %e, "failed to release TUS lock");
        }
        let opened = opened?;

        let record = UploadRecord {
            id: Uuid::new_v4(),
            bucket_id: bucket_row.id,
            object_name: req.object_name,
            version,
            kind: UploadKind::Multipart,
            offset: 0,
            upload_length: req.upload_length,
            backend_upload_id: Some(opened.backend_upload_id),
            parts: Json(Vec::new()),
            content_type: req.content_type,
            cache_control: None,
            concat_partial: req.concat_partial,
            created_at: now,
            expires_at: now + time::Duration::seconds(self.cfg.upload_ttl_secs),
        };
        let _ = identity;
        self.meta.create_upload_record(&record).await
    }

    /// `Upload-Concat: final;<url> <url> ...` (TUS concatenation extension, SPEC_FULL.md §B).
    /// Seals each referenced partial upload's own multipart session into real bytes at its key
    /// (the same `finish_multipart` primitive `finalize` uses), then stitches them into a fresh
    /// object with one backend-native `upload_part_copy` per partial — no bytes pass through this
    /// process, matching how `lifecycle::copy` stitches together a segmented copy.
    async fn create_final_concat(&self, identity: &Identity, lifecycle: &crate::lifecycle::ObjectLifecycleManager, req: CreateUploadRequest, part_ids: Vec<Uuid>) -> Result<UploadRecord> {
        if part_ids.is_empty() {
            return Err(StorageError::InvalidParameter("Upload-Concat final requires at least one partial upload".into()));
        }
        let bucket_row = self.meta.get_bucket(&req.bucket).await?.ok_or(StorageError::NoSuchBucket)?;

        let mut partials = Vec::with_capacity(part_ids.len());
        for id in &part_ids {
            let partial = self.find_by_id(bucket_row.id, *id).await?;
            if !partial.concat_partial {
                return Err(StorageError::InvalidParameter(format!("upload {id} is not a partial upload")));
            }
            let total = partial.upload_length.ok_or_else(|| StorageError::InvalidParameter(format!("partial upload {id} has unknown length")))?;
            if partial.offset != total {
                return Err(StorageError::InvalidParameter(format!("partial upload {id} is not yet complete")));
            }
            partials.push(partial);
        }

        let version = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc();
        let final_key = Self::storage_key(&req.bucket, &req.object_name, &version);
        let put_opts = PutOptions { content_type: req.content_type.clone(), cache_control: None };
        let handle = self.blob.create_multipart_upload(&final_key, put_opts).await?;

        let mut parts = Vec::with_capacity(partials.len());
        for (i, partial) in partials.iter().enumerate() {
            let partial_key = Self::storage_key(&bucket_row.name, &partial.object_name, &partial.version);
            let backend_upload_id = partial
                .backend_upload_id
                .as_deref()
                .ok_or_else(|| StorageError::InternalError("partial upload has no backend multipart session".into()))?;
            self.finish_multipart(&partial_key, backend_upload_id, partial).await?;
            let part = self.blob.upload_part_copy(&partial_key, &final_key, &handle.backend_upload_id, (i + 1) as i32, None).await?;
            parts.push(part);
        }

        let blob_meta = self.blob.complete_multipart_upload(&final_key, &handle.backend_upload_id, &parts).await?;
        let object = lifecycle
            .finalize_multipart(&req.bucket, &req.object_name, &identity.owner, &version, blob_meta, req.content_type.clone(), None, None, true)
            .await?;

        for partial in &partials {
            let partial_key = Self::storage_key(&bucket_row.name, &partial.object_name, &partial.version);
            let _ = self.blob.delete_object(&partial_key).await;
            let _ = self.meta.delete_upload_record(partial.id).await;
        }

        let record = UploadRecord {
            id: Uuid::new_v4(),
            bucket_id: bucket_row.id,
            object_name: req.object_name,
            version,
            kind: UploadKind::Multipart,
            offset: object.metadata.0.size,
            upload_length: Some(object.metadata.0.size),
            backend_upload_id: None,
            parts: Json(Vec::new()),
            content_type: req.content_type,
            cache_control: None,
            concat_partial: false,
            created_at: now,
            expires_at: now + time::Duration::seconds(self.cfg.upload_ttl_secs),
        };
        self.meta.create_upload_record(&record).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn head(&self, bucket_id: Uuid, upload_id: Uuid) -> Result<UploadRecord> {
        let record = self.find_by_id(bucket_id, upload_id).await?;
        if record.expires_at < OffsetDateTime::now_utc() {
            return Err(StorageError::NoSuchUpload);
        }
        Ok(record)
    }

    #[tracing::instrument(level = "info", skip(self, chunk))]
    pub async fn patch(&self, bucket_id: Uuid, upload_id: Uuid, expected_offset: i64, chunk: AxumBytes) -> Result<UploadRecord> {
        let record = self.find_by_id(bucket_id, upload_id).await?;
        if record.offset != expected_offset {
            // spec §4.5: `Upload-Offset` mismatch is a conflict, not a silent reconciliation.
            return Err(StorageError::InvalidParameter("Upload-Offset does not match server state".into()));
        }
        let bucket_row = self.meta.get_bucket_by_id(record.bucket_id).await?.ok_or(StorageError::NoSuchBucket)?;
        let key = Self::storage_key(&bucket_row.name, &record.object_name, &record.version);

        let handle = self.lock.acquire(&key).await?;
        let result = self.append_and_flush(&key, &record, chunk).await;
        if let Err(e) = handle.release().await {
            tracing::warn!(error = %e, "failed to release TUS lock");
        }
        let new_offset = result?;

        let mut updated = record;
        updated.offset = new_offset;
        Ok(updated)
    }

    /// Buffers PATCH bytes behind `key`'s `.tus-buffer` sidecar and flushes whole
    /// `part_size_bytes`-sized chunks to the open C1 multipart upload as they accumulate, so a
    /// PATCH only ever reads back at most one part's worth of bytes rather than the whole object
    /// (spec §4.5 "use multipart for multi-GB uploads"). The protocol-visible `Upload-Offset`
    /// advances by the chunk length regardless of flush boundaries.
    async fn append_and_flush(&self, key: &str, record: &UploadRecord, chunk: AxumBytes) -> Result<i64> {
        let buffer_key = Self::buffer_key_from(key);
        let mut combined = match self.blob.get_object(&buffer_key, None).await {
            Ok((_, mut body_stream)) => {
                let mut buf = Vec::new();
                while let Some(c) = body_stream.next().await {
                    buf.extend_from_slice(&c.map_err(|e| StorageError::InternalError(e.to_string()))?);
                }
                buf
            }
            Err(StorageError::NoSuchKey) => Vec::new(),
            Err(e) => return Err(e),
        };
        combined.extend_from_slice(&chunk);

        let backend_upload_id = record
            .backend_upload_id
            .as_deref()
            .ok_or_else(|| StorageError::InternalError("upload has no backend multipart session".into()))?;
        let part_size = self.cfg.part_size_bytes.max(1) as usize;
        let mut next_part_number = record.parts.0.len() as i32 + 1;
        let mut flushed = 0usize;

        while combined.len() - flushed >= part_size {
            let slice = bytes::Bytes::copy_from_slice(&combined[flushed..flushed + part_size]);
            let body: ByteStream = stream::iter(vec![Ok(slice)]).boxed();
            let part = self.blob.upload_part(key, backend_upload_id, next_part_number, body, Some(part_size as u64)).await?;
            self.meta.append_upload_part(record.id, record.offset, part).await?;
            flushed += part_size;
            next_part_number += 1;
        }

        let remaining = &combined[flushed..];
        if remaining.is_empty() {
            let _ = self.blob.delete_object(&buffer_key).await;
        } else {
            let body: ByteStream = stream::iter(vec![Ok(bytes::Bytes::copy_from_slice(remaining))]).boxed();
            self.blob.put_object(&buffer_key, body, None, PutOptions::default()).await?;
        }

        let new_offset = record.offset + chunk.len() as i64;
        self.meta.update_upload_offset(record.id, new_offset).await?;
        Ok(new_offset)
    }

    fn buffer_key_from(key: &str) -> String {
        format!("{key}.tus-buffer")
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn finalize(&self, identity: &Identity, bucket: &str, bucket_id: Uuid, upload_id: Uuid, lifecycle: &crate::lifecycle::ObjectLifecycleManager) -> Result<()> {
        let record = self.find_by_id(bucket_id, upload_id).await?;
        if let Some(total) = record.upload_length {
            if record.offset != total {
                return Err(StorageError::InvalidParameter("upload is not yet complete".into()));
            }
        }
        let backend_upload_id = record
            .backend_upload_id
            .clone()
            .ok_or_else(|| StorageError::InternalError("upload has no backend multipart session".into()))?;
        let key = Self::storage_key(bucket, &record.object_name, &record.version);

        let handle = self.lock.acquire(&key).await?;
        let result = self.finish_multipart(&key, &backend_upload_id, &record).await;
        if let Err(e) = handle.release().await {
            tracing::warn!(error = %e, "failed to release TUS lock");
        }
        let blob_meta = result?;

        lifecycle
            .finalize_multipart(bucket, &record.object_name, &identity.owner, &record.version, blob_meta, record.content_type.clone(), record.cache_control.clone(), None, true)
            .await?;

        self.meta.delete_upload_record(record.id).await?;
        Ok(())
    }

    /// Flushes whatever is left in the buffer (even a zero-length tail, so an empty object still
    /// completes with one part) as the final part, then completes the backend multipart upload —
    /// no re-read of the whole object through this process (spec §4.5/§4.6).
    async fn finish_multipart(&self, key: &str, backend_upload_id: &str, record: &UploadRecord) -> Result<BlobMetadata> {
        let buffer_key = Self::buffer_key_from(key);
        let mut parts: Vec<UploadedPart> = record.parts.0.clone();

        let tail = match self.blob.get_object(&buffer_key, None).await {
            Ok((_, mut body_stream)) => {
                let mut buf = Vec::new();
                while let Some(c) = body_stream.next().await {
                    buf.extend_from_slice(&c.map_err(|e| StorageError::InternalError(e.to_string()))?);
                }
                Some(buf)
            }
            Err(StorageError::NoSuchKey) => None,
            Err(e) => return Err(e),
        };

        if let Some(buf) = tail {
            let size = buf.len() as u64;
            let part_number = parts.len() as i32 + 1;
            let body: ByteStream = stream::iter(vec![Ok(bytes::Bytes::from(buf))]).boxed();
            let part = self.blob.upload_part(key, backend_upload_id, part_number, body, Some(size)).await?;
            self.meta.append_upload_part(record.id, record.offset, part.clone()).await?;
            parts.push(part);
            let _ = self.blob.delete_object(&buffer_key).await;
        } else if parts.is_empty() {
            let body: ByteStream = stream::iter(vec![Ok(bytes::Bytes::new())]).boxed();
            let part = self.blob.upload_part(key, backend_upload_id, 1, body, Some(0)).await?;
            self.meta.append_upload_part(record.id, record.offset, part.clone()).await?;
            parts.push(part);
        }

        self.blob.complete_multipart_upload(key, backend_upload_id, &parts).await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn abort(&self, bucket_id: Uuid, upload_id: Uuid) -> Result<()> {
        let record = self.find_by_id(bucket_id, upload_id).await?;
        if let Some(bucket_row) = self.meta.get_bucket_by_id(record.bucket_id).await? {
            let key = Self::storage_key(&bucket_row.name, &record.object_name, &record.version);
            if let Some(backend_upload_id) = &record.backend_upload_id {
                let _ = self.blob.abort_multipart_upload(&key, backend_upload_id).await;
            }
            let _ = self.blob.delete_object(&Self::buffer_key_from(&key)).await;
        }
        self.meta.delete_upload_record(record.id).await
    }

    /// Background sweeper for expired uploads (spec §4.5 "expired uploads are reclaimed, not
    /// left dangling"); wired into the migration fleet runner's periodic ticks in `main.rs`.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn sweep_expired(&self) -> Result<u64> {
        let now = OffsetDateTime::now_utc();
        let expired = self.meta.list_expired_uploads(now).await?;
        let count = expired.len() as u64;
        for record in expired {
            if let Some(bucket_row) = self.meta.get_bucket_by_id(record.bucket_id).await? {
                let key = Self::storage_key(&bucket_row.name, &record.object_name, &record.version);
                if let Some(backend_upload_id) = &record.backend_upload_id {
                    let _ = self.blob.abort_multipart_upload(&key, backend_upload_id).await;
                }
                let _ = self.blob.delete_object(&Self::buffer_key_from(&key)).await;
            }
            self.meta.delete_upload_record(record.id).await?;
        }
        Ok(count)
    }

    async fn find_by_id(&self, bucket_id: Uuid, upload_id: Uuid) -> Result<UploadRecord> {
        let record = self.meta.get_upload_record_by_id(upload_id).await?.ok_or(StorageError::NoSuchUpload)?;
        if record.bucket_id != bucket_id {
            return Err(StorageError::NoSuchUpload);
        }
        Ok(record)
    }
}

fn header(name: &'static str, value: impl std::fmt::Display) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static(name), HeaderValue::from_str(&value.to_string()).unwrap_or(HeaderValue::from_static("")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::lifecycle::ObjectLifecycleManager;
    use crate::lock::ObjectStoreLock;
    use crate::testutil::{FakeBlob, FakeMeta};

    #[test]
    fn header_formats_values_as_strings() {
        let (name, value) = header("Upload-Offset", 42);
        assert_eq!(name.as_str(), "upload-offset");
        assert_eq!(value.to_str().unwrap(), "42");
    }

    fn engine(meta: Arc<dyn MetaStore>, blob: Arc<dyn BlobBackend>) -> TusEngine {
        let lock: Arc<dyn DistributedLock> = Arc::new(ObjectStoreLock::new(blob.clone(), LockConfig::default()));
        TusEngine::new(meta, blob, lock, crate::config::TusConfig::default())
    }

    fn lifecycle(meta: Arc<dyn MetaStore>, blob: Arc<dyn BlobBackend>) -> ObjectLifecycleManager {
        let lock: Arc<dyn DistributedLock> = Arc::new(ObjectStoreLock::new(blob.clone(), LockConfig::default()));
        ObjectLifecycleManager::new(meta, blob, lock)
    }

    fn req(bucket: &str, object_name: &str, upload_length: Option<i64>) -> CreateUploadRequest {
        CreateUploadRequest { bucket: bucket.into(), object_name: object_name.into(), upload_length, content_type: None, concat_partial: false, concat_final_parts: None }
    }

    #[tokio::test]
    async fn create_then_patch_advances_offset() {
        let (fake_meta, bucket_id) = FakeMeta::with_bucket("b", "alice");
        let meta: Arc<dyn MetaStore> = Arc::new(fake_meta);
        let blob: Arc<dyn BlobBackend> = Arc::new(FakeBlob::default());
        let lifecycle = lifecycle(meta.clone(), blob.clone());
        let tus = engine(meta, blob);
        let identity = Identity { tenant_id: "t1".into(), owner: "alice".into(), role: Some("owner".into()) };

        let record = tus.create(&identity, &lifecycle, req("b", "o.bin", Some(4))).await.unwrap();
        assert_eq!(record.offset, 0);
        assert!(record.backend_upload_id.is_some());

        let updated = tus.patch(bucket_id, record.id, 0, axum::body::Bytes::from_static(b"data")).await.unwrap();
        assert_eq!(updated.offset, 4);
    }

    #[tokio::test]
    async fn patch_with_wrong_offset_is_rejected() {
        let (fake_meta, bucket_id) = FakeMeta::with_bucket("b", "alice");
        let meta: Arc<dyn MetaStore> = Arc::new(fake_meta);
        let blob: Arc<dyn BlobBackend> = Arc::new(FakeBlob::default());
        let lifecycle = lifecycle(meta.clone(), blob.clone());
        let tus = engine(meta, blob);
        let identity = Identity { tenant_id: "t1".into(), owner: "alice".into(), role: Some("owner".into()) };

        let record = tus.create(&identity, &lifecycle, req("b", "o.bin", Some(4))).await.unwrap();

        let err = tus.patch(bucket_id, record.id, 99, axum::body::Bytes::from_static(b"data")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn finalize_publishes_the_object_and_clears_the_upload_record() {
        let (fake_meta, bucket_id) = FakeMeta::with_bucket("b", "alice");
        let meta: Arc<dyn MetaStore> = Arc::new(fake_meta);
        let blob: Arc<dyn BlobBackend> = Arc::new(FakeBlob::default());
        let lifecycle = lifecycle(meta.clone(), blob.clone());
        let tus = engine(meta.clone(), blob.clone());
        let identity = Identity { tenant_id: "t1".into(), owner: "alice".into(), role: Some("owner".into()) };

        let record = tus.create(&identity, &lifecycle, req("b", "o.bin", Some(4))).await.unwrap();
        tus.patch(bucket_id, record.id, 0, axum::body::Bytes::from_static(b"data")).await.unwrap();

        tus.finalize(&identity, "b", bucket_id, record.id, &lifecycle).await.unwrap();

        assert!(matches!(tus.head(bucket_id, record.id).await.unwrap_err(), StorageError::NoSuchUpload));
        let (_, outcome, mut stream) = lifecycle.get("b", "o.bin").await.unwrap();
        assert_eq!(outcome.metadata.size, 4);
        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, b"data");
    }

    #[tokio::test]
    async fn finalize_of_an_empty_upload_publishes_a_zero_byte_object() {
        let (fake_meta, bucket_id) = FakeMeta::with_bucket("b", "alice");
        let meta: Arc<dyn MetaStore> = Arc::new(fake_meta);
        let blob: Arc<dyn BlobBackend> = Arc::new(FakeBlob::default());
        let lifecycle = lifecycle(meta.clone(), blob.clone());
        let tus = engine(meta.clone(), blob.clone());
        let identity = Identity { tenant_id: "t1".into(), owner: "alice".into(), role: Some("owner".into()) };

        let record = tus.create(&identity, &lifecycle, req("b", "empty.bin", Some(0))).await.unwrap();

        tus.finalize(&identity, "b", bucket_id, record.id, &lifecycle).await.unwrap();

        let (_, outcome, _) = lifecycle.get("b", "empty.bin").await.unwrap();
        assert_eq!(outcome.metadata.size, 0);
    }

    #[tokio::test]
    async fn patch_flushes_a_full_part_once_the_threshold_is_reached() {
        let (fake_meta, bucket_id) = FakeMeta::with_bucket("b", "alice");
        let meta: Arc<dyn MetaStore> = Arc::new(fake_meta);
        let blob: Arc<dyn BlobBackend> = Arc::new(FakeBlob::default());
        let lifecycle = lifecycle(meta.clone(), blob.clone());
        let lock: Arc<dyn DistributedLock> = Arc::new(ObjectStoreLock::new(blob.clone(), LockConfig::default()));
        let tus = TusEngine::new(meta.clone(), blob.clone(), lock, TusConfig { part_size_bytes: 4, ..TusConfig::default() });
        let identity = Identity { tenant_id: "t1".into(), owner: "alice".into(), role: Some("owner".into()) };

        let record = tus.create(&identity, &lifecycle, req("b", "o.bin", Some(6))).await.unwrap();

        let updated = tus.patch(bucket_id, record.id, 0, axum::body::Bytes::from_static(b"abcdef")).await.unwrap();
        assert_eq!(updated.offset, 6);

        let stored = meta.get_upload_record_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(stored.parts.0.len(), 1);
    }

    #[tokio::test]
    async fn abort_discards_the_upload_without_publishing() {
        let (fake_meta, bucket_id) = FakeMeta::with_bucket("b", "alice");
        let meta: Arc<dyn MetaStore> = Arc::new(fake_meta);
        let blob: Arc<dyn BlobBackend> = Arc::new(FakeBlob::default());
        let lifecycle = lifecycle(meta.clone(), blob.clone());
        let tus = engine(meta, blob);
        let identity = Identity { tenant_id: "t1".into(), owner: "alice".into(), role: Some("owner".into()) };

        let record = tus.create(&identity, &lifecycle, req("b", "o.bin", Some(4))).await.unwrap();
        tus.abort(bucket_id, record.id).await.unwrap();

        assert!(matches!(tus.head(bucket_id, record.id).await.unwrap_err(), StorageError::NoSuchUpload));
    }

    #[tokio::test]
    async fn final_concat_stitches_two_partial_uploads_into_one_object() {
        let (fake_meta, bucket_id) = FakeMeta::with_bucket("b", "alice");
        let meta: Arc<dyn MetaStore> = Arc::new(fake_meta);
        let blob: Arc<dyn BlobBackend> = Arc::new(FakeBlob::default());
        let lifecycle = lifecycle(meta.clone(), blob.clone());
        let tus = engine(meta.clone(), blob.clone());
        let identity = Identity { tenant_id: "t1".into(), owner: "alice".into(), role: Some("owner".into()) };

        let mut partial_req = req("b", "part-a", Some(4));
        partial_req.concat_partial = true;
        let part_a = tus.create(&identity, &lifecycle, partial_req).await.unwrap();
        tus.patch(bucket_id, part_a.id, 0, axum::body::Bytes::from_static(b"abcd")).await.unwrap();

        let mut partial_req = req("b", "part-b", Some(4));
        partial_req.concat_partial = true;
        let part_b = tus.create(&identity, &lifecycle, partial_req).await.unwrap();
        tus.patch(bucket_id, part_b.id, 0, axum::body::Bytes::from_static(b"wxyz")).await.unwrap();

        let mut final_req = req("b", "whole.bin", None);
        final_req.concat_final_parts = Some(vec![part_a.id, part_b.id]);
        tus.create(&identity, &lifecycle, final_req).await.unwrap();

        let (_, outcome, mut stream) = lifecycle.get("b", "whole.bin").await.unwrap();
        assert_eq!(outcome.metadata.size, 8);
        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, b"abcdwxyz");

        assert!(matches!(tus.head(bucket_id, part_a.id).await.unwrap_err(), StorageError::NoSuchUpload));
        assert!(matches!(tus.head(bucket_id, part_b.id).await.unwrap_err(), StorageError::NoSuchUpload));
    }

    #[tokio::test]
    async fn final_concat_rejects_an_incomplete_partial() {
        let (fake_meta, bucket_id) = FakeMeta::with_bucket("b", "alice");
        let meta: Arc<dyn MetaStore> = Arc::new(fake_meta);
        let blob: Arc<dyn BlobBackend> = Arc::new(FakeBlob::default());
        let lifecycle = lifecycle(meta.clone(), blob.clone());
        let tus = engine(meta.clone(), blob.clone());
        let identity = Identity { tenant_id: "t1".into(), owner: "alice".into(), role: Some("owner".into()) };
        let _ = bucket_id;

        let mut partial_req = req("b", "part-a", Some(4));
        partial_req.concat_partial = true;
        let part_a = tus.create(&identity, &lifecycle, partial_req).await.unwrap();

        let mut final_req = req("b", "whole.bin", None);
        final_req.concat_final_parts = Some(vec![part_a.id]);
        let err = tus.create(&identity, &lifecycle, final_req).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidParameter(_)));
    }
}
