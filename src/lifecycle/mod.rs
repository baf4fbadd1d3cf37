//! Object lifecycle manager (C3): the two-phase write protocol the teacher's
//! `pg_database.rs` used for multipart completion (`create_blob_temp` → write bytes →
//! `commit_object`), generalized to every mutating object operation (upload, copy, move,
//! delete) and to either blob backend.

use std::sync::Arc;

use uuid::Uuid;

use crate::blob::{BlobBackend, ByteRange, ByteStream, PutOptions};
use crate::error::{Result, StorageError};
use crate::lock::DistributedLock;
use crate::metadata::{FindOrCreateUpload, MetaStore, Object, ObjectMetadata, RowLock};

/// Generates the next object version token. The teacher used a `blob id` UUID per write; this
/// keeps the same shape so the filesystem backend's `version_separator` naming scheme (spec
/// §4.1) lines up with what the metadata store records as `Object::version`.
fn next_version() -> String {
    Uuid::new_v4().to_string()
}

pub struct ObjectLifecycleManager {
    meta: Arc<dyn MetaStore>,
    blob: Arc<dyn BlobBackend>,
    lock: Arc<dyn DistributedLock>,
}

impl std::fmt::Debug for ObjectLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectLifecycleManager").finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
    /// If false and the object already exists, fail with `KeyAlreadyExists` (spec §4.3
    /// "upload: create-or-overwrite is opt-in").
    pub allow_overwrite: bool,
}

impl ObjectLifecycleManager {
    pub fn new(meta: Arc<dyn MetaStore>, blob: Arc<dyn BlobBackend>, lock: Arc<dyn DistributedLock>) -> Self {
        Self { meta, blob, lock }
    }

    fn storage_key(bucket: &str, object_name: &str, version: &str) -> String {
        format!("{bucket}/{object_name}/{version}")
    }

    fn lock_key(bucket: &str, object_name: &str, version: &str) -> String {
        Self::storage_key(bucket, object_name, version)
    }

    /// Acquires C4's distributed lock around `body`, releasing it afterwards regardless of
    /// outcome (spec §4.2 `mustLockObject`/§4.4). A release failure is logged, not propagated —
    /// the write already committed or failed on its own merits by the time we try to release.
    async fn with_object_lock<T>(&self, bucket: &str, object_name: &str, version: &str, body: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let handle = self.lock.acquire(&Self::lock_key(bucket, object_name, version)).await?;
        let result = body.await;
        if let Err(e) = handle.release().await {
            tracing::warn!(bucket, object_name, version, error = %e, "failed to release object lock");
        }
        result
    }

    #[tracing::instrument(level = "info", skip(self, body))]
    pub async fn upload(&self, bucket: &str, object_name: &str, owner: &str, body: ByteStream, size_hint: Option<u64>, opts: UploadOptions) -> Result<Object> {
        let bucket_row = self.meta.get_bucket(bucket).await?.ok_or(StorageError::NoSuchBucket)?;
        if let Some(allowed) = &bucket_row.allowed_mime_types {
            if let Some(ct) = &opts.content_type {
                if !allowed.iter().any(|m| m == ct) {
                    return Err(StorageError::InvalidMimeType);
                }
            }
        }

        let version = next_version();
        self.with_object_lock(bucket, object_name, &version, async {
            let key = Self::storage_key(bucket, object_name, &version);
            let put_opts = PutOptions { content_type: opts.content_type.clone(), cache_control: opts.cache_control.clone() };
            let blob_meta = self.blob.put_object(&key, body, size_hint, put_opts).await?;

            if let Some(limit) = bucket_row.size_limit {
                if blob_meta.size as i64 > limit {
                    let _ = self.blob.delete_object(&key).await;
                    return Err(StorageError::EntityTooLarge);
                }
            }

            self.commit_version(&bucket_row, object_name, owner, &version, blob_meta, opts.user_metadata.clone(), opts.allow_overwrite).await
        })
        .await
    }

    /// Writes the catalog side of a version commit: finds-or-creates the object row, then points
    /// it at `version` with the blob backend's reported metadata. Shared by `upload` (after a
    /// whole-body `put_object`) and `finalize_multipart` (after a backend-native multipart
    /// completion) so both go through exactly one catalog write path (spec §4.2/§4.5).
    async fn commit_version(
        &self,
        bucket_row: &crate::metadata::Bucket,
        object_name: &str,
        owner: &str,
        version: &str,
        blob_meta: crate::blob::BlobMetadata,
        user_metadata: Option<serde_json::Value>,
        allow_overwrite: bool,
    ) -> Result<Object> {
        let object = self
            .meta
            .find_or_create_object_for_upload(FindOrCreateUpload {
                bucket_id: bucket_row.id,
                object_name,
                version,
                owner,
                is_upsert: allow_overwrite,
                user_metadata,
            })
            .await?;

        let object_metadata = ObjectMetadata {
            size: blob_meta.size as i64,
            mime: blob_meta.content_type.clone(),
            etag: Some(blob_meta.etag.clone()),
            last_modified: Some(blob_meta.last_modified),
            cache_control: blob_meta.cache_control.clone(),
            content_range: None,
        };
        self.meta.update_object_version(object.id, version, &object_metadata).await?;

        Ok(Object { version: version.to_owned(), metadata: sqlx::types::Json(object_metadata), ..object })
    }

    /// Commits a version that was already written to the blob backend by a completed multipart
    /// upload (spec §4.5 `CompleteMultipartUpload`/TUS `finalize`) — no second blob read/write,
    /// just the lock + catalog commit that a whole-body `upload()` also does. `content_type`/
    /// `cache_control` are supplied by the caller since the backend's completion response may not
    /// echo them back (S3's `CompleteMultipartUploadOutput` doesn't carry them at all).
    #[tracing::instrument(level = "info", skip(self))]
    #[allow(clippy::too_many_arguments)]
    pub async fn finalize_multipart(
        &self,
        bucket: &str,
        object_name: &str,
        owner: &str,
        version: &str,
        mut blob_meta: crate::blob::BlobMetadata,
        content_type: Option<String>,
        cache_control: Option<String>,
        user_metadata: Option<serde_json::Value>,
        allow_overwrite: bool,
    ) -> Result<Object> {
        let bucket_row = self.meta.get_bucket(bucket).await?.ok_or(StorageError::NoSuchBucket)?;
        blob_meta.content_type = blob_meta.content_type.or(content_type);
        blob_meta.cache_control = blob_meta.cache_control.or(cache_control);

        self.with_object_lock(bucket, object_name, version, async {
            self.commit_version(&bucket_row, object_name, owner, version, blob_meta, user_metadata, allow_overwrite).await
        })
        .await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get(&self, bucket: &str, object_name: &str) -> Result<(Object, crate::blob::GetOutcome, ByteStream)> {
        let bucket_row = self.meta.get_bucket(bucket).await?.ok_or(StorageError::NoSuchBucket)?;
        let object = self.meta.get_object(bucket_row.id, object_name, RowLock::None).await?.ok_or(StorageError::NoSuchKey)?;
        let key = Self::storage_key(bucket, object_name, &object.version);
        let (outcome, stream) = self.blob.get_object(&key, None).await?;
        Ok((object, outcome, stream))
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn delete(&self, bucket: &str, object_name: &str) -> Result<()> {
        let bucket_row = self.meta.get_bucket(bucket).await?.ok_or(StorageError::NoSuchBucket)?;
        let Some(object) = self.meta.delete_object(bucket_row.id, object_name).await? else {
            return Err(StorageError::NoSuchKey);
        };
        let key = Self::storage_key(bucket, object_name, &object.version);
        self.blob.delete_object(&key).await?;
        Ok(())
    }

    /// Default multipart part size (spec §4.6's 5 GiB default); copies at or under this size go
    /// through the backend's single-shot `CopyObject`, larger ones through a segmented
    /// `UploadPartCopy` loop — either way no bytes pass through this process.
    const MULTIPART_COPY_THRESHOLD: u64 = 5 * 1024 * 1024 * 1024;

    /// Copy preserves the source bytes under a new metadata row and a fresh version id so the
    /// destination's lifecycle (deletes, overwrites) is independent of the source (spec §4.3
    /// "copy must not alias versions"), using a backend-native copy rather than a get+reupload
    /// round-trip through this process (spec §4.6 `CopyObject`/`UploadPartCopy`).
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn copy(&self, src_bucket: &str, src_name: &str, dst_bucket: &str, dst_name: &str, owner: &str) -> Result<Object> {
        let src_bucket_row = self.meta.get_bucket(src_bucket).await?.ok_or(StorageError::NoSuchBucket)?;
        let src_object = self.meta.get_object(src_bucket_row.id, src_name, RowLock::None).await?.ok_or(StorageError::NoSuchKey)?;
        let dst_bucket_row = self.meta.get_bucket(dst_bucket).await?.ok_or(StorageError::NoSuchBucket)?;

        let src_key = Self::storage_key(src_bucket, src_name, &src_object.version);
        let version = next_version();
        let dst_key = Self::storage_key(dst_bucket, dst_name, &version);
        let size = src_object.metadata.size.max(0) as u64;
        let put_opts = PutOptions { content_type: src_object.metadata.mime.clone(), cache_control: src_object.metadata.cache_control.clone() };

        let blob_meta = if size <= Self::MULTIPART_COPY_THRESHOLD {
            self.blob.copy_object(&src_key, &dst_key, put_opts).await?
        } else {
            let handle = self.blob.create_multipart_upload(&dst_key, put_opts).await?;
            let mut parts = Vec::new();
            let mut offset = 0u64;
            let mut part_number = 1;
            while offset < size {
                let end = (offset + Self::MULTIPART_COPY_THRESHOLD - 1).min(size - 1);
                let part = self
                    .blob
                    .upload_part_copy(&src_key, &dst_key, &handle.backend_upload_id, part_number, Some(ByteRange { start: offset, end: Some(end) }))
                    .await?;
                parts.push(part);
                offset = end + 1;
                part_number += 1;
            }
            self.blob.complete_multipart_upload(&dst_key, &handle.backend_upload_id, &parts).await?
        };

        self.with_object_lock(dst_bucket, dst_name, &version, async {
            self.commit_version(&dst_bucket_row, dst_name, owner, &version, blob_meta, Some(src_object.user_metadata.0.clone()), true).await
        })
        .await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn move_object(&self, src_bucket: &str, src_name: &str, dst_bucket: &str, dst_name: &str, owner: &str) -> Result<Object> {
        let copied = self.copy(src_bucket, src_name, dst_bucket, dst_name, owner).await?;
        self.delete(src_bucket, src_name).await?;
        Ok(copied)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn touch_last_accessed(&self, object_id: Uuid) -> Result<()> {
        self.meta.touch_last_accessed(object_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeBlob, FakeMeta};
    use futures::stream;
    use futures::StreamExt;

    fn body(bytes: &'static [u8]) -> ByteStream {
        stream::iter(vec![Ok(bytes::Bytes::from(bytes))]).boxed()
    }

    fn manager(meta: FakeMeta) -> ObjectLifecycleManager {
        let blob = Arc::new(FakeBlob::default());
        let lock = Arc::new(crate::lock::ObjectStoreLock::new(blob.clone(), crate::config::LockConfig::default()));
        ObjectLifecycleManager::new(Arc::new(meta), blob, lock)
    }

    #[tokio::test]
    async fn upload_then_get_round_trips_bytes() {
        let (meta, _bucket_id) = FakeMeta::with_bucket("b", "alice");
        let mgr = manager(meta);

        let uploaded = mgr.upload("b", "k.txt", "alice", body(b"hello"), Some(5), UploadOptions::default()).await.unwrap();
        assert_eq!(uploaded.metadata.size, 5);

        let (object, outcome, mut stream) = mgr.get("b", "k.txt").await.unwrap();
        assert_eq!(object.name, "k.txt");
        assert_eq!(outcome.metadata.size, 5);
        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn upload_without_overwrite_rejects_existing_key() {
        let (meta, _bucket_id) = FakeMeta::with_bucket("b", "alice");
        let mgr = manager(meta);

        let opts = UploadOptions { allow_overwrite: false, ..Default::default() };
        mgr.upload("b", "k.txt", "alice", body(b"v1"), Some(2), opts.clone()).await.unwrap();
        let err = mgr.upload("b", "k.txt", "alice", body(b"v2"), Some(2), opts).await.unwrap_err();
        assert!(matches!(err, StorageError::KeyAlreadyExists));
    }

    #[tokio::test]
    async fn upload_to_missing_bucket_fails() {
        let mgr = manager(FakeMeta::default());
        let err = mgr.upload("missing", "k", "alice", body(b"x"), Some(1), UploadOptions::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::NoSuchBucket));
    }

    #[tokio::test]
    async fn copy_gives_destination_an_independent_version() {
        let (meta, _bucket_id) = FakeMeta::with_bucket("b", "alice");
        let mgr = manager(meta);
        mgr.upload("b", "src", "alice", body(b"payload"), Some(7), UploadOptions::default()).await.unwrap();

        let copied = mgr.copy("b", "src", "b", "dst", "alice").await.unwrap();
        let (src, _, _) = mgr.get("b", "src").await.unwrap();
        assert_ne!(copied.version, src.version);

        let (_, _, mut stream) = mgr.get("b", "dst").await.unwrap();
        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, b"payload");
    }

    #[tokio::test]
    async fn move_object_removes_the_source() {
        let (meta, _bucket_id) = FakeMeta::with_bucket("b", "alice");
        let mgr = manager(meta);
        mgr.upload("b", "src", "alice", body(b"data"), Some(4), UploadOptions::default()).await.unwrap();

        mgr.move_object("b", "src", "b", "dst", "alice").await.unwrap();

        assert!(matches!(mgr.get("b", "src").await.unwrap_err(), StorageError::NoSuchKey));
        assert!(mgr.get("b", "dst").await.is_ok());
    }

    #[tokio::test]
    async fn delete_missing_key_is_no_such_key() {
        let (meta, _bucket_id) = FakeMeta::with_bucket("b", "alice");
        let mgr = manager(meta);
        assert!(matches!(mgr.delete("b", "nope").await.unwrap_err(), StorageError::NoSuchKey));
    }
}
