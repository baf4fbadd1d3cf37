//! Blob backend (C1): a byte-addressable store behind either a real S3 endpoint or a local
//! filesystem tree, generalized from the teacher's `S3Client` (`s3_client.rs`), which only ever
//! wrapped `aws-sdk-s3` directly. Splitting the wire-format-specific client behind a trait is
//! what lets the filesystem variant exist at all.

pub mod fs_backend;
pub mod s3_backend;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;

pub use fs_backend::FsBlobBackend;
pub use s3_backend::S3BlobBackend;

pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Inclusive byte range for a partial read (spec §4.1 "ranged reads").
#[derive(Debug, Clone, Copy)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BlobMetadata {
    pub size: u64,
    pub etag: String,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub last_modified: time::OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct GetOutcome {
    pub metadata: BlobMetadata,
}

#[derive(Debug, Clone)]
pub struct MultipartUploadHandle {
    pub backend_upload_id: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Point-in-time read of a backend's request-pool counters (spec §5 "Shared resource policy ...
/// pool metrics are exported"). Only the S3 backend has an HTTP connection pool to report on; the
/// filesystem backend's [`BlobBackend::pool_metrics`] stays at the default `None`.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub in_flight: i64,
}

/// The blob-store seam spec §4.1 names: every path that touches bytes (the TUS engine, the
/// S3-wire service, the lifecycle manager's copy/move) goes through one of these methods rather
/// than the underlying SDK directly, which is what lets C3/C5 stay backend-agnostic.
#[async_trait]
pub trait BlobBackend: Send + Sync + std::fmt::Debug + 'static {
    /// Write the full body of `key`, replacing any prior content (spec §4.1 "put is whole-object
    /// overwrite; partial writes go through the multipart methods").
    async fn put_object(&self, key: &str, body: ByteStream, size_hint: Option<u64>, opts: PutOptions) -> Result<BlobMetadata>;

    async fn get_object(&self, key: &str, range: Option<ByteRange>) -> Result<(GetOutcome, ByteStream)>;

    async fn head_object(&self, key: &str) -> Result<BlobMetadata>;

    async fn delete_object(&self, key: &str) -> Result<()>;

    /// Best-effort bulk delete; implementations that have no batch primitive may fall back to a
    /// sequential loop (spec §4.1 "Non-goals: batched delete is not guaranteed atomic").
    async fn delete_objects(&self, keys: &[String]) -> Result<Vec<(String, Result<()>)>>;

    async fn create_multipart_upload(&self, key: &str, opts: PutOptions) -> Result<MultipartUploadHandle>;

    async fn upload_part(&self, key: &str, upload_id: &str, part_number: i32, body: ByteStream, size_hint: Option<u64>) -> Result<UploadedPart>;

    async fn complete_multipart_upload(&self, key: &str, upload_id: &str, parts: &[UploadedPart]) -> Result<BlobMetadata>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;

    /// Backend-native copy (spec §4.3/§4.6 `CopyObject`): no bytes pass through this process.
    /// Used by `lifecycle::copy` for objects under the multipart part-size threshold.
    async fn copy_object(&self, src_key: &str, dst_key: &str, opts: PutOptions) -> Result<BlobMetadata>;

    /// Backend-native part copy (spec §4.6 `UploadPartCopy`), used both by the S3-wire
    /// `UploadPartCopy` operation and by `lifecycle::copy`'s segmented fallback for objects over
    /// the part-size threshold.
    async fn upload_part_copy(&self, src_key: &str, dst_key: &str, upload_id: &str, part_number: i32, range: Option<ByteRange>) -> Result<UploadedPart>;

    /// Lists every key under `prefix` (spec §4.7, the orphan scanner's backend-side half of
    /// reconciliation). No ordering or pagination contract beyond "every matching key eventually
    /// appears"; callers needing cursor-stable pagination should use the S3-wire `ListObjectsV2`
    /// surface instead.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Presigned GET URL valid for `expires_in_secs` (spec §1, "presigned URLs"). Backends that
    /// cannot presign (the filesystem variant) return `None`; callers fall back to proxying.
    /// Async because the S3 backend's real presigning call (`PresigningConfig` + SigV4) is itself
    /// async in `aws-sdk-s3` — there is no synchronous path to generalize over.
    async fn presign_get(&self, key: &str, expires_in_secs: u64) -> Result<Option<String>>;

    async fn presign_put(&self, key: &str, expires_in_secs: u64) -> Result<Option<String>>;

    /// Snapshot of the backend's outbound request pool, if it has one to report on (spec §5
    /// "pool metrics are exported"; SPEC_FULL.md §B supplement).
    fn pool_metrics(&self) -> Option<PoolMetricsSnapshot> {
        None
    }
}
