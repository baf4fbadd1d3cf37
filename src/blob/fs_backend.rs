use std::fmt::Debug;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use super::{BlobBackend, BlobMetadata, ByteRange, ByteStream, GetOutcome, MultipartUploadHandle, PutOptions, UploadedPart};
use crate::config::FsBackendConfig;
use crate::error::{try_, Result, StorageError};

/// Filesystem blob backend (spec §4.1 "Non-goals excludes a third backend, but local filesystem
/// is a named backend"). The teacher never had one of these — `s3_client.rs` only ever talked to
/// a real S3 endpoint — so this is built fresh in the same `#[tracing::instrument]`/`try_!` idiom.
/// Final-object metadata (content-type, cache-control, the real MD5 etag) is stored as extended
/// attributes under distinct per-field keys (spec §4.1/§9 — the source's documented bug was
/// reusing one xattr key for both content-type and etag). A `metadata.json` sidecar survives only
/// at the multipart-upload-directory level, where there's no final file yet to carry xattrs on
/// (spec §4.3's persisted-state description).
pub struct FsBlobBackend {
    root: PathBuf,
    version_separator: String,
    derive_etag_from_mtime: bool,
}

impl Debug for FsBlobBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsBlobBackend").field("root", &self.root).finish()
    }
}

#[cfg(target_os = "macos")]
fn xattr_name(field: &str) -> String {
    format!("com.apple.metadata.supabase.{field}")
}

#[cfg(not(target_os = "macos"))]
fn xattr_name(field: &str) -> String {
    format!("user.supabase.{field}")
}

/// Multipart-upload-directory sidecar (spec §4.3: "`rootDir/multiparts/<uploadId>/.../part-<N>`
/// with per-part xattr etags and a `metadata.json` sidecar carrying content-type and
/// cache-control"). Recorded at `create_multipart_upload` time since the final file (and its
/// xattrs) doesn't exist until `complete_multipart_upload` assembles it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
struct PendingMetadata {
    content_type: Option<String>,
    cache_control: Option<String>,
}

impl FsBlobBackend {
    pub fn new(cfg: &FsBackendConfig) -> Self {
        Self { root: PathBuf::from(&cfg.root_dir), version_separator: cfg.version_separator.clone(), derive_etag_from_mtime: cfg.derive_etag_from_mtime }
    }

    /// Substitutes the version separator only at the key's final `/` (the boundary between
    /// `bucket/object_name` and `version`), leaving any `/` inside the bucket or object name
    /// as a real directory separator. When the configured separator is itself `/` this is a
    /// no-op: the key's own slashes already describe the right nested layout.
    fn key_to_relative_path(&self, key: &str) -> String {
        if self.version_separator == "/" {
            return key.to_owned();
        }
        match key.rfind('/') {
            Some(idx) => format!("{}{}{}", &key[..idx], self.version_separator, &key[idx + 1..]),
            None => key.to_owned(),
        }
    }

    /// Inverse of [`Self::key_to_relative_path`]: converts the last occurrence of the configured
    /// separator back into `/`, not every occurrence, so a bucket/object name that happens to
    /// contain the separator substring isn't corrupted.
    fn relative_path_to_key(&self, rel: &str) -> String {
        if self.version_separator == "/" {
            return rel.to_owned();
        }
        match rel.rfind(self.version_separator.as_str()) {
            Some(idx) => format!("{}/{}", &rel[..idx], &rel[idx + self.version_separator.len()..]),
            None => rel.to_owned(),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.contains("..") {
            return Err(StorageError::InvalidKey);
        }
        Ok(self.root.join(self.key_to_relative_path(key)))
    }

    fn write_xattrs(&self, path: &Path, opts: &PutOptions, etag: Option<&str>) -> Result<()> {
        if let Some(ct) = &opts.content_type {
            try_!(xattr::set(path, xattr_name("content-type"), ct.as_bytes()));
        }
        if let Some(cc) = &opts.cache_control {
            try_!(xattr::set(path, xattr_name("cache-control"), cc.as_bytes()));
        }
        if let Some(etag) = etag {
            try_!(xattr::set(path, xattr_name("etag"), etag.as_bytes()));
        }
        Ok(())
    }

    fn read_xattr(&self, path: &Path, field: &str) -> Option<String> {
        xattr::get(path, xattr_name(field)).ok().flatten().and_then(|bytes| String::from_utf8(bytes).ok())
    }

    fn multipart_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(".multipart").join(upload_id)
    }

    fn pending_metadata_path(&self, upload_id: &str) -> PathBuf {
        self.multipart_dir(upload_id).join("metadata.json")
    }

    async fn write_pending_metadata(&self, upload_id: &str, opts: &PutOptions) -> Result<()> {
        let pending = PendingMetadata { content_type: opts.content_type.clone(), cache_control: opts.cache_control.clone() };
        let json = try_!(serde_json::to_vec(&pending).map_err(|e| StorageError::InternalError(e.to_string())));
        try_!(tokio::fs::write(self.pending_metadata_path(upload_id), json).await);
        Ok(())
    }

    async fn read_pending_metadata(&self, upload_id: &str) -> PendingMetadata {
        tokio::fs::read(self.pending_metadata_path(upload_id)).await.ok().and_then(|bytes| serde_json::from_slice(&bytes).ok()).unwrap_or_default()
    }
}

#[async_trait]
impl BlobBackend for FsBlobBackend {
    #[tracing::instrument(level = "debug", skip(self, body))]
    async fn put_object(&self, key: &str, mut body: ByteStream, _size_hint: Option<u64>, opts: PutOptions) -> Result<BlobMetadata> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            try_!(tokio::fs::create_dir_all(parent).await);
        }
        let tmp_path = path.with_extension("tmp-upload");
        let mut file = try_!(tokio::fs::File::create(&tmp_path).await);
        let mut hasher = <md5::Md5 as md5::Digest>::new();
        let mut size = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = try_!(chunk);
            md5::Digest::update(&mut hasher, &chunk);
            size += chunk.len() as u64;
            try_!(file.write_all(&chunk).await);
        }
        try_!(file.flush().await);
        try_!(tokio::fs::rename(&tmp_path, &path).await);

        let etag = format!("{:x}", md5::Digest::finalize(hasher));
        let stored_etag = if self.derive_etag_from_mtime { None } else { Some(etag.as_str()) };
        self.write_xattrs(&path, &opts, stored_etag)?;

        Ok(BlobMetadata { size, etag, content_type: opts.content_type, cache_control: opts.cache_control, last_modified: time::OffsetDateTime::now_utc() })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_object(&self, key: &str, range: Option<ByteRange>) -> Result<(GetOutcome, ByteStream)> {
        let path = self.object_path(key)?;
        let meta = self.head_object(key).await?;
        let mut file = try_!(tokio::fs::File::open(&path).await);

        if let Some(range) = range {
            try_!(file.seek(std::io::SeekFrom::Start(range.start)).await);
            let limit = range.end.map(|end| end.saturating_sub(range.start) + 1);
            let reader = match limit {
                Some(limit) => tokio::io::AsyncReadExt::take(file, limit),
                None => tokio::io::AsyncReadExt::take(file, u64::MAX),
            };
            let stream = ReaderStream::new(reader).boxed();
            return Ok((GetOutcome { metadata: meta }, stream));
        }

        let stream = ReaderStream::new(file).boxed();
        Ok((GetOutcome { metadata: meta }, stream))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn head_object(&self, key: &str) -> Result<BlobMetadata> {
        let path = self.object_path(key)?;
        let meta = try_!(tokio::fs::metadata(&path).await);
        let last_modified = meta.modified().ok().map(time::OffsetDateTime::from).unwrap_or_else(time::OffsetDateTime::now_utc);

        let etag = if self.derive_etag_from_mtime {
            format!("{:x}-{:x}", last_modified.unix_timestamp(), meta.len())
        } else {
            self.read_xattr(&path, "etag").unwrap_or_else(|| format!("{:x}-{:x}", last_modified.unix_timestamp(), meta.len()))
        };

        Ok(BlobMetadata {
            size: meta.len(),
            etag,
            content_type: self.read_xattr(&path, "content-type"),
            cache_control: self.read_xattr(&path, "cache-control"),
            last_modified,
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_object(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        try_!(tokio::fs::remove_file(&path).await);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_objects(&self, keys: &[String]) -> Result<Vec<(String, Result<()>)>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push((key.clone(), self.delete_object(key).await));
        }
        Ok(results)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn create_multipart_upload(&self, _key: &str, opts: PutOptions) -> Result<MultipartUploadHandle> {
        let upload_id = uuid::Uuid::new_v4().to_string();
        try_!(tokio::fs::create_dir_all(self.multipart_dir(&upload_id)).await);
        self.write_pending_metadata(&upload_id, &opts).await?;
        Ok(MultipartUploadHandle { backend_upload_id: upload_id })
    }

    #[tracing::instrument(level = "debug", skip(self, body))]
    async fn upload_part(&self, _key: &str, upload_id: &str, part_number: i32, mut body: ByteStream, _size_hint: Option<u64>) -> Result<UploadedPart> {
        let part_path = self.multipart_dir(upload_id).join(format!("{part_number:08}"));
        let mut file = try_!(tokio::fs::File::create(&part_path).await);
        let mut hasher = <md5::Md5 as md5::Digest>::new();
        while let Some(chunk) = body.next().await {
            let chunk = try_!(chunk);
            md5::Digest::update(&mut hasher, &chunk);
            try_!(file.write_all(&chunk).await);
        }
        try_!(file.flush().await);
        let etag = format!("{:x}", md5::Digest::finalize(hasher));
        try_!(xattr::set(&part_path, xattr_name("etag"), etag.as_bytes()));
        Ok(UploadedPart { part_number, etag })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn complete_multipart_upload(&self, key: &str, upload_id: &str, parts: &[UploadedPart]) -> Result<BlobMetadata> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            try_!(tokio::fs::create_dir_all(parent).await);
        }
        let mut out = try_!(tokio::fs::File::create(&path).await);
        let mut hasher = <md5::Md5 as md5::Digest>::new();
        let mut size = 0u64;
        let mut sorted_parts = parts.to_vec();
        sorted_parts.sort_by_key(|p| p.part_number);
        for part in &sorted_parts {
            let part_path = self.multipart_dir(upload_id).join(format!("{:08}", part.part_number));
            let bytes = try_!(tokio::fs::read(&part_path).await);
            md5::Digest::update(&mut hasher, &bytes);
            size += bytes.len() as u64;
            try_!(out.write_all(&bytes).await);
        }
        try_!(out.flush().await);

        let pending = self.read_pending_metadata(upload_id).await;
        let _ = tokio::fs::remove_dir_all(self.multipart_dir(upload_id)).await;

        let etag = format!("{:x}", md5::Digest::finalize(hasher));
        let opts = PutOptions { content_type: pending.content_type.clone(), cache_control: pending.cache_control.clone() };
        let stored_etag = if self.derive_etag_from_mtime { None } else { Some(etag.as_str()) };
        self.write_xattrs(&path, &opts, stored_etag)?;

        Ok(BlobMetadata { size, etag, content_type: pending.content_type, cache_control: pending.cache_control, last_modified: time::OffsetDateTime::now_utc() })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        let _ = tokio::fs::remove_dir_all(self.multipart_dir(upload_id)).await;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = try_!(entries.next_entry().await) {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.ends_with(".tmp-upload") {
                    continue;
                }
                let file_type = try_!(entry.file_type().await);
                if file_type.is_dir() {
                    if name == ".multipart" {
                        continue;
                    }
                    stack.push(entry.path());
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&self.root).map(|p| p.to_owned()) else {
                    continue;
                };
                let key = self.relative_path_to_key(&rel.to_string_lossy());
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    /// Local-disk copy (`tokio::fs::copy`), not a hardlink: a hardlink shares one inode, so
    /// distinct xattrs on the destination (a different content-type, say) would silently mutate
    /// the source's metadata too, which would break spec §4.3's "copy must not alias versions".
    #[tracing::instrument(level = "debug", skip(self))]
    async fn copy_object(&self, src_key: &str, dst_key: &str, opts: PutOptions) -> Result<BlobMetadata> {
        let src_path = self.object_path(src_key)?;
        let dst_path = self.object_path(dst_key)?;
        if let Some(parent) = dst_path.parent() {
            try_!(tokio::fs::create_dir_all(parent).await);
        }
        try_!(tokio::fs::copy(&src_path, &dst_path).await);

        let etag = self.read_xattr(&src_path, "etag");
        self.write_xattrs(&dst_path, &opts, etag.as_deref())?;
        let meta = try_!(tokio::fs::metadata(&dst_path).await);
        Ok(BlobMetadata {
            size: meta.len(),
            etag: etag.unwrap_or_default(),
            content_type: opts.content_type,
            cache_control: opts.cache_control,
            last_modified: time::OffsetDateTime::now_utc(),
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn upload_part_copy(&self, src_key: &str, _dst_key: &str, upload_id: &str, part_number: i32, range: Option<ByteRange>) -> Result<UploadedPart> {
        let src_path = self.object_path(src_key)?;
        let bytes = try_!(tokio::fs::read(&src_path).await);
        let slice = match range {
            Some(r) => {
                let end = r.end.map(|e| (e as usize + 1).min(bytes.len())).unwrap_or(bytes.len());
                &bytes[(r.start as usize).min(bytes.len())..end]
            }
            None => &bytes[..],
        };

        let part_path = self.multipart_dir(upload_id).join(format!("{part_number:08}"));
        try_!(tokio::fs::write(&part_path, slice).await);
        let mut hasher = <md5::Md5 as md5::Digest>::new();
        md5::Digest::update(&mut hasher, slice);
        let etag = format!("{:x}", md5::Digest::finalize(hasher));
        try_!(xattr::set(&part_path, xattr_name("etag"), etag.as_bytes()));
        Ok(UploadedPart { part_number, etag })
    }

    async fn presign_get(&self, _key: &str, _expires_in_secs: u64) -> Result<Option<String>> {
        Ok(None)
    }

    async fn presign_put(&self, _key: &str, _expires_in_secs: u64) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn backend(dir: &Path) -> FsBlobBackend {
        FsBlobBackend::new(&FsBackendConfig {
            root_dir: dir.to_string_lossy().into_owned(),
            version_separator: "__v".into(),
            derive_etag_from_mtime: false,
        })
    }

    #[tokio::test]
    async fn put_then_get_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let body: ByteStream = stream::iter(vec![Ok(bytes::Bytes::from_static(b"hello "))  , Ok(bytes::Bytes::from_static(b"world"))]).boxed();
        backend.put_object("a/b.txt", body, None, PutOptions::default()).await.unwrap();

        let (outcome, mut stream) = backend.get_object("a/b.txt", None).await.unwrap();
        assert_eq!(outcome.metadata.size, 11);
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn rejects_path_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let body: ByteStream = stream::iter(vec![Ok(bytes::Bytes::from_static(b"x"))]).boxed();
        let err = backend.put_object("../escape.txt", body, None, PutOptions::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey));
    }

    #[tokio::test]
    async fn multipart_upload_reassembles_in_part_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let handle = backend.create_multipart_upload("big.bin", PutOptions::default()).await.unwrap();
        let p2 = backend
            .upload_part("big.bin", &handle.backend_upload_id, 2, stream::iter(vec![Ok(bytes::Bytes::from_static(b"second"))]).boxed(), None)
            .await
            .unwrap();
        let p1 = backend
            .upload_part("big.bin", &handle.backend_upload_id, 1, stream::iter(vec![Ok(bytes::Bytes::from_static(b"first-"))]).boxed(), None)
            .await
            .unwrap();
        backend.complete_multipart_upload("big.bin", &handle.backend_upload_id, &[p2, p1]).await.unwrap();

        let (_, mut stream) = backend.get_object("big.bin", None).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"first-second");
    }

    #[tokio::test]
    async fn etag_reported_by_write_matches_etag_reported_by_stats() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let body: ByteStream = stream::iter(vec![Ok(bytes::Bytes::from_static(b"payload"))]).boxed();
        let written = backend.put_object("a/b.txt", body, None, PutOptions::default()).await.unwrap();

        let stated = backend.head_object("a/b.txt").await.unwrap();
        assert_eq!(written.etag, stated.etag);
    }

    #[tokio::test]
    async fn object_with_slash_in_its_name_lists_back_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let body: ByteStream = stream::iter(vec![Ok(bytes::Bytes::from_static(b"v"))]).boxed();
        backend.put_object("bucket/path/to/object.txt/v1", body, None, PutOptions::default()).await.unwrap();

        let keys = backend.list_keys("bucket/").await.unwrap();
        assert_eq!(keys, vec!["bucket/path/to/object.txt/v1".to_string()]);
    }

    #[tokio::test]
    async fn copy_object_gives_the_destination_independent_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let body: ByteStream = stream::iter(vec![Ok(bytes::Bytes::from_static(b"payload"))]).boxed();
        backend.put_object("src", body, None, PutOptions { content_type: Some("text/plain".into()), cache_control: None }).await.unwrap();

        let dst_opts = PutOptions { content_type: Some("application/json".into()), cache_control: None };
        backend.copy_object("src", "dst", dst_opts).await.unwrap();

        let src_meta = backend.head_object("src").await.unwrap();
        let dst_meta = backend.head_object("dst").await.unwrap();
        assert_eq!(src_meta.content_type.as_deref(), Some("text/plain"));
        assert_eq!(dst_meta.content_type.as_deref(), Some("application/json"));
    }
}
