use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};

use super::{DistributedLock, LockHandle};
use crate::blob::{BlobBackend, PutOptions};
use crate::config::LockConfig;
use crate::error::{Result, StorageError};

/// Object-store lock variant (spec §4.4 `LOCK_VARIANT=object_store`): a marker blob at
/// `{key_prefix}{key}.lock` stands in for the advisory lock when the deployment has no
/// Postgres to hold session-level locks against (e.g. the filesystem backend run standalone).
///
/// The teacher's stack never needed this — it always had Postgres for metadata — so there is no
/// prior art here to generalize from; this is a fresh read-then-write marker check. It is
/// intentionally best-effort: a true compare-and-swap "put if absent" primitive isn't exposed by
/// every backend, so two writers can both observe an absent marker in the same race window.
/// Acceptable for the filesystem/dev deployment this variant targets; the `db` variant is the
/// one meant for concurrent production access (spec §9 open question on lock variant trust).
pub struct ObjectStoreLock {
    blob: Arc<dyn BlobBackend>,
    cfg: LockConfig,
}

impl std::fmt::Debug for ObjectStoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreLock").finish()
    }
}

impl ObjectStoreLock {
    pub fn new(blob: Arc<dyn BlobBackend>, cfg: LockConfig) -> Self {
        Self { blob, cfg }
    }

    fn marker_key(&self, key: &str) -> String {
        format!("{}{}.lock", self.cfg.key_prefix, key)
    }
}

#[async_trait]
impl DistributedLock for ObjectStoreLock {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn acquire(&self, key: &str) -> Result<Box<dyn LockHandle>> {
        let marker = self.marker_key(key);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.cfg.acquire_timeout_ms);

        loop {
            let stale = match self.blob.head_object(&marker).await {
                Ok(meta) => {
                    let age_ms = (time::OffsetDateTime::now_utc() - meta.last_modified).whole_milliseconds();
                    age_ms > self.cfg.ttl_ms as i128
                }
                Err(StorageError::NoSuchKey) => true,
                Err(e) => return Err(e),
            };

            if stale {
                let body: crate::blob::ByteStream = stream::iter(vec![Ok(bytes::Bytes::from_static(b"locked"))]).boxed();
                self.blob.put_object(&marker, body, Some(6), PutOptions::default()).await?;
                return Ok(Box::new(ObjectStoreLockHandle { blob: self.blob.clone(), marker }));
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(StorageError::LockTimeout);
            }
            tokio::time::sleep(Duration::from_millis(self.cfg.retry_interval_ms)).await;
        }
    }
}

struct ObjectStoreLockHandle {
    blob: Arc<dyn BlobBackend>,
    marker: String,
}

#[async_trait]
impl LockHandle for ObjectStoreLockHandle {
    async fn release(self: Box<Self>) -> Result<()> {
        self.blob.delete_object(&self.marker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeBlob;

    #[tokio::test]
    async fn acquire_then_release_clears_the_marker() {
        let blob: Arc<dyn BlobBackend> = Arc::new(FakeBlob::default());
        let lock = ObjectStoreLock::new(blob.clone(), LockConfig::default());

        let handle = lock.acquire("bucket/obj").await.unwrap();
        assert!(blob.head_object(&lock.marker_key("bucket/obj")).await.is_ok());

        handle.release().await.unwrap();
        assert!(matches!(blob.head_object(&lock.marker_key("bucket/obj")).await, Err(StorageError::NoSuchKey)));
    }

    #[tokio::test]
    async fn second_acquire_times_out_while_marker_is_fresh() {
        let blob: Arc<dyn BlobBackend> = Arc::new(FakeBlob::default());
        let cfg = LockConfig { acquire_timeout_ms: 50, retry_interval_ms: 10, ttl_ms: 60_000, ..LockConfig::default() };
        let lock = ObjectStoreLock::new(blob.clone(), cfg);

        let _handle = lock.acquire("bucket/obj").await.unwrap();
        let err = lock.acquire("bucket/obj").await.unwrap_err();
        assert!(matches!(err, StorageError::LockTimeout));
    }
}
