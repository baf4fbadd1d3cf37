//! Distributed upload lock (C4): guards concurrent writers to the same `(bucket, key, version)`
//! tuple. Two variants per spec §4.4/§6 `LOCK_VARIANT`; both implement the same trait so the
//! TUS engine and S3-wire multipart handlers don't care which is configured.

pub mod db_lock;
pub mod object_store_lock;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait LockHandle: Send + Sync {
    /// Releases the lock early. Also released implicitly when the handle is dropped without
    /// renewal past `ttl_ms` (spec §4.4 "leases expire; they are not reaped eagerly").
    async fn release(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait DistributedLock: Send + Sync + std::fmt::Debug + 'static {
    /// Attempts to acquire the lock for `key`, retrying at `retry_interval_ms` until
    /// `acquire_timeout_ms` elapses (spec §4.4). Returns `StorageError::LockTimeout` on timeout.
    async fn acquire(&self, key: &str) -> Result<Box<dyn LockHandle>>;
}

pub use db_lock::DatabaseAdvisoryLock;
pub use object_store_lock::ObjectStoreLock;
