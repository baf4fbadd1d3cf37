//! Shard/slot/lease allocator (C8). No teacher precedent; grounded directly on spec §4.8's
//! described algorithm (find least-loaded shard, claim or mint a slot, reserve with a lease,
//! confirm/cancel/expire), implemented against the `MetaStore` shard_* methods added for this
//! spec in `metadata::postgres`.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::ShardConfig;
use crate::error::{Result, StorageError};
use crate::metadata::{MetaStore, ResourceKind};

pub struct ShardAllocator {
    meta: Arc<dyn MetaStore>,
    cfg: ShardConfig,
}

impl std::fmt::Debug for ShardAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardAllocator").finish()
    }
}

#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: Uuid,
    pub shard_id: Uuid,
    pub slot_no: i64,
    pub lease_expires_at: OffsetDateTime,
}

impl ShardAllocator {
    pub fn new(meta: Arc<dyn MetaStore>, cfg: ShardConfig) -> Self {
        Self { meta, cfg }
    }

    /// spec §4.8 step-by-step: find the shard with the most free capacity, try to claim an
    /// already-freed slot on it first, mint a new slot only if none are free, then record a
    /// pending reservation with a lease. Confirmation (step 3) is a separate call so the caller
    /// can fail the placement without leaving a confirmed slot behind.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn reserve(&self, kind: ResourceKind, resource_id: Uuid, tenant_id: &str) -> Result<Reservation> {
        let shard = self.meta.shard_get_least_loaded(kind).await?.ok_or(StorageError::NoActiveShardError)?;

        let slot_no = match self.meta.shard_claim_free_slot(shard.id).await? {
            Some(slot) => slot,
            None => {
                let capacity = self.cfg.default_capacity.ok_or_else(|| {
                    StorageError::InternalError("SHARD_DEFAULT_CAPACITY is not configured".into())
                })?;
                self.meta.shard_mint_slot(shard.id, capacity).await?.ok_or(StorageError::NoCapacityError)?
            }
        };

        let lease_expires_at = OffsetDateTime::now_utc() + time::Duration::milliseconds(self.cfg.default_lease_ms);
        let reservation_id = self.meta.shard_insert_reservation(kind, resource_id, tenant_id, shard.id, slot_no, lease_expires_at).await?;

        Ok(Reservation { id: reservation_id, shard_id: shard.id, slot_no, lease_expires_at })
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn confirm(&self, reservation_id: Uuid, resource_id: Uuid, tenant_id: &str) -> Result<()> {
        let updated = self.meta.shard_confirm_reservation(reservation_id, resource_id, tenant_id).await?;
        if updated == 0 {
            // idempotent replay of an already-confirmed reservation; not an error (spec §4.8).
            tracing::debug!(%reservation_id, "confirm was a no-op");
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn cancel(&self, reservation_id: Uuid) -> Result<()> {
        self.meta.shard_cancel_reservation(reservation_id).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn expire_leases(&self) -> Result<u64> {
        self.meta.shard_expire_leases(OffsetDateTime::now_utc()).await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn free_by_resource(&self, resource_id: Uuid) -> Result<()> {
        self.meta.shard_free_by_resource(resource_id).await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn free_by_location(&self, shard_id: Uuid, slot_no: i64) -> Result<()> {
        self.meta.shard_free_by_location(shard_id, slot_no).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeMeta;

    fn allocator(meta: FakeMeta, default_capacity: Option<i64>) -> (ShardAllocator, Arc<FakeMeta>) {
        let meta = Arc::new(meta);
        let cfg = ShardConfig { default_capacity, default_lease_ms: 30_000 };
        (ShardAllocator::new(meta.clone(), cfg), meta)
    }

    #[tokio::test]
    async fn reserve_mints_a_fresh_slot_when_none_are_free() {
        let meta = FakeMeta::default();
        let shard_id = meta.insert_shard(ResourceKind::Vector, 10);
        let (allocator, _meta) = allocator(meta, Some(10));

        let resource_id = Uuid::new_v4();
        let reservation = allocator.reserve(ResourceKind::Vector, resource_id, "tenant-a").await.unwrap();
        assert_eq!(reservation.shard_id, shard_id);
        assert_eq!(reservation.slot_no, 0);
    }

    #[tokio::test]
    async fn reserve_without_shards_is_an_error() {
        let (allocator, _meta) = allocator(FakeMeta::default(), Some(10));
        let err = allocator.reserve(ResourceKind::Vector, Uuid::new_v4(), "tenant-a").await.unwrap_err();
        assert!(matches!(err, StorageError::NoActiveShardError));
    }

    #[tokio::test]
    async fn reserve_past_capacity_is_a_distinct_error() {
        let meta = FakeMeta::default();
        meta.insert_shard(ResourceKind::Vector, 1);
        let (allocator, _meta) = allocator(meta, Some(1));

        allocator.reserve(ResourceKind::Vector, Uuid::new_v4(), "tenant-a").await.unwrap();
        let err = allocator.reserve(ResourceKind::Vector, Uuid::new_v4(), "tenant-a").await.unwrap_err();
        assert!(matches!(err, StorageError::NoCapacityError));
    }

    #[tokio::test]
    async fn confirm_is_idempotent_on_replay() {
        let meta = FakeMeta::default();
        meta.insert_shard(ResourceKind::Vector, 10);
        let (allocator, _meta) = allocator(meta, Some(10));

        let resource_id = Uuid::new_v4();
        let reservation = allocator.reserve(ResourceKind::Vector, resource_id, "tenant-a").await.unwrap();
        allocator.confirm(reservation.id, resource_id, "tenant-a").await.unwrap();
        // replaying confirm on the same reservation must not error.
        allocator.confirm(reservation.id, resource_id, "tenant-a").await.unwrap();
    }

    #[tokio::test]
    async fn cancel_then_free_do_not_error_on_unknown_ids() {
        let (allocator, _meta) = allocator(FakeMeta::default(), Some(10));
        allocator.cancel(Uuid::new_v4()).await.unwrap();
        allocator.free_by_resource(Uuid::new_v4()).await.unwrap();
        allocator.free_by_location(Uuid::new_v4(), 0).await.unwrap();
    }
}
