//! In-memory `MetaStore`/`BlobBackend` fakes shared by unit tests across C1/C2/C3/C5/C7/C8, so
//! each component's tests exercise real call sequences instead of mocking framework internals.
//! Test-only: compiled behind `#[cfg(test)]` in every module that uses it.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::blob::{BlobBackend, BlobMetadata, ByteRange, ByteStream, GetOutcome, MultipartUploadHandle, PutOptions, UploadedPart};
use crate::error::{Result, StorageError};
use crate::metadata::{
    Bucket, FindOrCreateUpload, ListOptions, ListPage, MetaStore, Object, ObjectMetadata, ResourceKind, RowLock, S3Credential, Shard,
    ShardReservation, ShardStatus, Timestamp, UploadRecord,
};

#[derive(Debug, Default)]
pub struct FakeBlob {
    objects: Mutex<HashMap<String, (Bytes, PutOptions)>>,
    multipart_parts: Mutex<HashMap<String, Vec<(i32, Bytes)>>>,
    multipart_opts: Mutex<HashMap<String, PutOptions>>,
}

#[async_trait]
impl BlobBackend for FakeBlob {
    async fn put_object(&self, key: &str, mut body: ByteStream, _size_hint: Option<u64>, opts: PutOptions) -> Result<BlobMetadata> {
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk.map_err(|e| StorageError::InternalError(e.to_string()))?);
        }
        let bytes = Bytes::from(buf);
        let meta = BlobMetadata {
            size: bytes.len() as u64,
            etag: md5_hex(&bytes),
            content_type: opts.content_type.clone(),
            cache_control: opts.cache_control.clone(),
            last_modified: OffsetDateTime::now_utc(),
        };
        self.objects.lock().unwrap().insert(key.to_owned(), (bytes, opts));
        Ok(meta)
    }

    async fn get_object(&self, key: &str, _range: Option<ByteRange>) -> Result<(GetOutcome, ByteStream)> {
        let guard = self.objects.lock().unwrap();
        let (bytes, opts) = guard.get(key).ok_or(StorageError::NoSuchKey)?;
        let meta = BlobMetadata {
            size: bytes.len() as u64,
            etag: md5_hex(bytes),
            content_type: opts.content_type.clone(),
            cache_control: opts.cache_control.clone(),
            last_modified: OffsetDateTime::now_utc(),
        };
        let body: ByteStream = stream::iter(vec![Ok(bytes.clone())]).boxed();
        Ok((GetOutcome { metadata: meta }, body))
    }

    async fn head_object(&self, key: &str) -> Result<BlobMetadata> {
        let guard = self.objects.lock().unwrap();
        let (bytes, opts) = guard.get(key).ok_or(StorageError::NoSuchKey)?;
        Ok(BlobMetadata {
            size: bytes.len() as u64,
            etag: md5_hex(bytes),
            content_type: opts.content_type.clone(),
            cache_control: opts.cache_control.clone(),
            last_modified: OffsetDateTime::now_utc(),
        })
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<Vec<(String, Result<()>)>> {
        let mut out = Vec::new();
        for key in keys {
            self.objects.lock().unwrap().remove(key);
            out.push((key.clone(), Ok(())));
        }
        Ok(out)
    }

    async fn create_multipart_upload(&self, _key: &str, opts: PutOptions) -> Result<MultipartUploadHandle> {
        let upload_id = Uuid::new_v4().to_string();
        self.multipart_opts.lock().unwrap().insert(upload_id.clone(), opts);
        Ok(MultipartUploadHandle { backend_upload_id: upload_id })
    }

    async fn upload_part(&self, _key: &str, upload_id: &str, part_number: i32, mut body: ByteStream, _size_hint: Option<u64>) -> Result<UploadedPart> {
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk.map_err(|e| StorageError::InternalError(e.to_string()))?);
        }
        let bytes = Bytes::from(buf);
        let etag = md5_hex(&bytes);
        self.multipart_parts.lock().unwrap().entry(upload_id.to_owned()).or_default().push((part_number, bytes));
        Ok(UploadedPart { part_number, etag })
    }

    async fn complete_multipart_upload(&self, key: &str, upload_id: &str, parts: &[UploadedPart]) -> Result<BlobMetadata> {
        let mut staged = self.multipart_parts.lock().unwrap().remove(upload_id).unwrap_or_default();
        staged.sort_by_key(|(n, _)| *n);
        let mut whole = Vec::new();
        for part in parts {
            let (_, bytes) = staged.iter().find(|(n, _)| *n == part.part_number).ok_or(StorageError::InvalidParameter("unknown part number".into()))?;
            whole.extend_from_slice(bytes);
        }
        let opts = self.multipart_opts.lock().unwrap().remove(upload_id).unwrap_or_default();
        self.put_object(key, stream::iter(vec![Ok(Bytes::from(whole))]).boxed(), None, opts).await
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.multipart_parts.lock().unwrap().remove(upload_id);
        self.multipart_opts.lock().unwrap().remove(upload_id);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.objects.lock().unwrap().keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    async fn copy_object(&self, src_key: &str, dst_key: &str, opts: PutOptions) -> Result<BlobMetadata> {
        let bytes = self.objects.lock().unwrap().get(src_key).ok_or(StorageError::NoSuchKey)?.0.clone();
        let meta = BlobMetadata {
            size: bytes.len() as u64,
            etag: md5_hex(&bytes),
            content_type: opts.content_type.clone(),
            cache_control: opts.cache_control.clone(),
            last_modified: OffsetDateTime::now_utc(),
        };
        self.objects.lock().unwrap().insert(dst_key.to_owned(), (bytes, opts));
        Ok(meta)
    }

    async fn upload_part_copy(&self, src_key: &str, _dst_key: &str, upload_id: &str, part_number: i32, range: Option<ByteRange>) -> Result<UploadedPart> {
        let bytes = self.objects.lock().unwrap().get(src_key).ok_or(StorageError::NoSuchKey)?.0.clone();
        let slice = match range {
            Some(r) => {
                let end = r.end.map(|e| (e as usize + 1).min(bytes.len())).unwrap_or(bytes.len());
                bytes.slice((r.start as usize).min(bytes.len())..end)
            }
            None => bytes,
        };
        let etag = md5_hex(&slice);
        self.multipart_parts.lock().unwrap().entry(upload_id.to_owned()).or_default().push((part_number, slice));
        Ok(UploadedPart { part_number, etag })
    }

    async fn presign_get(&self, _key: &str, _expires_in_secs: u64) -> Result<Option<String>> {
        Ok(None)
    }

    async fn presign_put(&self, _key: &str, _expires_in_secs: u64) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub struct FakeMeta {
    buckets: Mutex<HashMap<Uuid, Bucket>>,
    objects: Mutex<HashMap<(Uuid, String), Object>>,
    uploads: Mutex<HashMap<Uuid, UploadRecord>>,
    credentials: Mutex<HashMap<String, S3Credential>>,
    shards: Mutex<HashMap<Uuid, Shard>>,
    reservations: Mutex<HashMap<Uuid, ShardReservation>>,
}

impl FakeMeta {
    pub fn with_bucket(name: &str, owner: &str) -> (Self, Uuid) {
        let id = Uuid::new_v4();
        let bucket = Bucket {
            id,
            name: name.to_owned(),
            owner: owner.to_owned(),
            public: false,
            size_limit: None,
            allowed_mime_types: None,
            disk_reference: None,
            created_at: OffsetDateTime::now_utc(),
        };
        let this = Self::default();
        this.buckets.lock().unwrap().insert(id, bucket);
        (this, id)
    }
}

#[async_trait]
impl MetaStore for FakeMeta {
    async fn healthcheck(&self) -> Result<()> {
        Ok(())
    }

    async fn create_bucket(&self, owner: &str, name: &str, public: bool, size_limit: Option<i64>) -> Result<Bucket> {
        let id = Uuid::new_v4();
        let bucket = Bucket { id, name: name.to_owned(), owner: owner.to_owned(), public, size_limit, allowed_mime_types: None, disk_reference: None, created_at: OffsetDateTime::now_utc() };
        self.buckets.lock().unwrap().insert(id, bucket.clone());
        Ok(bucket)
    }

    async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>> {
        Ok(self.buckets.lock().unwrap().values().find(|b| b.name == name).cloned())
    }

    async fn get_bucket_by_id(&self, id: Uuid) -> Result<Option<Bucket>> {
        Ok(self.buckets.lock().unwrap().get(&id).cloned())
    }

    async fn list_buckets(&self, owner: Option<&str>) -> Result<Vec<Bucket>> {
        Ok(self.buckets.lock().unwrap().values().filter(|b| owner.map_or(true, |o| o == b.owner)).cloned().collect())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.buckets.lock().unwrap().retain(|_, b| b.name != name);
        Ok(())
    }

    async fn empty_bucket(&self, name: &str, _max_objects: i64) -> Result<u64> {
        let Some(bucket) = self.get_bucket(name).await? else { return Ok(0) };
        let mut objects = self.objects.lock().unwrap();
        let before = objects.len();
        objects.retain(|(bucket_id, _), _| *bucket_id != bucket.id);
        Ok((before - objects.len()) as u64)
    }

    async fn count_objects_in_bucket(&self, bucket_id: Uuid, _limit: i64) -> Result<i64> {
        Ok(self.objects.lock().unwrap().keys().filter(|(b, _)| *b == bucket_id).count() as i64)
    }

    async fn get_object(&self, bucket_id: Uuid, name: &str, _lock: RowLock) -> Result<Option<Object>> {
        Ok(self.objects.lock().unwrap().get(&(bucket_id, name.to_owned())).cloned())
    }

    async fn find_or_create_object_for_upload(&self, opts: FindOrCreateUpload<'_>) -> Result<Object> {
        let key = (opts.bucket_id, opts.object_name.to_owned());
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) && !opts.is_upsert {
            return Err(StorageError::KeyAlreadyExists);
        }
        let now = OffsetDateTime::now_utc();
        let object = Object {
            id: objects.get(&key).map(|o| o.id).unwrap_or_else(Uuid::new_v4),
            bucket_id: opts.bucket_id,
            name: opts.object_name.to_owned(),
            owner: opts.owner.to_owned(),
            metadata: sqlx::types::Json(ObjectMetadata::default()),
            user_metadata: sqlx::types::Json(opts.user_metadata.unwrap_or(serde_json::Value::Null)),
            last_accessed_at: None,
            version: opts.version.to_owned(),
            created_at: now,
            updated_at: now,
        };
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update_object_version(&self, object_id: Uuid, new_version: &str, metadata: &ObjectMetadata) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        if let Some(object) = objects.values_mut().find(|o| o.id == object_id) {
            object.version = new_version.to_owned();
            object.metadata = sqlx::types::Json(metadata.clone());
            object.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn delete_object(&self, bucket_id: Uuid, name: &str) -> Result<Option<Object>> {
        Ok(self.objects.lock().unwrap().remove(&(bucket_id, name.to_owned())))
    }

    async fn list_objects(&self, bucket_id: Uuid, opts: ListOptions<'_>) -> Result<ListPage> {
        let mut entries: Vec<Object> = self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.bucket_id == bucket_id)
            .filter(|o| opts.prefix.map_or(true, |p| o.name.starts_with(p)))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries.truncate(opts.max_keys.max(0) as usize);
        Ok(ListPage { entries, next_token: None })
    }

    async fn touch_last_accessed(&self, object_id: Uuid) -> Result<()> {
        if let Some(object) = self.objects.lock().unwrap().values_mut().find(|o| o.id == object_id) {
            object.last_accessed_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn create_upload_record(&self, rec: &UploadRecord) -> Result<UploadRecord> {
        self.uploads.lock().unwrap().insert(rec.id, rec.clone());
        Ok(rec.clone())
    }

    async fn get_upload_record(&self, bucket_id: Uuid, object_name: &str, version: &str) -> Result<Option<UploadRecord>> {
        Ok(self.uploads.lock().unwrap().values().find(|r| r.bucket_id == bucket_id && r.object_name == object_name && r.version == version).cloned())
    }

    async fn get_upload_record_by_id(&self, id: Uuid) -> Result<Option<UploadRecord>> {
        Ok(self.uploads.lock().unwrap().get(&id).cloned())
    }

    async fn update_upload_offset(&self, id: Uuid, new_offset: i64) -> Result<()> {
        if let Some(rec) = self.uploads.lock().unwrap().get_mut(&id) {
            rec.offset = new_offset;
        }
        Ok(())
    }

    async fn append_upload_part(&self, id: Uuid, new_offset: i64, part: crate::blob::UploadedPart) -> Result<()> {
        if let Some(rec) = self.uploads.lock().unwrap().get_mut(&id) {
            rec.offset = new_offset;
            rec.parts.0.push(part);
        }
        Ok(())
    }

    async fn delete_upload_record(&self, id: Uuid) -> Result<()> {
        self.uploads.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn list_expired_uploads(&self, now: Timestamp) -> Result<Vec<UploadRecord>> {
        Ok(self.uploads.lock().unwrap().values().filter(|r| r.expires_at < now).cloned().collect())
    }

    async fn get_s3_credential(&self, access_key: &str) -> Result<Option<S3Credential>> {
        Ok(self.credentials.lock().unwrap().get(access_key).cloned())
    }

    async fn create_s3_credential(&self, cred: &S3Credential) -> Result<()> {
        self.credentials.lock().unwrap().insert(cred.access_key.clone(), cred.clone());
        Ok(())
    }

    async fn delete_s3_credential(&self, access_key: &str) -> Result<()> {
        self.credentials.lock().unwrap().remove(access_key);
        Ok(())
    }

    async fn list_s3_credentials(&self, tenant_id: &str) -> Result<Vec<S3Credential>> {
        Ok(self.credentials.lock().unwrap().values().filter(|c| c.tenant_id == tenant_id).cloned().collect())
    }

    async fn shard_get_least_loaded(&self, kind: ResourceKind) -> Result<Option<Shard>> {
        Ok(self.shards.lock().unwrap().values().filter(|s| s.kind == kind && s.status == ShardStatus::Active).min_by_key(|s| s.next_slot).cloned())
    }

    async fn shard_claim_free_slot(&self, _shard_id: Uuid) -> Result<Option<i64>> {
        Ok(None)
    }

    async fn shard_mint_slot(&self, shard_id: Uuid, capacity: i64) -> Result<Option<i64>> {
        let mut shards = self.shards.lock().unwrap();
        let Some(shard) = shards.get_mut(&shard_id) else { return Ok(None) };
        if shard.next_slot >= capacity {
            return Ok(None);
        }
        let slot = shard.next_slot;
        shard.next_slot += 1;
        Ok(Some(slot))
    }

    async fn shard_insert_reservation(
        &self,
        kind: ResourceKind,
        resource_id: Uuid,
        tenant_id: &str,
        shard_id: Uuid,
        slot_no: i64,
        lease_expires_at: Timestamp,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.reservations.lock().unwrap().insert(
            id,
            ShardReservation { id, kind, resource_id, tenant_id: tenant_id.to_owned(), shard_id, slot_no, status: crate::metadata::ReservationStatus::Pending, lease_expires_at },
        );
        Ok(id)
    }

    async fn shard_confirm_reservation(&self, reservation_id: Uuid, _resource_id: Uuid, _tenant_id: &str) -> Result<u64> {
        if let Some(r) = self.reservations.lock().unwrap().get_mut(&reservation_id) {
            r.status = crate::metadata::ReservationStatus::Confirmed;
            return Ok(1);
        }
        Ok(0)
    }

    async fn shard_cancel_reservation(&self, reservation_id: Uuid) -> Result<()> {
        if let Some(r) = self.reservations.lock().unwrap().get_mut(&reservation_id) {
            r.status = crate::metadata::ReservationStatus::Cancelled;
        }
        Ok(())
    }

    async fn shard_expire_leases(&self, now: Timestamp) -> Result<u64> {
        let mut count = 0;
        for r in self.reservations.lock().unwrap().values_mut() {
            if r.status == crate::metadata::ReservationStatus::Pending && r.lease_expires_at < now {
                r.status = crate::metadata::ReservationStatus::Expired;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn shard_free_by_resource(&self, resource_id: Uuid) -> Result<()> {
        self.reservations.lock().unwrap().retain(|_, r| r.resource_id != resource_id);
        Ok(())
    }

    async fn shard_free_by_location(&self, shard_id: Uuid, slot_no: i64) -> Result<()> {
        self.reservations.lock().unwrap().retain(|_, r| !(r.shard_id == shard_id && r.slot_no == slot_no));
        Ok(())
    }

    async fn object_names_in_bucket(&self, bucket_id: Uuid, _before: Option<Timestamp>) -> Result<Vec<String>> {
        Ok(self.objects.lock().unwrap().keys().filter(|(b, _)| *b == bucket_id).map(|(_, name)| name.clone()).collect())
    }
}

impl FakeMeta {
    pub fn insert_shard(&self, kind: ResourceKind, capacity: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.shards.lock().unwrap().insert(id, Shard { id, kind, shard_key: id.to_string(), capacity, next_slot: 0, status: ShardStatus::Active });
        id
    }
}

fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = <md5::Md5 as md5::Digest>::new();
    md5::Digest::update(&mut hasher, bytes);
    format!("{:x}", md5::Digest::finalize(hasher))
}
