//! S3-wire protocol surface (C6's host), generalized from the teacher's `RadosStore` (`service.rs`)
//! into a multi-tenant `s3s::S3` implementation. The teacher proxied every call straight through to
//! one upstream S3 bucket plus a single-tenant Postgres catalog; this type resolves the caller's
//! tenant from the request's access key first, then delegates to the same `ObjectLifecycleManager`/
//! `MetaStore`/`BlobBackend` trio the REST surface (`rest::objects`) uses, so both protocols commit
//! through one code path.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use s3s::dto::*;
use s3s::{s3_error, S3Request, S3Response, S3Result, S3};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::blob::{ByteRange, ByteStream, PutOptions};
use crate::lifecycle::UploadOptions;
use crate::metadata::{ListOptions, UploadKind, UploadRecord};
use crate::rest::{AppState, TenantContext};

/// Resolves SigV4 access keys against every tenant's catalog instead of one static pair (spec §3
/// "S3 Credential"), replacing the teacher's `SimpleAuth::from_single`. No teacher precedent for a
/// multi-credential `S3Auth` impl exists in the pack; this follows `s3s::auth::SimpleAuth`'s own
/// shape (one async lookup returning the secret key s3s needs to verify the request signature).
#[derive(Debug)]
pub struct S3AuthProvider {
    state: Arc<AppState>,
}

impl S3AuthProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl s3s::auth::S3Auth for S3AuthProvider {
    async fn get_secret_key(&self, access_key: &str) -> S3Result<s3s::auth::SecretKey> {
        let (ctx, cred) = self.state.resolve_access_key(access_key).await?;
        let secret = crate::crypto::decrypt_str(&self.state.auth_encryption_key, &cred.encrypted_secret_key)?;
        let _ = ctx;
        Ok(s3s::auth::SecretKey::from(secret))
    }
}

#[derive(Debug)]
pub struct StorageCoreS3 {
    state: Arc<AppState>,
}

impl StorageCoreS3 {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    async fn authorize(&self, req_credentials: &Option<s3s::Credentials>) -> S3Result<TenantContext> {
        let creds = req_credentials.as_ref().ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::AccessDenied))?;
        let (ctx, _cred) = self.state.resolve_access_key(creds.access_key.as_str()).await?;
        Ok(ctx)
    }

    fn storage_key(bucket: &str, object_name: &str, version: &str) -> String {
        format!("{bucket}/{object_name}/{version}")
    }

    /// Strips `aws-chunked`/`STREAMING-AWS4-HMAC-SHA256-PAYLOAD` framing off a `PutObject` body,
    /// verifying each chunk's signature against the seed signature in the request's `Authorization`
    /// header as it goes (C6 `SigV4ChunkedParser`, spec §4.6).
    async fn decode_streaming_body(&self, access_key: &str, auth_header: &str, body: ByteStream) -> S3Result<ByteStream> {
        let (_ctx, cred) = self.state.resolve_access_key(access_key).await?;
        let secret_key = crate::crypto::decrypt_str(&self.state.auth_encryption_key, &cred.encrypted_secret_key)?;
        let (date, scope, seed_signature) = crate::sigv4::parse_authorization_header(auth_header).ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::InvalidArgument))?;

        let raw: Vec<u8> = body
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .map_err(|_| s3s::S3Error::new(s3s::S3ErrorCode::InternalError))?;

        let mut parser = crate::sigv4::SigV4ChunkedParser::new(secret_key, date, scope, seed_signature, self.state.sigv4_cfg.clone());
        let chunks = parser.feed(&raw)?;
        let decoded: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        Ok(futures::stream::once(async move { Ok(bytes::Bytes::from(decoded)) }).boxed())
    }
}

fn to_timestamp(t: OffsetDateTime) -> Timestamp {
    Timestamp::from(t)
}

fn into_byte_stream(body: Option<StreamingBlob>) -> ByteStream {
    match body {
        Some(blob) => blob.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)).boxed(),
        None => futures::stream::empty().boxed(),
    }
}

#[async_trait]
impl S3 for StorageCoreS3 {
    #[tracing::instrument(level = "info", skip(self))]
    async fn create_bucket(&self, req: S3Request<CreateBucketInput>) -> S3Result<S3Response<CreateBucketOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let owner = req.credentials.as_ref().map(|c| c.access_key.as_str()).unwrap_or_default();
        if ctx.meta.get_bucket(&req.input.bucket).await?.is_some() {
            return Err(s3s::S3Error::new(s3s::S3ErrorCode::BucketAlreadyExists));
        }
        ctx.meta.create_bucket(owner, &req.input.bucket, false, None).await?;
        Ok(S3Response::new(CreateBucketOutput { location: None }))
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn delete_bucket(&self, req: S3Request<DeleteBucketInput>) -> S3Result<S3Response<DeleteBucketOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let bucket = ctx.meta.get_bucket(&req.input.bucket).await?.ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchBucket))?;
        if ctx.meta.count_objects_in_bucket(bucket.id, 1).await? > 0 {
            return Err(s3_error!(BucketNotEmpty));
        }
        ctx.meta.delete_bucket(&req.input.bucket).await?;
        Ok(S3Response::new(DeleteBucketOutput {}))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn head_bucket(&self, req: S3Request<HeadBucketInput>) -> S3Result<S3Response<HeadBucketOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        ctx.meta.get_bucket(&req.input.bucket).await?.ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchBucket))?;
        Ok(S3Response::new(HeadBucketOutput::default()))
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn list_buckets(&self, req: S3Request<ListBucketsInput>) -> S3Result<S3Response<ListBucketsOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let owner = req.credentials.as_ref().map(|c| c.access_key.as_str());
        let buckets = ctx
            .meta
            .list_buckets(owner)
            .await?
            .into_iter()
            .map(|b| Bucket { creation_date: Some(to_timestamp(b.created_at)), name: Some(b.name) })
            .collect();
        Ok(S3Response::new(ListBucketsOutput {
            buckets: Some(buckets),
            owner: owner.map(|o| Owner { id: Some(o.to_owned()), display_name: Some(o.to_owned()) }),
        }))
    }

    #[tracing::instrument(level = "debug", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn put_object(&self, req: S3Request<PutObjectInput>) -> S3Result<S3Response<PutObjectOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let owner = req.credentials.as_ref().map(|c| c.access_key.as_str()).unwrap_or_default();
        let is_streamed = req
            .headers
            .get("x-amz-content-sha256")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("STREAMING-"));
        let streaming_auth = is_streamed.then(|| req.headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_owned)).flatten();
        let access_key = req.credentials.as_ref().map(|c| c.access_key.to_string()).unwrap_or_default();
        let input = req.input;

        let body = match streaming_auth {
            Some(auth_header) => self.decode_streaming_body(&access_key, &auth_header, into_byte_stream(input.body)).await?,
            None => into_byte_stream(input.body),
        };
        let opts = UploadOptions {
            content_type: input.content_type,
            cache_control: input.cache_control,
            user_metadata: input.metadata.map(|m| serde_json::json!(m)),
            allow_overwrite: true,
        };
        let object = ctx
            .lifecycle
            .upload(&input.bucket, &input.key, owner, body, input.content_length.map(|n| n as u64), opts)
            .await?;

        Ok(S3Response::new(PutObjectOutput { e_tag: object.metadata.etag.clone(), ..Default::default() }))
    }

    #[tracing::instrument(level = "debug", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn get_object(&self, req: S3Request<GetObjectInput>) -> S3Result<S3Response<GetObjectOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let (object, outcome, stream) = ctx.lifecycle.get(&req.input.bucket, &req.input.key).await?;
        ctx.lifecycle.touch_last_accessed(object.id).await?;

        let body = Some(StreamingBlob::from(stream.map_err(std::io::Error::into)));
        Ok(S3Response::new(GetObjectOutput {
            body,
            content_length: Some(outcome.metadata.size as i64),
            content_type: outcome.metadata.content_type,
            cache_control: outcome.metadata.cache_control,
            e_tag: object.metadata.etag.clone(),
            last_modified: Some(to_timestamp(object.updated_at)),
            ..Default::default()
        }))
    }

    #[tracing::instrument(level = "debug", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn head_object(&self, req: S3Request<HeadObjectInput>) -> S3Result<S3Response<HeadObjectOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let bucket = ctx.meta.get_bucket(&req.input.bucket).await?.ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchBucket))?;
        let object = ctx
            .meta
            .get_object(bucket.id, &req.input.key, crate::metadata::RowLock::None)
            .await?
            .ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchKey))?;

        Ok(S3Response::new(HeadObjectOutput {
            content_length: Some(object.metadata.size),
            content_type: object.metadata.mime.clone(),
            cache_control: object.metadata.cache_control.clone(),
            e_tag: object.metadata.etag.clone(),
            last_modified: Some(to_timestamp(object.updated_at)),
            ..Default::default()
        }))
    }

    #[tracing::instrument(level = "info", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn delete_object(&self, req: S3Request<DeleteObjectInput>) -> S3Result<S3Response<DeleteObjectOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        ctx.lifecycle.delete(&req.input.bucket, &req.input.key).await?;
        Ok(S3Response::new(DeleteObjectOutput { delete_marker: Some(false), ..Default::default() }))
    }

    #[tracing::instrument(level = "info", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn delete_objects(&self, req: S3Request<DeleteObjectsInput>) -> S3Result<S3Response<DeleteObjectsOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let mut deleted = Vec::new();
        let mut errors = Vec::new();
        for obj in req.input.delete.objects {
            match ctx.lifecycle.delete(&req.input.bucket, &obj.key).await {
                Ok(()) => deleted.push(DeletedObject { key: Some(obj.key), ..Default::default() }),
                Err(e) => errors.push(Error { key: Some(obj.key), code: Some(e.code().to_owned()), message: Some(e.to_string()), ..Default::default() }),
            }
        }
        Ok(S3Response::new(DeleteObjectsOutput { deleted: Some(deleted), errors: Some(errors), ..Default::default() }))
    }

    #[tracing::instrument(level = "info", skip(self, req), fields(src = %req.input.copy_source))]
    async fn copy_object(&self, req: S3Request<CopyObjectInput>) -> S3Result<S3Response<CopyObjectOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let owner = req.credentials.as_ref().map(|c| c.access_key.as_str()).unwrap_or_default();
        let (src_bucket, src_key) = parse_copy_source(&req.input.copy_source)?;
        let object = ctx.lifecycle.copy(&src_bucket, &src_key, &req.input.bucket, &req.input.key, owner).await?;
        Ok(S3Response::new(CopyObjectOutput {
            copy_object_result: Some(CopyObjectResult { e_tag: object.metadata.etag.clone(), last_modified: Some(to_timestamp(object.updated_at)), ..Default::default() }),
            ..Default::default()
        }))
    }

    #[tracing::instrument(level = "debug", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn list_objects_v2(&self, req: S3Request<ListObjectsV2Input>) -> S3Result<S3Response<ListObjectsV2Output>> {
        let ctx = self.authorize(&req.credentials).await?;
        let input = &req.input;
        let bucket = ctx.meta.get_bucket(&input.bucket).await?.ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchBucket))?;

        let opts = ListOptions {
            prefix: input.prefix.as_deref(),
            delimiter: input.delimiter.as_deref(),
            next_token: input.continuation_token.as_deref(),
            start_after: input.start_after.as_deref(),
            before_date: None,
            max_keys: input.max_keys.map(i64::from).unwrap_or(1000),
        };
        let page = ctx.meta.list_objects(bucket.id, opts).await?;

        let contents: Vec<Object> = page
            .entries
            .iter()
            .map(|o| Object {
                key: Some(o.name.clone()),
                e_tag: o.metadata.etag.clone(),
                size: Some(o.metadata.size),
                last_modified: Some(to_timestamp(o.updated_at)),
                ..Default::default()
            })
            .collect();

        Ok(S3Response::new(ListObjectsV2Output {
            name: Some(input.bucket.clone()),
            prefix: input.prefix.clone(),
            delimiter: input.delimiter.clone(),
            max_keys: Some(opts_max_keys(input)),
            key_count: Some(contents.len() as i32),
            is_truncated: Some(page.next_token.is_some()),
            continuation_token: input.continuation_token.clone(),
            next_continuation_token: page.next_token,
            contents: Some(contents),
            ..Default::default()
        }))
    }

    #[tracing::instrument(level = "debug", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn list_objects(&self, req: S3Request<ListObjectsInput>) -> S3Result<S3Response<ListObjectsOutput>> {
        let v2 = self.list_objects_v2(req.map_input(Into::into)).await?;
        Ok(v2.map_output(|o| ListObjectsOutput {
            name: o.name,
            prefix: o.prefix,
            delimiter: o.delimiter,
            max_keys: o.max_keys,
            contents: o.contents,
            is_truncated: o.is_truncated,
            next_marker: o.next_continuation_token,
            ..Default::default()
        }))
    }

    #[tracing::instrument(level = "info", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn create_multipart_upload(&self, req: S3Request<CreateMultipartUploadInput>) -> S3Result<S3Response<CreateMultipartUploadOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let bucket = ctx.meta.get_bucket(&req.input.bucket).await?.ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchBucket))?;

        let version = Uuid::new_v4().to_string();
        let key = StorageCoreS3::storage_key(&req.input.bucket, &req.input.key, &version);
        let handle = self
            .state
            .blob
            .create_multipart_upload(&key, PutOptions { content_type: req.input.content_type.clone(), cache_control: req.input.cache_control.clone() })
            .await?;

        let now = OffsetDateTime::now_utc();
        let record = UploadRecord {
            id: Uuid::new_v4(),
            bucket_id: bucket.id,
            object_name: req.input.key.clone(),
            version,
            kind: UploadKind::Multipart,
            offset: 0,
            upload_length: None,
            backend_upload_id: Some(handle.backend_upload_id.clone()),
            parts: sqlx::types::Json(Vec::new()),
            content_type: req.input.content_type.clone(),
            cache_control: req.input.cache_control.clone(),
            concat_partial: false,
            created_at: now,
            expires_at: now + time::Duration::hours(24),
        };
        ctx.meta.create_upload_record(&record).await?;

        Ok(S3Response::new(CreateMultipartUploadOutput {
            bucket: Some(req.input.bucket),
            key: Some(req.input.key),
            upload_id: Some(record.id.to_string()),
            ..Default::default()
        }))
    }

    #[tracing::instrument(level = "debug", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn upload_part(&self, req: S3Request<UploadPartInput>) -> S3Result<S3Response<UploadPartOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let record = find_multipart_record(&ctx, &req.input.upload_id).await?;

        let body = into_byte_stream(req.input.body);
        let backend_upload_id = record.backend_upload_id.as_deref().ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchUpload))?;
        let key = StorageCoreS3::storage_key(&req.input.bucket, &record.object_name, &record.version);
        let part = self
            .state
            .blob
            .upload_part(&key, backend_upload_id, req.input.part_number, body, req.input.content_length.map(|n| n as u64))
            .await?;

        Ok(S3Response::new(UploadPartOutput { e_tag: Some(part.etag), ..Default::default() }))
    }

    #[tracing::instrument(level = "info", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn complete_multipart_upload(&self, req: S3Request<CompleteMultipartUploadInput>) -> S3Result<S3Response<CompleteMultipartUploadOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let owner = req.credentials.as_ref().map(|c| c.access_key.as_str()).unwrap_or_default();
        let record = find_multipart_record(&ctx, &req.input.upload_id).await?;
        let backend_upload_id = record.backend_upload_id.clone().ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchUpload))?;

        let key = StorageCoreS3::storage_key(&req.input.bucket, &record.object_name, &record.version);
        let parts: Vec<crate::blob::UploadedPart> = req
            .input
            .multipart_upload
            .map(|mu| mu.parts.unwrap_or_default())
            .unwrap_or_default()
            .into_iter()
            .map(|p| crate::blob::UploadedPart { part_number: p.part_number.unwrap_or_default(), etag: p.e_tag.unwrap_or_default() })
            .collect();

        let blob_meta = self.state.blob.complete_multipart_upload(&key, &backend_upload_id, &parts).await?;

        // The bytes already live at `key` (the exact key `ObjectLifecycleManager` will read back
        // from), so completion only needs the catalog-side version commit, not a re-read/re-upload
        // of the whole object (spec §4.6 `CompleteMultipartUpload`).
        let object = ctx
            .lifecycle
            .finalize_multipart(&req.input.bucket, &record.object_name, owner, &record.version, blob_meta, record.content_type.clone(), record.cache_control.clone(), None, true)
            .await?;

        ctx.meta.delete_upload_record(record.id).await?;

        Ok(S3Response::new(CompleteMultipartUploadOutput {
            bucket: Some(req.input.bucket),
            key: Some(req.input.key),
            e_tag: object.metadata.etag.clone(),
            ..Default::default()
        }))
    }

    #[tracing::instrument(level = "info", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn abort_multipart_upload(&self, req: S3Request<AbortMultipartUploadInput>) -> S3Result<S3Response<AbortMultipartUploadOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let record = find_multipart_record(&ctx, &req.input.upload_id).await?;
        if let Some(backend_upload_id) = &record.backend_upload_id {
            let key = StorageCoreS3::storage_key(&req.input.bucket, &record.object_name, &record.version);
            self.state.blob.abort_multipart_upload(&key, backend_upload_id).await.ok();
        }
        ctx.meta.delete_upload_record(record.id).await?;
        Ok(S3Response::new(AbortMultipartUploadOutput::default()))
    }

    async fn list_object_versions(&self, _req: S3Request<ListObjectVersionsInput>) -> S3Result<S3Response<ListObjectVersionsOutput>> {
        Err(s3_error!(NotImplemented, "object versioning is not implemented"))
    }

    async fn list_multipart_uploads(&self, _req: S3Request<ListMultipartUploadsInput>) -> S3Result<S3Response<ListMultipartUploadsOutput>> {
        Err(s3_error!(NotImplemented, "ListMultipartUploads is not implemented yet"))
    }

    async fn list_parts(&self, _req: S3Request<ListPartsInput>) -> S3Result<S3Response<ListPartsOutput>> {
        Err(s3_error!(NotImplemented, "ListParts is not implemented yet"))
    }

    #[tracing::instrument(level = "debug", skip(self, req), fields(bucket = %req.input.bucket))]
    async fn upload_part_copy(&self, req: S3Request<UploadPartCopyInput>) -> S3Result<S3Response<UploadPartCopyOutput>> {
        let ctx = self.authorize(&req.credentials).await?;
        let record = find_multipart_record(&ctx, &req.input.upload_id).await?;
        let backend_upload_id = record.backend_upload_id.as_deref().ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchUpload))?;

        let (src_bucket, src_name) = parse_copy_source(&req.input.copy_source)?;
        let src_bucket_row = ctx.meta.get_bucket(&src_bucket).await?.ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchBucket))?;
        let src_object = ctx
            .meta
            .get_object(src_bucket_row.id, &src_name, crate::metadata::RowLock::None)
            .await?
            .ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchKey))?;

        let src_key = StorageCoreS3::storage_key(&src_bucket, &src_name, &src_object.version);
        let dst_key = StorageCoreS3::storage_key(&req.input.bucket, &record.object_name, &record.version);
        let range = req.input.copy_source_range.as_deref().and_then(parse_copy_source_range);

        let part = self.state.blob.upload_part_copy(&src_key, &dst_key, backend_upload_id, req.input.part_number, range).await?;

        Ok(S3Response::new(UploadPartCopyOutput {
            copy_part_result: Some(CopyPartResult { e_tag: Some(part.etag), last_modified: Some(to_timestamp(OffsetDateTime::now_utc())), ..Default::default() }),
            ..Default::default()
        }))
    }
}

fn opts_max_keys(input: &ListObjectsV2Input) -> i32 {
    input.max_keys.unwrap_or(1000)
}

async fn find_multipart_record(ctx: &TenantContext, upload_id: &str) -> S3Result<UploadRecord> {
    let id = Uuid::parse_str(upload_id).map_err(|_| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchUpload))?;
    ctx.meta.get_upload_record_by_id(id).await?.ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::NoSuchUpload).into())
}

/// `copy_source` is `/bucket/key` or `bucket/key`, percent-decoded (spec §4.3 "copy").
fn parse_copy_source(copy_source: &str) -> S3Result<(String, String)> {
    let decoded = percent_encoding::percent_decode_str(copy_source)
        .decode_utf8()
        .map_err(|_| s3s::S3Error::new(s3s::S3ErrorCode::InvalidArgument))?;
    let trimmed = decoded.trim_start_matches('/');
    let (bucket, key) = trimmed.split_once('/').ok_or_else(|| s3s::S3Error::new(s3s::S3ErrorCode::InvalidArgument))?;
    Ok((bucket.to_owned(), key.to_owned()))
}

/// `x-amz-copy-source-range: bytes=first-last` (inclusive, per the S3 `UploadPartCopy` API).
/// An unparseable value is treated as "copy the whole object" rather than a hard error.
fn parse_copy_source_range(spec: &str) -> Option<ByteRange> {
    let rest = spec.strip_prefix("bytes=")?;
    let (start, end) = rest.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() { None } else { Some(end.parse().ok()?) };
    Some(ByteRange { start, end })
}
