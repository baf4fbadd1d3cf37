use std::panic::Location;

use tracing::error;

/// Logs the original cause of a foreign error with its call site, the way every `try_!`
/// conversion in this crate does before normalizing to the closed error set (spec §7).
#[inline]
#[track_caller]
pub(crate) fn log(source: &dyn std::error::Error) {
    let location = Location::caller();
    let span_trace = tracing_error::SpanTrace::capture();

    error!(
        target: "storage_core",
        %location,
        error = %source,
        "span trace:\n{span_trace}"
    );
}

/// Converts a `Result<T, E>` into `Result<T, StorageError>`, logging the original cause.
macro_rules! try_ {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(err) => {
                crate::error::log(&err);
                return Err(crate::error::StorageError::from(err));
            }
        }
    };
}
pub(crate) use try_;

/// The closed set of error kinds from spec §7. Every surface (REST, TUS, S3-wire) renders
/// through this type so the three protocols report consistent codes for the same fault.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no such bucket")]
    NoSuchBucket,
    #[error("no such key")]
    NoSuchKey,
    #[error("no such upload")]
    NoSuchUpload,
    #[error("bucket already exists")]
    BucketAlreadyExists,
    #[error("key already exists")]
    KeyAlreadyExists,
    #[error("resource already exists")]
    ResourceAlreadyExists,
    #[error("invalid bucket name")]
    InvalidBucketName,
    #[error("invalid key")]
    InvalidKey,
    #[error("invalid mime type")]
    InvalidMimeType,
    #[error("invalid range")]
    InvalidRange,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    #[error("missing content length")]
    MissingContentLength,
    #[error("invalid jwt")]
    InvalidJwt,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("expired token")]
    ExpiredToken,
    #[error("signature does not match")]
    SignatureDoesNotMatch,
    #[error("access denied")]
    AccessDenied,
    #[error("tenant not found")]
    TenantNotFound,
    #[error("entity too large")]
    EntityTooLarge,
    #[error("resource locked")]
    ResourceLocked,
    #[error("lock acquisition timed out")]
    LockTimeout,
    #[error("database statement timed out")]
    DatabaseTimeout,
    #[error("database error: {0}")]
    DatabaseError(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("s3 backend error: {0}")]
    S3Error(String),
    #[error("slow down")]
    SlowDown,
    #[error("invalid checksum")]
    InvalidChecksum,
    #[error("missing part")]
    MissingPart,
    #[error("invalid upload id")]
    InvalidUploadId,
    #[error("invalid upload signature")]
    InvalidUploadSignature,
    #[error("request aborted by the client")]
    Aborted,
    #[error("request aborted by the server")]
    AbortedTerminate,
    #[error("no active shard for this resource kind")]
    NoActiveShardError,
    #[error("shard has no remaining capacity")]
    NoCapacityError,
}

impl StorageError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchBucket => "NoSuchBucket",
            Self::NoSuchKey => "NoSuchKey",
            Self::NoSuchUpload => "NoSuchUpload",
            Self::BucketAlreadyExists => "BucketAlreadyExists",
            Self::KeyAlreadyExists => "KeyAlreadyExists",
            Self::ResourceAlreadyExists => "ResourceAlreadyExists",
            Self::InvalidBucketName => "InvalidBucketName",
            Self::InvalidKey => "InvalidKey",
            Self::InvalidMimeType => "InvalidMimeType",
            Self::InvalidRange => "InvalidRange",
            Self::InvalidParameter(_) => "InvalidParameter",
            Self::MissingParameter(_) => "MissingParameter",
            Self::MissingContentLength => "MissingContentLength",
            Self::InvalidJwt => "InvalidJWT",
            Self::InvalidSignature => "InvalidSignature",
            Self::ExpiredToken => "ExpiredToken",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::AccessDenied => "AccessDenied",
            Self::TenantNotFound => "TenantNotFound",
            Self::EntityTooLarge => "EntityTooLarge",
            Self::ResourceLocked => "ResourceLocked",
            Self::LockTimeout => "LockTimeout",
            Self::DatabaseTimeout => "DatabaseTimeout",
            Self::DatabaseError(_) => "DatabaseError",
            Self::InternalError(_) => "InternalError",
            Self::S3Error(_) => "S3Error",
            Self::SlowDown => "SlowDown",
            Self::InvalidChecksum => "InvalidChecksum",
            Self::MissingPart => "MissingPart",
            Self::InvalidUploadId => "InvalidUploadId",
            Self::InvalidUploadSignature => "InvalidUploadSignature",
            Self::Aborted => "Aborted",
            Self::AbortedTerminate => "AbortedTerminate",
            Self::NoActiveShardError => "NoActiveShardError",
            Self::NoCapacityError => "NoCapacityError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NoSuchBucket | Self::NoSuchKey | Self::NoSuchUpload => 404,
            Self::BucketAlreadyExists | Self::KeyAlreadyExists | Self::ResourceAlreadyExists => 409,
            Self::InvalidBucketName
            | Self::InvalidKey
            | Self::InvalidMimeType
            | Self::InvalidRange
            | Self::InvalidParameter(_)
            | Self::MissingParameter(_)
            | Self::MissingContentLength
            | Self::InvalidJwt
            | Self::InvalidChecksum
            | Self::MissingPart
            | Self::InvalidUploadId
            | Self::InvalidUploadSignature => 400,
            Self::InvalidSignature | Self::ExpiredToken | Self::SignatureDoesNotMatch => 403,
            Self::AccessDenied => 403,
            Self::TenantNotFound => 400,
            Self::EntityTooLarge => 413,
            Self::ResourceLocked => 423,
            Self::LockTimeout => 503,
            Self::DatabaseTimeout => 544,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::S3Error(_) => 500,
            Self::SlowDown => 429,
            Self::Aborted => 499,
            Self::AbortedTerminate => 500,
            Self::NoActiveShardError => 503,
            Self::NoCapacityError => 507,
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NoSuchKey,
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::ResourceAlreadyExists,
            sqlx::Error::PoolTimedOut => Self::DatabaseTimeout,
            _ => Self::DatabaseError(err.to_string()),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NoSuchKey,
            std::io::ErrorKind::AlreadyExists => Self::ResourceAlreadyExists,
            _ => Self::InternalError(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<s3s::S3Error> for StorageError {
    fn from(err: s3s::S3Error) -> Self {
        // S3 exceptions retain the upstream HTTP status when >=400 and <500 (spec §7).
        match err.status_code() {
            Some(status) if (400..500).contains(&status.as_u16()) => Self::S3Error(err.to_string()),
            _ => Self::S3Error(err.to_string()),
        }
    }
}

impl From<StorageError> for s3s::S3Error {
    fn from(err: StorageError) -> Self {
        use s3s::S3ErrorCode as Code;
        let code = match &err {
            StorageError::NoSuchBucket => Code::NoSuchBucket,
            StorageError::NoSuchKey => Code::NoSuchKey,
            StorageError::NoSuchUpload => Code::NoSuchUpload,
            StorageError::BucketAlreadyExists => Code::BucketAlreadyExists,
            StorageError::AccessDenied => Code::AccessDenied,
            StorageError::EntityTooLarge => Code::EntityTooLarge,
            StorageError::SlowDown => Code::SlowDown,
            StorageError::InvalidSignature | StorageError::SignatureDoesNotMatch => Code::SignatureDoesNotMatch,
            StorageError::ExpiredToken => Code::ExpiredToken,
            // No confirmed `s3s::S3ErrorCode` variant for shard placement faults (S3-wire
            // requests never hit the shard allocator); falls through to the catch-all below.
            _ => Code::InternalError,
        };
        s3s::S3Error::with_message(code, err.to_string())
    }
}

/// Renders `{statusCode, code, error, message}` (spec §7) for the REST and admin surfaces.
#[derive(serde::Serialize)]
pub struct ErrorBody {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub code: String,
    pub error: String,
    pub message: String,
}

impl From<&StorageError> for ErrorBody {
    fn from(err: &StorageError) -> Self {
        Self {
            status_code: err.http_status(),
            code: err.code().to_owned(),
            error: err.code().to_owned(),
            message: err.to_string(),
        }
    }
}

impl axum::response::IntoResponse for StorageError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        let body = ErrorBody::from(&self);
        let status = axum::http::StatusCode::from_u16(self.http_status()).unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
