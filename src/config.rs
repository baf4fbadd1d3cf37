use config::{Config, Environment, File};
use serde::Deserialize;

/// Top-level settings tree. Loaded from an optional config file plus `STORAGE_` prefixed
/// environment variables, the way the teacher's `Settings::new` layers `config::Environment`
/// over a `File` source. Missing required values fail loudly at startup (spec §6 "Exit codes").
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Connection info for the catalog that owns the tenant registry itself (distinct from each
    /// tenant's own database — see `TenantConfig`).
    pub control_db: DatabaseConfig,
    pub storage_backend: StorageBackendConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub tus: TusConfig,
    #[serde(default)]
    pub sigv4: SigV4Config,
    #[serde(default)]
    pub shard: ShardConfig,
    /// Base64 or raw passphrase used to derive the AES-CBC key for tenant secrets (CryptoJS
    /// compatible `OpenSSL`-style key derivation). Maps to `AUTH_ENCRYPTION_KEY`.
    pub auth_encryption_key: String,
    /// Admin API keys accepted in the `apikey` header.
    #[serde(default)]
    pub admin_api_keys: Vec<String>,
    #[serde(default)]
    pub cluster_discovery: Option<ClusterDiscovery>,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub db_name: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.db_name
        )
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_statement_timeout_ms() -> u64 {
    30_000
}

/// `STORAGE_BACKEND_TYPE in {file, s3}` (spec §6).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageBackendConfig {
    File(FsBackendConfig),
    S3(S3BackendConfig),
}

#[derive(Debug, Deserialize)]
pub struct FsBackendConfig {
    pub root_dir: String,
    /// `/` or `-$v-` (spec §4.1 "Version-key derivation").
    #[serde(default = "default_version_separator")]
    pub version_separator: String,
    #[serde(default)]
    pub derive_etag_from_mtime: bool,
}

fn default_version_separator() -> String {
    "/".to_owned()
}

#[derive(Debug, Deserialize)]
pub struct S3BackendConfig {
    pub host: String,
    pub port: u16,
    pub access_key: String,
    pub secret_key: String,
    pub insecure: bool,
    pub bucket: Option<String>,
    #[serde(default = "default_max_sockets")]
    pub max_sockets: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_max_sockets() -> usize {
    256
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub variant: LockVariant,
    #[serde(default = "default_lock_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_lock_retry_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_lock_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_lock_renew_ms")]
    pub renew_interval_ms: u64,
    #[serde(default = "default_lock_key_prefix")]
    pub key_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            variant: LockVariant::default(),
            acquire_timeout_ms: default_lock_timeout_ms(),
            retry_interval_ms: default_lock_retry_ms(),
            ttl_ms: default_lock_ttl_ms(),
            renew_interval_ms: default_lock_renew_ms(),
            key_prefix: default_lock_key_prefix(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}
fn default_lock_retry_ms() -> u64 {
    500
}
fn default_lock_ttl_ms() -> u64 {
    30_000
}
fn default_lock_renew_ms() -> u64 {
    10_000
}
fn default_lock_key_prefix() -> String {
    "tus-locks/".to_owned()
}

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockVariant {
    #[default]
    DatabaseAdvisory,
    ObjectStore,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TusConfig {
    #[serde(default = "default_upload_ttl_secs")]
    pub upload_ttl_secs: i64,
    #[serde(default = "default_abort_delay_ms")]
    pub delayed_abort_ms: u64,
    /// PATCH bytes are buffered and flushed to the backend C1 multipart upload once they reach
    /// this size (spec §4.5 "PATCH append is O(n) on the filesystem backend; use multipart for
    /// multi-GB uploads"); the final, possibly-smaller chunk is flushed at `finalize` regardless,
    /// matching S3's "every part but the last must meet the minimum part size" rule.
    #[serde(default = "default_part_size_bytes")]
    pub part_size_bytes: u64,
}

impl Default for TusConfig {
    fn default() -> Self {
        Self {
            upload_ttl_secs: default_upload_ttl_secs(),
            delayed_abort_ms: default_abort_delay_ms(),
            part_size_bytes: default_part_size_bytes(),
        }
    }
}

fn default_upload_ttl_secs() -> i64 {
    24 * 3600
}
fn default_abort_delay_ms() -> u64 {
    200
}
fn default_part_size_bytes() -> u64 {
    8 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct SigV4Config {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_max_header_line")]
    pub max_header_line: usize,
}

impl Default for SigV4Config {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            max_header_line: default_max_header_line(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    8 * 1024 * 1024
}
fn default_max_header_line() -> usize {
    128
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShardConfig {
    /// No universally documented default exists in the original source (spec §9 open question);
    /// an unset value is a loud startup error rather than a silent guess.
    pub default_capacity: Option<i64>,
    #[serde(default = "default_lease_ms")]
    pub default_lease_ms: i64,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            default_capacity: None,
            default_lease_ms: default_lease_ms(),
        }
    }
}

fn default_lease_ms() -> i64 {
    60_000
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClusterDiscovery {
    Ecs,
    Eks,
}

impl Settings {
    pub fn new(config_path: &str) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let s = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(Environment::with_prefix("STORAGE").separator("__"))
            .build()?;

        Ok(s.try_deserialize()?)
    }
}
