//! Tenant registry and per-tenant connection pool cache (spec §3 "Tenant").
//!
//! Modeled on the teacher's single `PgPool` (`pg_database.rs`), generalized: the control-plane
//! catalog (this module) owns one row per tenant holding an *encrypted* connection string; the
//! process lazily opens and caches one [`sqlx::PgPool`] per tenant the first time it is needed.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgPool as ControlPool;
use tokio::sync::RwLock;

use crate::error::{try_, Result, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    Pending,
    Completed,
    Failed,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: String,
    /// Encrypted with `AUTH_ENCRYPTION_KEY`; decrypt via [`crate::crypto::decrypt_str`].
    pub encrypted_db_url: String,
    pub encrypted_pool_url: Option<String>,
    pub max_connections: u32,
    pub encrypted_jwt_secret: String,
    pub jwks_url: Option<String>,
    pub feature_flags: serde_json::Value,
    pub migrations_version: Option<String>,
    pub migrations_status: MigrationStatus,
}

/// Tenant registry CRUD (spec §4.2 "Tenant registry CRUD (super-user only)").
#[derive(Debug)]
pub struct TenantRegistry {
    control_db: ControlPool,
}

impl TenantRegistry {
    pub fn new(control_db: ControlPool) -> Self {
        Self { control_db }
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn create(&self, id: &str, encrypted_db_url: &str, encrypted_jwt_secret: &str, max_connections: u32) -> Result<Tenant> {
        let row = try_!(
            sqlx::query_as::<_, TenantRow>(
                r#"INSERT INTO tenants (id, encrypted_db_url, encrypted_jwt_secret, max_connections, migrations_status)
                   VALUES ($1, $2, $3, $4, 'pending')
                   RETURNING id, encrypted_db_url, encrypted_pool_url, max_connections, encrypted_jwt_secret,
                             jwks_url, feature_flags, migrations_version, migrations_status"#
            )
            .bind(id)
            .bind(encrypted_db_url)
            .bind(encrypted_jwt_secret)
            .bind(max_connections as i32)
            .fetch_one(&self.control_db)
            .await
        );
        Ok(row.into())
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn get(&self, id: &str) -> Result<Tenant> {
        let row = try_!(
            sqlx::query_as::<_, TenantRow>(
                r#"SELECT id, encrypted_db_url, encrypted_pool_url, max_connections, encrypted_jwt_secret,
                          jwks_url, feature_flags, migrations_version, migrations_status
                   FROM tenants WHERE id = $1"#
            )
            .bind(id)
            .fetch_optional(&self.control_db)
            .await
        );
        row.map(Into::into).ok_or(StorageError::TenantNotFound)
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn list(&self) -> Result<Vec<Tenant>> {
        let rows = try_!(
            sqlx::query_as::<_, TenantRow>(
                r#"SELECT id, encrypted_db_url, encrypted_pool_url, max_connections, encrypted_jwt_secret,
                          jwks_url, feature_flags, migrations_version, migrations_status
                   FROM tenants ORDER BY id ASC"#
            )
            .fetch_all(&self.control_db)
            .await
        );
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        try_!(sqlx::query("DELETE FROM tenants WHERE id = $1").bind(id).execute(&self.control_db).await);
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn set_migration_status(&self, id: &str, version: Option<&str>, status: MigrationStatus) -> Result<()> {
        try_!(
            sqlx::query("UPDATE tenants SET migrations_version = $2, migrations_status = $3 WHERE id = $1")
                .bind(id)
                .bind(version)
                .bind(status.as_str())
                .execute(&self.control_db)
                .await
        );
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    encrypted_db_url: String,
    encrypted_pool_url: Option<String>,
    max_connections: i32,
    encrypted_jwt_secret: String,
    jwks_url: Option<String>,
    feature_flags: serde_json::Value,
    migrations_version: Option<String>,
    migrations_status: String,
}

impl From<TenantRow> for Tenant {
    fn from(r: TenantRow) -> Self {
        Tenant {
            id: r.id,
            encrypted_db_url: r.encrypted_db_url,
            encrypted_pool_url: r.encrypted_pool_url,
            max_connections: r.max_connections as u32,
            encrypted_jwt_secret: r.encrypted_jwt_secret,
            jwks_url: r.jwks_url,
            feature_flags: r.feature_flags,
            migrations_version: r.migrations_version,
            migrations_status: MigrationStatus::from_str(&r.migrations_status),
        }
    }
}

/// Lazily-opened, cached pool-per-tenant (spec §3 "the process holds tenants' connection pools";
/// spec §5 "Per-tenant connection pools are sized by tenant config").
#[derive(Debug, Default)]
pub struct TenantPools {
    pools: RwLock<HashMap<String, PgPool>>,
}

impl TenantPools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn get_or_open(&self, tenant: &Tenant, auth_encryption_key: &str) -> Result<PgPool> {
        if let Some(pool) = self.pools.read().await.get(&tenant.id) {
            return Ok(pool.clone());
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(&tenant.id) {
            return Ok(pool.clone());
        }

        let url = crate::crypto::decrypt_str(auth_encryption_key, &tenant.encrypted_db_url)?;
        let pool = try_!(PgPoolOptions::new().max_connections(tenant.max_connections).connect(&url).await);
        pools.insert(tenant.id.clone(), pool.clone());
        Ok(pool)
    }

    pub async fn evict(&self, tenant_id: &str) {
        if let Some(pool) = self.pools.write().await.remove(tenant_id) {
            pool.close().await;
        }
    }
}
