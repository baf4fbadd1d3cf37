//! Migration fleet runner (C9): runs the catalog schema migrations against every tenant
//! database, tracking per-tenant progress/failure in the control-plane registry. No teacher
//! precedent (the teacher has a single database and no migration tooling at all), grounded on
//! `sqlx::migrate::Migrator` — the same crate family the teacher already depends on for Postgres
//! access. A runtime-loaded `Migrator` (rather than the compile-time `sqlx::migrate!` macro) is
//! used deliberately: migration SQL files are themselves schema/DDL, which spec §2's Non-goals
//! place out of scope for this crate, so the directory is a deployment concern, not a build one.

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use crate::error::{try_, Result};
use crate::tenant::{MigrationStatus, Tenant, TenantRegistry};

pub struct MigrationFleetRunner {
    registry: Arc<TenantRegistry>,
    auth_encryption_key: String,
    migrations_dir: PathBuf,
}

impl std::fmt::Debug for MigrationFleetRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationFleetRunner").finish()
    }
}

#[derive(Debug, Clone)]
pub struct FleetRunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<(String, String)>,
}

impl MigrationFleetRunner {
    pub fn new(registry: Arc<TenantRegistry>, auth_encryption_key: String, migrations_dir: PathBuf) -> Self {
        Self { registry, auth_encryption_key, migrations_dir }
    }

    /// Runs migrations against every tenant the registry knows about (spec §4.9 "fleet run");
    /// one tenant's failure doesn't abort the rest, mirroring how the orphan scanner tolerates
    /// per-key failures in a bulk delete.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run_fleet(&self) -> Result<FleetRunSummary> {
        let tenants = self.registry.list().await?;
        let mut succeeded = 0;
        let mut failed = Vec::new();

        for tenant in tenants {
            match self.run_one(&tenant).await {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    failed.push((tenant.id.clone(), e.to_string()));
                    let _ = self.registry.set_migration_status(&tenant.id, tenant.migrations_version.as_deref(), MigrationStatus::Failed).await;
                }
            }
        }

        Ok(FleetRunSummary { total: succeeded + failed.len(), succeeded, failed })
    }

    #[tracing::instrument(level = "info", skip(self, tenant), fields(tenant_id = %tenant.id))]
    pub async fn run_one(&self, tenant: &Tenant) -> Result<()> {
        let url = crate::crypto::decrypt_str(&self.auth_encryption_key, &tenant.encrypted_db_url)?;
        let pool = try_!(PgPoolOptions::new().max_connections(1).connect(&url).await);

        let migrator = try_!(Migrator::new(self.migrations_dir.clone()).await);
        try_!(migrator.run(&pool).await);

        let version = migrator.migrations.last().map(|m| m.version.to_string());
        self.registry.set_migration_status(&tenant.id, version.as_deref(), MigrationStatus::Completed).await?;
        pool.close().await;
        Ok(())
    }
}
