//! Background job queue: a `SELECT ... FOR UPDATE SKIP LOCKED` dequeue over a Postgres table,
//! the same pattern as the shard-slot claim in `metadata::postgres` (`shard_claim_free_slot`),
//! reused here for fleet-wide maintenance jobs (spec §4.9's migration runs, the orphan-scan
//! admin trigger, and object-admin bulk deletes).

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::{try_, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    RunMigrationsOnTenants { tenant_ids: Vec<String> },
    ObjectAdminDeleteAllBefore { bucket: String, before: time::OffsetDateTime },
    MoveJobs { src_bucket: String, dst_bucket: String },
    UpgradePgBossV10,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub kind: Json<JobKind>,
    pub attempts: i32,
    pub created_at: time::OffsetDateTime,
}

pub struct JobQueue {
    pool: PgPool,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").finish()
    }
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn enqueue(&self, kind: &JobKind) -> Result<Uuid> {
        let row = try_!(
            sqlx::query("INSERT INTO jobs (id, kind, attempts, created_at) VALUES (gen_random_uuid(), $1, 0, now()) RETURNING id")
                .bind(Json(kind))
                .fetch_one(&self.pool)
                .await
        );
        Ok(try_!(sqlx::Row::try_get(&row, "id")))
    }

    /// Claims one queued job, skipping rows already locked by another worker (spec §4.9:
    /// multiple fleet-runner instances may run concurrently; at-least-once delivery).
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn dequeue(&self) -> Result<Option<Job>> {
        let job = try_!(
            sqlx::query_as::<_, Job>(
                r#"UPDATE jobs SET attempts = attempts + 1
                   WHERE id = (SELECT id FROM jobs ORDER BY created_at ASC FOR UPDATE SKIP LOCKED LIMIT 1)
                   RETURNING id, kind, attempts, created_at"#
            )
            .fetch_optional(&self.pool)
            .await
        );
        Ok(job)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn complete(&self, id: Uuid) -> Result<()> {
        try_!(sqlx::query("DELETE FROM jobs WHERE id = $1").bind(id).execute(&self.pool).await);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_kind_round_trips_through_json() {
        let kind = JobKind::RunMigrationsOnTenants { tenant_ids: vec!["t1".into(), "t2".into()] };
        let encoded = serde_json::to_string(&kind).unwrap();
        assert!(encoded.contains("\"type\":\"run_migrations_on_tenants\""));
        let decoded: JobKind = serde_json::from_str(&encoded).unwrap();
        match decoded {
            JobKind::RunMigrationsOnTenants { tenant_ids } => assert_eq!(tenant_ids, vec!["t1", "t2"]),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unit_variant_round_trips_through_json() {
        let encoded = serde_json::to_string(&JobKind::UpgradePgBossV10).unwrap();
        let decoded: JobKind = serde_json::from_str(&encoded).unwrap();
        assert!(matches!(decoded, JobKind::UpgradePgBossV10));
    }
}
