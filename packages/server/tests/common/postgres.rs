//! Shared Postgres container for store tests.
//!
//! The container starts once per test binary. Every test gets its own freshly
//! migrated database on it, so purges and counts never see another test's
//! rows.

use anyhow::{Context, Result};
use generation_core::kernel::jobs::PostgresJobStore;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct SharedPostgres {
    /// Server URL without a database name.
    server_url: String,
    // Keep the container alive for the whole test run
    _container: ContainerAsync<Postgres>,
}

static SHARED_POSTGRES: OnceCell<Option<SharedPostgres>> = OnceCell::const_new();

impl SharedPostgres {
    async fn init() -> Result<Self> {
        super::init_tracing();

        let container = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;

        Ok(Self {
            server_url: format!("postgresql://postgres:postgres@{host}:{port}"),
            _container: container,
        })
    }

    /// `None` when no container runtime is reachable.
    async fn get() -> Option<&'static Self> {
        SHARED_POSTGRES
            .get_or_init(|| async {
                match Self::init().await {
                    Ok(shared) => Some(shared),
                    Err(e) => {
                        eprintln!("Postgres store tests skipped: {e:#}");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    async fn fresh_database(&self) -> Result<PgPool> {
        let name = format!("jobs_{}", Uuid::new_v4().simple());

        let admin = PgPool::connect(&format!("{}/postgres", self.server_url))
            .await
            .context("Failed to connect to Postgres")?;
        sqlx::query(&format!("CREATE DATABASE {name}"))
            .execute(&admin)
            .await
            .context("Failed to create test database")?;
        admin.close().await;

        let pool = PgPool::connect(&format!("{}/{name}", self.server_url))
            .await
            .context("Failed to connect to test database")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(pool)
    }
}

/// A `PostgresJobStore` on an empty, migrated database.
///
/// Returns `None` (and the calling test should return early) when Docker is
/// not available on this machine.
pub async fn postgres_store() -> Option<PostgresJobStore> {
    let shared = SharedPostgres::get().await?;
    let pool = shared
        .fresh_database()
        .await
        .expect("Failed to prepare test database");
    Some(PostgresJobStore::new(pool))
}
