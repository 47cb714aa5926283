//! Embedded PostgreSQL helpers for the Diesel adapter suites.
//!
//! Each test gets its own temporary database on the shared embedded cluster,
//! migrated with the crate's embedded Diesel migrations. Set
//! `SKIP_TEST_CLUSTER=1` to skip these suites where the cluster cannot start.

use accounts::outbound::persistence::{DbPool, PoolConfig, run_migrations};
use diesel_async::RunQueryDsl;
use pg_embedded_setup_unpriv::TemporaryDatabase;
use pg_embedded_setup_unpriv::test_support::shared_cluster_handle;
use tokio::runtime::Runtime;

/// Returns true when `SKIP_TEST_CLUSTER` is "1", "true" or "yes"
/// (case-insensitive).
pub fn should_skip_test_cluster() -> bool {
    std::env::var("SKIP_TEST_CLUSTER")
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Skip with a marker when skipping is enabled; otherwise fail loudly so CI
/// breakage is not masked.
pub fn handle_cluster_setup_failure<T>(reason: impl std::fmt::Display) -> Option<T> {
    if should_skip_test_cluster() {
        eprintln!("SKIP-TEST-CLUSTER: {reason}");
        None
    } else {
        panic!("Test cluster setup failed: {reason}. Set SKIP_TEST_CLUSTER=1 to skip.");
    }
}

/// A migrated temporary database with a pool and the runtime that owns it.
pub struct TestDatabase {
    /// Runtime reused for every async call in one test.
    pub runtime: Runtime,
    pub pool: DbPool,
    _database: TemporaryDatabase,
}

impl TestDatabase {
    pub fn provision() -> Result<Self, String> {
        let cluster = shared_cluster_handle().map_err(|err| format!("shared cluster: {err:?}"))?;
        let database = cluster
            .create_temporary_database()
            .map_err(|err| format!("create database: {err:?}"))?;
        let url = database.url().to_string();
        run_migrations(&url).map_err(|err| err.to_string())?;

        let runtime = Runtime::new().map_err(|err| err.to_string())?;
        let config = PoolConfig::new(&url).with_max_size(4).with_min_idle(Some(1));
        let pool = runtime
            .block_on(DbPool::new(config))
            .map_err(|err| err.to_string())?;

        Ok(Self {
            runtime,
            pool,
            _database: database,
        })
    }

    /// Run raw SQL outside any adapter, for arranging failure conditions.
    pub async fn execute(&self, sql: &str) {
        let mut conn = self.pool.get().await.expect("connection");
        diesel::sql_query(sql)
            .execute(&mut conn)
            .await
            .unwrap_or_else(|err| panic!("`{sql}` failed: {err}"));
    }
}

/// Fresh database, or `None` when the cluster is unavailable and skipping is
/// enabled.
pub fn test_database() -> Option<TestDatabase> {
    match TestDatabase::provision() {
        Ok(database) => Some(database),
        Err(reason) => handle_cluster_setup_failure(reason),
    }
}
