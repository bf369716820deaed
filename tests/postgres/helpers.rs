//! Shared helpers for `PostgreSQL` integration tests.

use conductor::task::{
    adapters::{
        memory::InMemoryWorkQueue,
        postgres::{PostgresTaskRepository, TaskPgPool},
    },
    services::Dispatcher,
};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use mockable::DefaultClock;
use pg_embedded_setup_unpriv::TestCluster;
use std::sync::Arc;
use tokio::runtime::Runtime;
use uuid::Uuid;

/// SQL creating the task, attempt, chain, and edge tables.
pub const CREATE_TASK_TABLES_SQL: &str =
    include_str!("../../migrations/2026-10-01-000000_create_task_tables/up.sql");

/// Template database name for the pre-migrated schema.
pub const TEMPLATE_DB: &str = "conductor_test_template";

/// Connections per test pool; concurrent tests need more than one.
const POOL_SIZE: u32 = 8;

/// Dispatcher persisting to `PostgreSQL` and feeding an in-memory queue.
pub type PgDispatcher = Dispatcher<PostgresTaskRepository, InMemoryWorkQueue, DefaultClock>;

/// Creates a multi-threaded runtime so spawned claims really race.
pub fn test_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to create test runtime")
}

/// Ensures the template database exists with the schema applied.
///
/// # Errors
///
/// Returns an error if template creation or migration fails.
pub fn ensure_template(cluster: &TestCluster) -> eyre::Result<()> {
    cluster
        .ensure_template_exists(TEMPLATE_DB, |db_name| {
            let url = cluster.connection().database_url(db_name);
            let mut conn = PgConnection::establish(&url).map_err(|e| eyre::eyre!("{e}"))?;
            conn.batch_execute(CREATE_TASK_TABLES_SQL)
                .map_err(|e| eyre::eyre!("{e}"))?;
            Ok(())
        })
        .map_err(|e| eyre::eyre!("template setup failed: {e}"))
}

/// Database cloned from the template for one test and dropped with it.
pub struct TestDatabase {
    cluster: &'static TestCluster,
    name: String,
}

impl TestDatabase {
    /// Creates a fresh database named after `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the template or the database cannot be created.
    pub fn create(cluster: &'static TestCluster, prefix: &str) -> eyre::Result<Self> {
        ensure_template(cluster)?;
        let name = format!("{prefix}_{}", Uuid::new_v4().simple());
        cluster
            .create_database_from_template(name.as_str(), TEMPLATE_DB)
            .map_err(|e| eyre::eyre!("{e}"))?;
        Ok(Self { cluster, name })
    }

    /// Connection URL for this database.
    pub fn url(&self) -> String {
        self.cluster.connection().database_url(&self.name)
    }

    /// Builds a repository over a pool of connections to this database.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be built.
    pub fn repository(&self) -> eyre::Result<Arc<PostgresTaskRepository>> {
        let manager = ConnectionManager::<PgConnection>::new(self.url());
        let pool: TaskPgPool = Pool::builder().max_size(POOL_SIZE).build(manager)?;
        Ok(Arc::new(PostgresTaskRepository::new(pool)))
    }

    /// Opens a direct connection for statements the repository never
    /// issues.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub fn connect(&self) -> eyre::Result<PgConnection> {
        Ok(PgConnection::establish(&self.url())?)
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        if let Err(e) = self.cluster.drop_database(self.name.as_str()) {
            eprintln!("Warning: failed to drop test database {}: {e}", self.name);
        }
    }
}

/// Wires a dispatcher to `repository` and a fresh in-memory queue.
pub fn dispatcher_over(repository: &Arc<PostgresTaskRepository>) -> PgDispatcher {
    Dispatcher::new(
        Arc::clone(repository),
        Arc::new(InMemoryWorkQueue::new()),
        Arc::new(DefaultClock),
    )
}
