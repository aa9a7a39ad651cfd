//! SQLite connection pool for the graph database
//!
//! One file holds the graph tables and the concept embeddings. File databases
//! run in WAL mode so retrieval reads proceed while a batch commits.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::config::Config;
use crate::infrastructure::embedding::SqliteVectorIndex;
use crate::infrastructure::knowledge::SqliteGraphStore;
use crate::storage::migrations;

const POOL_SIZE: u32 = 5;

/// Where and how to open the graph database
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file, or `None` for a private in-memory database
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    /// Bring the schema up to date on open
    pub auto_migrate: bool,
}

impl DatabaseConfig {
    /// Open the file at `path`, creating it and its directory when missing
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            max_connections: POOL_SIZE,
            auto_migrate: true,
        }
    }

    /// A throwaway database that lives as long as the pool
    pub fn in_memory() -> Self {
        Self {
            path: None,
            // each connection to :memory: is its own database
            max_connections: 1,
            auto_migrate: true,
        }
    }

    /// The database named by `database.path`, or `syllabus.db` in the config directory
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::with_path(config.database_path()?))
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = match &self.path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            None => SqliteConnectOptions::from_str("sqlite::memory:")?
                .journal_mode(SqliteJournalMode::Memory),
        };

        // per connection, so every pooled connection cascades deletes
        Ok(options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true))
    }
}

/// Pooled handle on the graph database
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if let Some(dir) = config.path.as_deref().and_then(Path::parent) {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create graph database directory {}", dir.display())
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Failed to open graph database {}", describe(&config)))?;
        debug!(database = %describe(&config), "Opened graph database");

        let db = Self { pool, config };
        if db.config.auto_migrate {
            db.migrate().await?;
        }
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// File backing the database, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.config.path.as_deref()
    }

    /// Graph store sharing this pool
    pub fn graph_store(&self) -> SqliteGraphStore {
        SqliteGraphStore::new(self.pool.clone())
    }

    /// Vector index for `model` sharing this pool
    pub fn vector_index(&self, model: impl Into<String>) -> SqliteVectorIndex {
        SqliteVectorIndex::new(self.pool.clone(), model)
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to migrate graph schema")
    }

    pub async fn migration_status(&self) -> Result<migrations::MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to read graph schema version")
    }

    /// Round-trip a trivial query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Graph database is not responding")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn describe(config: &DatabaseConfig) -> String {
    match &config.path {
        Some(path) => path.display().to_string(),
        None => "(in memory)".to_string(),
    }
}
