//! Graph database storage
//!
//! - `database`: pool setup and handles for the graph store and vector index
//! - `migrations`: versioned schema
//!
//! ```ignore
//! use syllabus_core::storage::{Database, DatabaseConfig};
//!
//! let db = Database::new(DatabaseConfig::from_config(&config)?).await?;
//! let store = db.graph_store();
//! ```

pub mod database;
pub mod migrations;

pub use database::{Database, DatabaseConfig};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
