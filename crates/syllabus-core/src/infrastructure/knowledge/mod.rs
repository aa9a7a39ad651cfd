//! Knowledge graph infrastructure implementations
//!
//! Concrete [`GraphStore`](crate::domain::knowledge::GraphStore) backends:
//! SQLite for persistent graphs and an in-memory store for tests and
//! ephemeral runs.

mod memory;
mod sqlite;

pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;
