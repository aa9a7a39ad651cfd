//! Syllabus Core Library
//!
//! This crate provides the core functionality for Syllabus, including:
//! - Concept resolution (merging noisy extractions into a canonical graph)
//! - Graph storage (SQLite and in-memory backends)
//! - Retrieval (similarity seeds + bounded prerequisite traversal)
//! - Context assembly (budgeted, prerequisite-ordered markdown)
//! - Per-title merge locks
//! - Embedding gateway (HTTP embedder + SQLite vector index)

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod storage;


pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::knowledge::{
        ConceptResolver, ContextBudget, ContextBundle, ExplanationPath, ExtractionBatch,
        GraphStore, MergeReport, RetrievalEngine, RetrievalOptions, assemble,
    };
    pub use crate::error::{Error, Result};
    pub use crate::infrastructure::knowledge::{InMemoryGraphStore, SqliteGraphStore};
}
