//! Knowledge graph domain module
//!
//! Builds a canonical graph of course concepts from noisy extractions and
//! turns questions into ordered explanation paths:
//!
//! - **Concept resolution**: merge per-chunk extractions by title/alias match
//! - **Graph storage**: concepts, typed relations, resources, examples
//! - **Retrieval**: similarity seeds + bounded prerequisite traversal
//! - **Ordering**: prerequisites first, cycles broken deterministically
//! - **Context assembly**: budgeted markdown for the answer generator
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Construction                            │
//! │   ExtractionBatch → ConceptResolver → GraphChangeset → Store    │
//! └─────────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Retrieval                              │
//! │  Query → EmbeddingGateway → seeds → BFS over prereq_of → order  │
//! └─────────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Context Assembly                          │
//! │        ExplanationPath → assemble(budget) → ContextBundle       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syllabus_core::domain::knowledge::{
//!     assemble, ConceptResolver, ContextBudget, RetrievalEngine, RetrievalOptions,
//! };
//!
//! let resolver = ConceptResolver::new(store.clone());
//! let reports = resolver.resolve_all(batches).await;
//!
//! let engine = RetrievalEngine::new(store, gateway);
//! let path = engine
//!     .build_explanation_path("how does backprop work?", &RetrievalOptions::default())
//!     .await?;
//! let bundle = assemble(&path, ContextBudget::Tokens(2000));
//! println!("{}", bundle.text);
//! ```

mod assembler;
mod concept;
mod embedding;
mod extraction;
mod material;
mod ordering;
mod relation;
mod resolver;
mod retrieval;
mod store;

pub use assembler::{
    ContextBlock, ContextBudget, ContextBundle, ContextMetadata, assemble, estimate_tokens,
};
pub use concept::{Concept, Difficulty, normalize_name};
pub use embedding::{ConceptMatch, EmbeddingGateway, cosine_similarity};
pub use extraction::{
    ExtractionBatch, RawConcept, RawExample, RawRelation, parse_extraction_batches,
    read_extraction_file,
};
pub use material::{Example, ExampleType, Resource, ResourceLink};
pub use ordering::{CycleBreak, OrderNode, PrerequisiteOrder, prerequisite_order};
pub use relation::{Relation, RelationKey, RelationType};
pub use resolver::{ConceptResolver, MergeCounts, MergeNote, MergeReport, MergeStatus};
pub use retrieval::{
    ExplanationPath, PathStep, RelatedConcept, RetrievalEngine, RetrievalOptions,
    RetrievalOutcome, RetrievalStats, RetrievalWarning,
};
pub use store::{GraphChangeset, GraphStats, GraphStore};
