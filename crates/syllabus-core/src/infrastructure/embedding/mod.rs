//! Embedding gateway implementations
//!
//! - `http`: OpenAI-compatible `/embeddings` client
//! - `index`: concept vectors in SQLite with exact cosine search
//! - `gateway`: the two combined behind [`EmbeddingGateway`](crate::domain::knowledge::EmbeddingGateway)

mod gateway;
mod http;
mod index;

pub use gateway::{IndexReport, IndexedEmbeddingGateway};
pub use http::HttpEmbedder;
pub use index::SqliteVectorIndex;
