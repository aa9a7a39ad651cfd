//! Embedding gateway backed by an HTTP embedder and a SQLite vector index

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::domain::knowledge::{ConceptMatch, EmbeddingGateway, GraphStore};
use crate::error::Result;

use super::http::HttpEmbedder;
use super::index::SqliteVectorIndex;

/// Concepts embedded per request while indexing
const INDEX_BATCH_SIZE: usize = 64;

/// Outcome of an indexing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    /// Concepts embedded in this pass
    pub indexed: usize,
    /// Concepts whose stored vector was already current
    pub unchanged: usize,
}

/// [`EmbeddingGateway`] over an [`HttpEmbedder`] and a [`SqliteVectorIndex`]
#[derive(Debug, Clone)]
pub struct IndexedEmbeddingGateway {
    embedder: HttpEmbedder,
    index: SqliteVectorIndex,
}

impl IndexedEmbeddingGateway {
    pub fn new(embedder: HttpEmbedder, index: SqliteVectorIndex) -> Self {
        Self { embedder, index }
    }

    pub fn index(&self) -> &SqliteVectorIndex {
        &self.index
    }

    /// Embed every concept whose text changed since it was last indexed
    pub async fn index_concepts<S>(&self, store: &S) -> Result<IndexReport>
    where
        S: GraphStore + ?Sized,
    {
        let concepts = store.list_concepts().await?;
        let mut report = IndexReport::default();
        let mut stale = Vec::new();

        for concept in concepts {
            let text = concept.embedding_text();
            let hash = content_hash(&text);
            if self.index.content_hash(&concept.id).await?.as_deref() == Some(hash.as_str()) {
                report.unchanged += 1;
            } else {
                stale.push((concept.id, text, hash));
            }
        }

        for batch in stale.chunks(INDEX_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(_, text, _)| text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;

            for ((concept_id, _, hash), vector) in batch.iter().zip(vectors) {
                self.index.upsert(concept_id, &vector, hash).await?;
            }
            report.indexed += batch.len();
            debug!(batch = batch.len(), "Indexed concept batch");
        }

        info!(
            indexed = report.indexed,
            unchanged = report.unchanged,
            model = %self.embedder.model(),
            "Concept index updated"
        );
        Ok(report)
    }
}

fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[async_trait]
impl EmbeddingGateway for IndexedEmbeddingGateway {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text).await
    }

    async fn nearest_concepts(&self, vector: &[f32], k: usize) -> Result<Vec<ConceptMatch>> {
        self.index.nearest(vector, k).await
    }
}
