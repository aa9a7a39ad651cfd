//! Concept vectors stored in SQLite with exact cosine search

use chrono::{SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::domain::knowledge::{ConceptMatch, cosine_similarity};
use crate::error::{Error, Result};

/// Vector index over the `concept_embeddings` table
///
/// Vectors are scoped by model: a search only compares against vectors
/// produced by the same model.
#[derive(Debug, Clone)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
    model: String,
}

#[derive(Debug, FromRow)]
struct EmbeddingRow {
    concept_id: String,
    embedding: Vec<u8>,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, model: impl Into<String>) -> Self {
        Self {
            pool,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Store the vector for a concept, replacing any previous one
    pub async fn upsert(&self, concept_id: &str, vector: &[f32], content_hash: &str) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::EmbeddingFailed(format!(
                "Empty vector for concept {}",
                concept_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO concept_embeddings (
                concept_id, model, dimensions, embedding, content_hash, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(concept_id) DO UPDATE SET
                model = excluded.model,
                dimensions = excluded.dimensions,
                embedding = excluded.embedding,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(concept_id)
        .bind(&self.model)
        .bind(vector.len() as i64)
        .bind(encode_vector(vector))
        .bind(content_hash)
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true))
        .execute(&self.pool)
        .await?;

        debug!(concept_id = %concept_id, dimensions = vector.len(), "Concept vector saved");
        Ok(())
    }

    /// Content hash recorded for a concept under this index's model
    pub async fn content_hash(&self, concept_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT content_hash FROM concept_embeddings WHERE concept_id = ? AND model = ?",
        )
        .bind(concept_id)
        .bind(&self.model)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(hash,)| hash))
    }

    /// Number of vectors stored for this model
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM concept_embeddings WHERE model = ?")
                .bind(&self.model)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    /// The `k` stored vectors most similar to `query`
    ///
    /// Ordered by score descending, then concept id. Vectors whose dimension
    /// differs from the query are skipped.
    pub async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<ConceptMatch>> {
        if k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<EmbeddingRow> = sqlx::query_as(
            "SELECT concept_id, embedding FROM concept_embeddings WHERE model = ? AND dimensions = ?",
        )
        .bind(&self.model)
        .bind(query.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut matches: Vec<ConceptMatch> = rows
            .into_iter()
            .filter_map(|row| {
                let vector = decode_vector(&row.embedding)?;
                Some(ConceptMatch::new(row.concept_id, cosine_similarity(query, &vector)))
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.concept_id.cmp(&b.concept_id))
        });
        matches.truncate(k);
        Ok(matches)
    }
}

/// Little-endian f32 blob
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::{Concept, GraphStore};
    use crate::infrastructure::knowledge::SqliteGraphStore;
    use crate::storage::migrations::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup(ids: &[&str]) -> SqliteVectorIndex {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");

        let store = SqliteGraphStore::new(pool.clone());
        for id in ids {
            store
                .upsert_concept(&Concept::new(*id).with_id(*id))
                .await
                .unwrap();
        }

        SqliteVectorIndex::new(pool, "test-model")
    }

    #[test]
    fn test_vector_encoding() {
        let vector = vec![1.5, -0.25, 0.0];
        assert_eq!(decode_vector(&encode_vector(&vector)), Some(vector));
        assert_eq!(decode_vector(&[0, 1, 2]), None);
    }

    #[tokio::test]
    async fn test_nearest_orders_by_similarity() {
        let index = setup(&["x", "y", "xy"]).await;
        index.upsert("x", &[1.0, 0.0], "h1").await.unwrap();
        index.upsert("y", &[0.0, 1.0], "h2").await.unwrap();
        index.upsert("xy", &[1.0, 1.0], "h3").await.unwrap();

        let matches = index.nearest(&[1.0, 0.1], 2).await.unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.concept_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "xy"]);
        assert!(matches[0].score > matches[1].score);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_tracks_hash() {
        let index = setup(&["x"]).await;
        index.upsert("x", &[1.0, 0.0], "old").await.unwrap();
        index.upsert("x", &[0.0, 1.0], "new").await.unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(index.content_hash("x").await.unwrap().as_deref(), Some("new"));

        let matches = index.nearest(&[0.0, 1.0], 1).await.unwrap();
        assert!((matches[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_other_models_and_dimensions_ignored() {
        let index = setup(&["x", "y"]).await;
        index.upsert("x", &[1.0, 0.0, 0.0], "h").await.unwrap();
        let other = SqliteVectorIndex::new(index.pool.clone(), "other-model");
        other.upsert("y", &[1.0, 0.0], "h").await.unwrap();

        assert!(index.nearest(&[1.0, 0.0], 5).await.unwrap().is_empty());
        assert_eq!(other.nearest(&[1.0, 0.0], 5).await.unwrap().len(), 1);
        assert!(index.content_hash("y").await.unwrap().is_none());
    }
}
