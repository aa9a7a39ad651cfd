//! SQLite implementation of the GraphStore
//!
//! Changesets commit inside a single transaction. Listing queries order by
//! the tables' `seq` column so results come back in insertion order.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::domain::knowledge::{
    Concept, Difficulty, Example, ExampleType, GraphChangeset, GraphStats, GraphStore, Relation,
    RelationType, Resource, normalize_name,
};
use crate::error::{Error, Result};

/// SQLite implementation of the graph store
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Create a new SQLite graph store on a migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid timestamp '{}': {}", value, e)))
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    // ========== Write Operations ==========

    async fn apply(&self, changeset: GraphChangeset) -> Result<()> {
        // INSERT OR IGNORE would silently swallow the schema's CHECK.
        if let Some(relation) = changeset.relations.iter().find(|r| r.is_self_loop()) {
            return Err(Error::InvariantViolation(format!(
                "self-loop on concept {}",
                relation.source_id
            )));
        }

        let records = changeset.len();
        let mut tx = self.pool.begin().await?;

        for concept in &changeset.concepts {
            let aliases_json = serde_json::to_string(&concept.aliases)?;

            sqlx::query(
                r#"
                INSERT INTO concepts (
                    id, title, normalized_title, aliases, definition,
                    difficulty, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    normalized_title = excluded.normalized_title,
                    aliases = excluded.aliases,
                    definition = excluded.definition,
                    difficulty = excluded.difficulty,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&concept.id)
            .bind(&concept.title)
            .bind(concept.normalized_title())
            .bind(&aliases_json)
            .bind(&concept.definition)
            .bind(concept.difficulty.map(|d| d.as_str()))
            .bind(timestamp(&concept.created_at))
            .bind(timestamp(&concept.updated_at))
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM concept_names WHERE concept_id = ?")
                .bind(&concept.id)
                .execute(&mut *tx)
                .await?;

            for name in concept.normalized_names() {
                sqlx::query("INSERT OR IGNORE INTO concept_names (name, concept_id) VALUES (?, ?)")
                    .bind(&name)
                    .bind(&concept.id)
                    .execute(&mut *tx)
                    .await?;
            }

            debug!(concept_id = %concept.id, title = %concept.title, "Concept saved");
        }

        for relation in &changeset.relations {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO relations (source_id, target_id, relation_type, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&relation.source_id)
            .bind(&relation.target_id)
            .bind(relation.relation_type.as_str())
            .bind(timestamp(&relation.created_at))
            .execute(&mut *tx)
            .await?;
        }

        for resource in &changeset.resources {
            sqlx::query(
                r#"
                INSERT INTO resources (id, url, resource_type, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(url) DO UPDATE SET
                    resource_type = COALESCE(excluded.resource_type, resources.resource_type)
                "#,
            )
            .bind(&resource.id)
            .bind(&resource.url)
            .bind(&resource.resource_type)
            .bind(timestamp(&resource.created_at))
            .execute(&mut *tx)
            .await?;
        }

        for link in &changeset.resource_links {
            sqlx::query(
                "INSERT OR IGNORE INTO resource_concepts (resource_id, concept_id) VALUES (?, ?)",
            )
            .bind(&link.resource_id)
            .bind(&link.concept_id)
            .execute(&mut *tx)
            .await?;
        }

        for example in &changeset.examples {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO examples (
                    id, concept_id, text, example_type, source_url, created_at
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&example.id)
            .bind(&example.concept_id)
            .bind(&example.text)
            .bind(example.example_type.as_str())
            .bind(&example.source_url)
            .bind(timestamp(&example.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(records, "Changeset committed");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "concept_embeddings",
            "resource_concepts",
            "examples",
            "relations",
            "concept_names",
            "resources",
            "concepts",
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!("Graph cleared");
        Ok(())
    }

    // ========== Concept Operations ==========

    async fn get_concept(&self, id: &str) -> Result<Option<Concept>> {
        let row: Option<ConceptRow> = sqlx::query_as("SELECT * FROM concepts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_concept()).transpose()
    }

    async fn find_concepts_by_name(&self, normalized: &str) -> Result<Vec<Concept>> {
        let rows: Vec<ConceptRow> = sqlx::query_as(
            r#"
            SELECT c.* FROM concepts c
            JOIN concept_names n ON n.concept_id = c.id
            WHERE n.name = ?
            ORDER BY c.created_at, c.id
            "#,
        )
        .bind(normalized)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_concept()).collect()
    }

    async fn get_concept_by_title(&self, title: &str) -> Result<Option<Concept>> {
        let row: Option<ConceptRow> = sqlx::query_as(
            "SELECT * FROM concepts WHERE normalized_title = ? ORDER BY seq LIMIT 1",
        )
        .bind(normalize_name(title))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_concept()).transpose()
    }

    async fn list_concepts(&self) -> Result<Vec<Concept>> {
        let rows: Vec<ConceptRow> = sqlx::query_as("SELECT * FROM concepts ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_concept()).collect()
    }

    async fn delete_concept(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM concepts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(concept_id = %id, "Concept deleted");
        }
        Ok(deleted)
    }

    // ========== Relation Operations ==========

    async fn get_relation(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
    ) -> Result<Option<Relation>> {
        let row: Option<RelationRow> = sqlx::query_as(
            r#"
            SELECT source_id, target_id, relation_type, created_at FROM relations
            WHERE source_id = ? AND target_id = ? AND relation_type = ?
            "#,
        )
        .bind(source_id)
        .bind(target_id)
        .bind(relation_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_relation()).transpose()
    }

    async fn relations_for(&self, concept_id: &str) -> Result<Vec<Relation>> {
        let rows: Vec<RelationRow> = sqlx::query_as(
            r#"
            SELECT source_id, target_id, relation_type, created_at FROM relations
            WHERE source_id = ? OR target_id = ?
            ORDER BY seq
            "#,
        )
        .bind(concept_id)
        .bind(concept_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_relation()).collect()
    }

    async fn inbound_prereqs(&self, concept_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT source_id FROM relations
            WHERE target_id = ? AND relation_type = ?
            ORDER BY source_id
            "#,
        )
        .bind(concept_id)
        .bind(RelationType::PrereqOf.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // ========== Material Operations ==========

    async fn resources_for(&self, concept_id: &str) -> Result<Vec<Resource>> {
        let rows: Vec<ResourceRow> = sqlx::query_as(
            r#"
            SELECT r.id, r.url, r.resource_type, r.created_at FROM resources r
            JOIN resource_concepts rc ON rc.resource_id = r.id
            WHERE rc.concept_id = ?
            ORDER BY rc.seq
            "#,
        )
        .bind(concept_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_resource()).collect()
    }

    async fn get_resource_by_url(&self, url: &str) -> Result<Option<Resource>> {
        let row: Option<ResourceRow> = sqlx::query_as(
            "SELECT id, url, resource_type, created_at FROM resources WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_resource()).transpose()
    }

    async fn examples_for(&self, concept_id: &str) -> Result<Vec<Example>> {
        let rows: Vec<ExampleRow> = sqlx::query_as(
            r#"
            SELECT id, concept_id, text, example_type, source_url, created_at FROM examples
            WHERE concept_id = ?
            ORDER BY seq
            "#,
        )
        .bind(concept_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_example()).collect()
    }

    async fn get_example(&self, id: &str) -> Result<Option<Example>> {
        let row: Option<ExampleRow> = sqlx::query_as(
            "SELECT id, concept_id, text, example_type, source_url, created_at FROM examples WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_example()).transpose()
    }

    // ========== Statistics ==========

    async fn stats(&self) -> Result<GraphStats> {
        let (concepts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM concepts")
            .fetch_one(&self.pool)
            .await?;
        let (resources,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM resources")
            .fetch_one(&self.pool)
            .await?;
        let (examples,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM examples")
            .fetch_one(&self.pool)
            .await?;

        let by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT relation_type, COUNT(*) FROM relations GROUP BY relation_type",
        )
        .fetch_all(&self.pool)
        .await?;

        let relations_by_type: BTreeMap<String, u64> = by_type
            .into_iter()
            .map(|(t, c)| (t, c as u64))
            .collect();

        Ok(GraphStats {
            concepts: concepts as u64,
            relations: relations_by_type.values().sum(),
            relations_by_type,
            resources: resources as u64,
            examples: examples as u64,
        })
    }
}

// ========== Row Types ==========

#[derive(Debug, FromRow)]
struct ConceptRow {
    id: String,
    title: String,
    aliases: String,
    definition: String,
    difficulty: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ConceptRow {
    fn into_concept(self) -> Result<Concept> {
        let aliases: BTreeSet<String> = serde_json::from_str(&self.aliases)?;
        let difficulty = match self.difficulty.as_deref() {
            Some(d) => Some(
                Difficulty::parse(d)
                    .ok_or_else(|| Error::Other(format!("Invalid difficulty: {}", d)))?,
            ),
            None => None,
        };

        Ok(Concept {
            id: self.id,
            title: self.title,
            aliases,
            definition: self.definition,
            difficulty,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct RelationRow {
    source_id: String,
    target_id: String,
    relation_type: String,
    created_at: String,
}

impl RelationRow {
    fn into_relation(self) -> Result<Relation> {
        let relation_type = RelationType::parse(&self.relation_type).ok_or_else(|| {
            Error::Other(format!("Invalid relation type: {}", self.relation_type))
        })?;

        Ok(Relation {
            source_id: self.source_id,
            target_id: self.target_id,
            relation_type,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ResourceRow {
    id: String,
    url: String,
    resource_type: Option<String>,
    created_at: String,
}

impl ResourceRow {
    fn into_resource(self) -> Result<Resource> {
        Ok(Resource {
            id: self.id,
            url: self.url,
            resource_type: self.resource_type,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ExampleRow {
    id: String,
    concept_id: String,
    text: String,
    example_type: Option<String>,
    source_url: Option<String>,
    created_at: String,
}

impl ExampleRow {
    fn into_example(self) -> Result<Example> {
        let example_type = self
            .example_type
            .as_deref()
            .and_then(ExampleType::parse)
            .ok_or_else(|| {
                Error::Other(format!("Invalid example type on example {}", self.id))
            })?;

        Ok(Example {
            id: self.id,
            concept_id: self.concept_id,
            text: self.text,
            example_type,
            source_url: self.source_url,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}
