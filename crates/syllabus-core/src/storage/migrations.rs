//! Versioned schema for the graph database
//!
//! Applied on open by [`Database`](super::Database) unless auto-migration is off.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Concept graph
///
/// `seq` columns preserve insertion order for every listing query.
const MIGRATION_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS concepts (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        normalized_title TEXT NOT NULL,
        aliases TEXT NOT NULL DEFAULT '[]',
        definition TEXT NOT NULL DEFAULT '',
        difficulty TEXT CHECK (difficulty IS NULL OR difficulty IN ('beginner', 'intermediate', 'advanced')),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_concepts_normalized_title ON concepts(normalized_title);

    -- Every normalized title and alias, for name lookup
    CREATE TABLE IF NOT EXISTS concept_names (
        name TEXT NOT NULL,
        concept_id TEXT NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
        PRIMARY KEY (name, concept_id)
    );

    CREATE INDEX IF NOT EXISTS idx_concept_names_concept ON concept_names(concept_id);

    CREATE TABLE IF NOT EXISTS relations (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id TEXT NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
        target_id TEXT NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
        relation_type TEXT NOT NULL CHECK (relation_type IN ('prereq_of', 'is_a', 'part_of', 'contrasts_with', 'sibling')),
        created_at TEXT NOT NULL,
        UNIQUE (source_id, target_id, relation_type),
        CHECK (source_id <> target_id)
    );

    CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(source_id);
    CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target_id, relation_type);

    CREATE TABLE IF NOT EXISTS resources (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        url TEXT NOT NULL UNIQUE,
        resource_type TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS resource_concepts (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        resource_id TEXT NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
        concept_id TEXT NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
        UNIQUE (resource_id, concept_id)
    );

    CREATE INDEX IF NOT EXISTS idx_resource_concepts_concept ON resource_concepts(concept_id);

    CREATE TABLE IF NOT EXISTS examples (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        concept_id TEXT NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
        text TEXT NOT NULL,
        example_type TEXT,
        source_url TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_examples_concept ON examples(concept_id);
"#;

/// Migration 2: Concept embeddings for the vector index
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS concept_embeddings (
        concept_id TEXT PRIMARY KEY NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
        model TEXT NOT NULL,
        dimensions INTEGER NOT NULL,
        embedding BLOB NOT NULL,
        content_hash TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_concept_embeddings_model ON concept_embeddings(model);
"#;

/// Schema steps in application order: (version, description, sql)
const MIGRATIONS: &[(i32, &str, &str)] = &[
    (1, "concept graph", MIGRATION_V1),
    (2, "concept embeddings", MIGRATION_V2),
];

/// Schema version of a graph database
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Highest applied version, 0 for a fresh database
    pub current_version: i32,
    pub target_version: i32,
    pub needs_migration: bool,
}

async fn applied_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;
    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

/// Apply every pending step, each in its own transaction
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let applied = applied_version(pool).await?;
    let pending: Vec<_> = MIGRATIONS.iter().filter(|(v, _, _)| *v > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Graph schema is current");
        return Ok(());
    }

    tracing::info!(
        from = applied,
        to = CURRENT_VERSION,
        steps = pending.len(),
        "Migrating graph schema"
    );

    for &&(version, description, sql) in &pending {
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(version, description, "Applied schema migration");
    }
    Ok(())
}

pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = applied_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}
