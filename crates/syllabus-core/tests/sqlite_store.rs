//! SQLite end-to-end: ingest an extraction file, reopen the database and
//! query the persisted graph.

mod common;

use std::sync::Arc;

use common::StaticGateway;
use syllabus_core::domain::knowledge::{
    ConceptMatch, ConceptResolver, GraphStore, RelationType, RetrievalEngine, RetrievalOptions,
    read_extraction_file,
};
use syllabus_core::infrastructure::knowledge::SqliteGraphStore;
use syllabus_core::storage::{CURRENT_VERSION, Database, DatabaseConfig};

const EXTRACTIONS: &str = r#"
{"chunk_id": "lec1-0", "source_url": "https://course.example/lec1", "resource_type": "webpage", "concepts": [{"title": "Probability", "definition": "A measure of likelihood", "difficulty": "beginner"}, {"title": "Bayes' Theorem", "aliases": ["Bayes rule"], "difficulty": "intermediate"}], "relations": [{"source": "Probability", "target": "Bayes rule", "relation_type": "prereq_of"}], "examples": []}
{"chunk_id": "lec1-1", "error": "model returned invalid JSON"}

{"chunk_id": "lec2-0", "concepts": [{"title": "bayes rule", "definition": "P(A|B) = P(B|A)P(A)/P(B)"}], "relations": [], "examples": [{"text": "Medical test false positives", "concept": "Bayes' Theorem", "example_type": "case_study"}]}
"#;

#[tokio::test]
async fn test_graph_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("graph.db");
    let file = dir.path().join("extractions.jsonl");
    tokio::fs::write(&file, EXTRACTIONS).await.unwrap();

    {
        let db = Database::new(DatabaseConfig::with_path(&db_path)).await.unwrap();
        let store = Arc::new(SqliteGraphStore::new(db.pool().clone()));
        let resolver = ConceptResolver::new(store);

        let batches = read_extraction_file(&file).await.unwrap();
        assert_eq!(batches.len(), 3);

        let reports = resolver.resolve_all(batches).await;
        let merged = reports.iter().filter(|r| r.is_merged()).count();
        assert_eq!(merged, 2);
        db.close().await;
    }

    let db = Database::new(DatabaseConfig::with_path(&db_path)).await.unwrap();
    assert_eq!(db.migration_status().await.unwrap().current_version, CURRENT_VERSION);
    let store = Arc::new(SqliteGraphStore::new(db.pool().clone()));

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.concepts, 2);
    assert_eq!(stats.relations, 1);
    assert_eq!(stats.resources, 1);
    assert_eq!(stats.examples, 1);

    let bayes = store.get_concept_by_title("Bayes' Theorem").await.unwrap().unwrap();
    assert_eq!(bayes.definition, "P(A|B) = P(B|A)P(A)/P(B)");
    assert!(bayes.aliases.contains("Bayes rule"));
    assert!(bayes.aliases.contains("bayes rule"));

    let probability = store.get_concept_by_title("probability").await.unwrap().unwrap();
    assert!(
        store
            .get_relation(&probability.id, &bayes.id, RelationType::PrereqOf)
            .await
            .unwrap()
            .is_some()
    );

    let resources = store.resources_for(&bayes.id).await.unwrap();
    assert_eq!(resources[0].resource_type.as_deref(), Some("webpage"));

    let engine = RetrievalEngine::new(
        store,
        Arc::new(StaticGateway::new(vec![ConceptMatch::new(bayes.id.clone(), 0.7)])),
    );
    let path = engine
        .build_explanation_path("explain bayes", &RetrievalOptions::default())
        .await
        .unwrap();
    assert_eq!(path.titles(), vec!["Probability", "Bayes' Theorem"]);
    assert_eq!(path.steps[1].examples.len(), 1);
    assert_eq!(path.steps[1].related.len(), 1);
}
