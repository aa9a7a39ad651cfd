//! Shared test doubles for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use syllabus_core::domain::knowledge::{
    Concept, ConceptMatch, EmbeddingGateway, Example, ExtractionBatch, GraphChangeset,
    GraphStats, GraphStore, RawConcept, Relation, RelationType, Resource,
};
use syllabus_core::infrastructure::knowledge::InMemoryGraphStore;
use syllabus_core::{Error, Result};

/// Gateway returning the same matches for every query
pub struct StaticGateway {
    matches: Vec<ConceptMatch>,
    delay: Duration,
}

impl StaticGateway {
    pub fn new(matches: Vec<ConceptMatch>) -> Self {
        Self {
            matches,
            delay: Duration::ZERO,
        }
    }

    /// Seed every id with the same score
    pub fn seeds(ids: &[&str]) -> Self {
        Self::new(ids.iter().map(|id| ConceptMatch::new(*id, 0.9)).collect())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl EmbeddingGateway for StaticGateway {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(vec![1.0, 0.0, 0.0])
    }

    async fn nearest_concepts(&self, _vector: &[f32], k: usize) -> Result<Vec<ConceptMatch>> {
        Ok(self.matches.iter().take(k).cloned().collect())
    }
}

/// In-memory store that can slow down reads, fail writes and count traversal calls
#[derive(Default)]
pub struct InstrumentedStore {
    inner: InMemoryGraphStore,
    read_delay: Duration,
    fail_apply: AtomicBool,
    inbound_calls: AtomicUsize,
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `inbound_prereqs` call
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn set_fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    pub fn inbound_calls(&self) -> usize {
        self.inbound_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphStore for InstrumentedStore {
    async fn apply(&self, changeset: GraphChangeset) -> Result<()> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("injected failure".to_string()));
        }
        self.inner.apply(changeset).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    async fn get_concept(&self, id: &str) -> Result<Option<Concept>> {
        self.inner.get_concept(id).await
    }

    async fn find_concepts_by_name(&self, normalized: &str) -> Result<Vec<Concept>> {
        self.inner.find_concepts_by_name(normalized).await
    }

    async fn get_concept_by_title(&self, title: &str) -> Result<Option<Concept>> {
        self.inner.get_concept_by_title(title).await
    }

    async fn list_concepts(&self) -> Result<Vec<Concept>> {
        self.inner.list_concepts().await
    }

    async fn delete_concept(&self, id: &str) -> Result<bool> {
        self.inner.delete_concept(id).await
    }

    async fn get_relation(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
    ) -> Result<Option<Relation>> {
        self.inner.get_relation(source_id, target_id, relation_type).await
    }

    async fn relations_for(&self, concept_id: &str) -> Result<Vec<Relation>> {
        self.inner.relations_for(concept_id).await
    }

    async fn inbound_prereqs(&self, concept_id: &str) -> Result<Vec<String>> {
        self.inbound_calls.fetch_add(1, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.inner.inbound_prereqs(concept_id).await
    }

    async fn resources_for(&self, concept_id: &str) -> Result<Vec<Resource>> {
        self.inner.resources_for(concept_id).await
    }

    async fn get_resource_by_url(&self, url: &str) -> Result<Option<Resource>> {
        self.inner.get_resource_by_url(url).await
    }

    async fn examples_for(&self, concept_id: &str) -> Result<Vec<Example>> {
        self.inner.examples_for(concept_id).await
    }

    async fn get_example(&self, id: &str) -> Result<Option<Example>> {
        self.inner.get_example(id).await
    }

    async fn stats(&self) -> Result<GraphStats> {
        self.inner.stats().await
    }
}

/// Write concepts with ids `id-<lowercase title>` and the given prereq edges
pub async fn seed_graph<S: GraphStore + ?Sized>(
    store: &Arc<S>,
    titles: &[&str],
    prereqs: &[(&str, &str)],
) {
    let mut changeset = GraphChangeset::new();
    for title in titles {
        changeset.concepts.push(Concept::new(*title).with_id(id_of(title)));
    }
    for (from, to) in prereqs {
        changeset
            .relations
            .push(Relation::new(id_of(from), id_of(to), RelationType::PrereqOf));
    }
    store.apply(changeset).await.expect("seed graph");
}

pub fn id_of(title: &str) -> String {
    format!("id-{}", title.to_lowercase())
}

/// A batch mentioning one concept
pub fn concept_batch(chunk_id: &str, concept: RawConcept) -> ExtractionBatch {
    ExtractionBatch::new(chunk_id).with_concept(concept)
}
