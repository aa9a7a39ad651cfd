//! In-memory graph store
//!
//! Backs tests and ephemeral runs. Readers share a tokio `RwLock`; each
//! changeset is staged on a copy of the graph and swapped in only when every
//! record in it is valid.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

use crate::domain::knowledge::{
    Concept, Example, GraphChangeset, GraphStats, GraphStore, Relation, RelationKey,
    RelationType, Resource, ResourceLink, normalize_name,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
struct GraphState {
    /// Concept ids in insertion order
    order: Vec<String>,
    concepts: HashMap<String, Concept>,
    relations: Vec<Relation>,
    relation_keys: HashSet<RelationKey>,
    resources: Vec<Resource>,
    links: Vec<ResourceLink>,
    examples: Vec<Example>,
}

impl GraphState {
    fn commit(&mut self, changeset: GraphChangeset) -> Result<()> {
        for concept in changeset.concepts {
            if !self.concepts.contains_key(&concept.id) {
                self.order.push(concept.id.clone());
            }
            self.concepts.insert(concept.id.clone(), concept);
        }

        for relation in changeset.relations {
            if relation.is_self_loop() {
                return Err(Error::InvariantViolation(format!(
                    "self-loop on concept {}",
                    relation.source_id
                )));
            }
            for endpoint in [&relation.source_id, &relation.target_id] {
                if !self.concepts.contains_key(endpoint) {
                    return Err(Error::InvariantViolation(format!(
                        "relation endpoint {} does not exist",
                        endpoint
                    )));
                }
            }
            if self.relation_keys.insert(relation.key()) {
                self.relations.push(relation);
            }
        }

        for resource in changeset.resources {
            match self.resources.iter_mut().find(|r| r.url == resource.url) {
                Some(existing) => {
                    if resource.resource_type.is_some() {
                        existing.resource_type = resource.resource_type;
                    }
                }
                None => self.resources.push(resource),
            }
        }

        for link in changeset.resource_links {
            if !self.resources.iter().any(|r| r.id == link.resource_id) {
                return Err(Error::InvariantViolation(format!(
                    "resource {} does not exist",
                    link.resource_id
                )));
            }
            self.require_concept(&link.concept_id)?;
            if !self.links.contains(&link) {
                self.links.push(link);
            }
        }

        for example in changeset.examples {
            self.require_concept(&example.concept_id)?;
            if !self.examples.iter().any(|e| e.id == example.id) {
                self.examples.push(example);
            }
        }

        Ok(())
    }

    fn require_concept(&self, id: &str) -> Result<()> {
        if self.concepts.contains_key(id) {
            Ok(())
        } else {
            Err(Error::InvariantViolation(format!("concept {} does not exist", id)))
        }
    }

    fn ordered_concepts(&self) -> impl Iterator<Item = &Concept> {
        self.order.iter().filter_map(|id| self.concepts.get(id))
    }
}

/// Graph store held entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn apply(&self, changeset: GraphChangeset) -> Result<()> {
        let mut state = self.state.write().await;
        let mut staged = state.clone();
        staged.commit(changeset)?;
        *state = staged;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.state.write().await = GraphState::default();
        Ok(())
    }

    async fn get_concept(&self, id: &str) -> Result<Option<Concept>> {
        Ok(self.state.read().await.concepts.get(id).cloned())
    }

    async fn find_concepts_by_name(&self, normalized: &str) -> Result<Vec<Concept>> {
        let state = self.state.read().await;
        let mut found: Vec<Concept> = state
            .ordered_concepts()
            .filter(|c| c.matches_normalized(normalized))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn get_concept_by_title(&self, title: &str) -> Result<Option<Concept>> {
        let normalized = normalize_name(title);
        let state = self.state.read().await;
        Ok(state
            .ordered_concepts()
            .find(|c| c.normalized_title() == normalized)
            .cloned())
    }

    async fn list_concepts(&self) -> Result<Vec<Concept>> {
        Ok(self.state.read().await.ordered_concepts().cloned().collect())
    }

    async fn delete_concept(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.concepts.remove(id).is_none() {
            return Ok(false);
        }
        state.order.retain(|c| c != id);
        state.relations.retain(|r| r.source_id != id && r.target_id != id);
        state.relation_keys = state.relations.iter().map(Relation::key).collect();
        state.examples.retain(|e| e.concept_id != id);
        state.links.retain(|l| l.concept_id != id);
        Ok(true)
    }

    async fn get_relation(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
    ) -> Result<Option<Relation>> {
        let state = self.state.read().await;
        Ok(state
            .relations
            .iter()
            .find(|r| {
                r.source_id == source_id && r.target_id == target_id && r.relation_type == relation_type
            })
            .cloned())
    }

    async fn relations_for(&self, concept_id: &str) -> Result<Vec<Relation>> {
        let state = self.state.read().await;
        Ok(state
            .relations
            .iter()
            .filter(|r| r.source_id == concept_id || r.target_id == concept_id)
            .cloned()
            .collect())
    }

    async fn inbound_prereqs(&self, concept_id: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut ids: Vec<String> = state
            .relations
            .iter()
            .filter(|r| r.target_id == concept_id && r.relation_type == RelationType::PrereqOf)
            .map(|r| r.source_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn resources_for(&self, concept_id: &str) -> Result<Vec<Resource>> {
        let state = self.state.read().await;
        Ok(state
            .links
            .iter()
            .filter(|l| l.concept_id == concept_id)
            .filter_map(|l| state.resources.iter().find(|r| r.id == l.resource_id))
            .cloned()
            .collect())
    }

    async fn get_resource_by_url(&self, url: &str) -> Result<Option<Resource>> {
        let state = self.state.read().await;
        Ok(state.resources.iter().find(|r| r.url == url).cloned())
    }

    async fn examples_for(&self, concept_id: &str) -> Result<Vec<Example>> {
        let state = self.state.read().await;
        Ok(state
            .examples
            .iter()
            .filter(|e| e.concept_id == concept_id)
            .cloned()
            .collect())
    }

    async fn get_example(&self, id: &str) -> Result<Option<Example>> {
        let state = self.state.read().await;
        Ok(state.examples.iter().find(|e| e.id == id).cloned())
    }

    async fn stats(&self) -> Result<GraphStats> {
        let state = self.state.read().await;
        let mut relations_by_type = BTreeMap::new();
        for relation in &state.relations {
            *relations_by_type
                .entry(relation.relation_type.as_str().to_string())
                .or_insert(0u64) += 1;
        }

        Ok(GraphStats {
            concepts: state.concepts.len() as u64,
            relations: state.relations.len() as u64,
            relations_by_type,
            resources: state.resources.len() as u64,
            examples: state.examples.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::ExampleType;

    async fn seeded() -> InMemoryGraphStore {
        let store = InMemoryGraphStore::new();
        let mut changeset = GraphChangeset::new();
        changeset.concepts.push(Concept::new("Calculus").with_id("calc"));
        changeset
            .concepts
            .push(Concept::new("Gradient Descent").with_id("gd").with_aliases(["GD"]));
        changeset
            .relations
            .push(Relation::new("calc", "gd", RelationType::PrereqOf));
        store.apply(changeset).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_find_by_alias() {
        let store = seeded().await;

        let found = store.find_concepts_by_name("gd").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "gd");
        assert!(store.find_concepts_by_name("sgd").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_prereqs() {
        let store = seeded().await;

        assert_eq!(store.inbound_prereqs("gd").await.unwrap(), vec!["calc"]);
        assert!(store.inbound_prereqs("calc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_changeset_leaves_graph_untouched() {
        let store = seeded().await;

        let mut changeset = GraphChangeset::new();
        changeset.concepts.push(Concept::new("Linear Algebra").with_id("la"));
        changeset
            .relations
            .push(Relation::new("la", "missing", RelationType::PrereqOf));

        let err = store.apply(changeset).await.unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert!(store.get_concept("la").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_self_loop_rejected() {
        let store = seeded().await;
        let result = store
            .upsert_relation(&Relation::new("gd", "gd", RelationType::IsA))
            .await;
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn test_duplicate_relation_ignored() {
        let store = seeded().await;
        store
            .upsert_relation(&Relation::new("calc", "gd", RelationType::PrereqOf))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.relations, 1);
        assert_eq!(stats.relations_by_type.get("prereq_of"), Some(&1));
    }

    #[tokio::test]
    async fn test_resource_keeps_existing_type() {
        let store = seeded().await;
        let typed = Resource::new("https://example.com/gd").with_type("video");
        store.upsert_resource(&typed, &["gd".to_string()]).await.unwrap();
        store
            .upsert_resource(&Resource::new("https://example.com/gd"), &["calc".to_string()])
            .await
            .unwrap();

        let resource = store
            .get_resource_by_url("https://example.com/gd")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resource.resource_type.as_deref(), Some("video"));
        assert_eq!(store.resources_for("calc").await.unwrap().len(), 1);
        assert_eq!(store.stats().await.unwrap().resources, 1);
    }

    #[tokio::test]
    async fn test_delete_concept_cascades() {
        let store = seeded().await;
        store
            .upsert_example(&Example::new("gd", "step downhill", ExampleType::Walkthrough))
            .await
            .unwrap();

        assert!(store.delete_concept("gd").await.unwrap());
        assert!(!store.delete_concept("gd").await.unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.concepts, 1);
        assert_eq!(stats.relations, 0);
        assert_eq!(stats.examples, 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = seeded().await;
        store.clear().await.unwrap();
        assert!(store.list_concepts().await.unwrap().is_empty());
    }
}
