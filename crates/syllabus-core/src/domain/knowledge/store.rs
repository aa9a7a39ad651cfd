//! Graph store trait for knowledge graph persistence
//!
//! The trait abstracts over storage backends (SQLite, in-memory). Writes go
//! through [`GraphChangeset`], which a backend must commit atomically.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

use super::concept::Concept;
use super::material::{Example, Resource, ResourceLink};
use super::relation::{Relation, RelationType};

/// A set of upserts committed together
///
/// Concepts are written as whole records (keyed by id, replacing names);
/// relations, resource links and examples are inserted if absent; resources
/// are keyed by URL and keep an existing type unless the new one is set.
#[derive(Debug, Clone, Default)]
pub struct GraphChangeset {
    pub concepts: Vec<Concept>,
    pub relations: Vec<Relation>,
    pub resources: Vec<Resource>,
    pub resource_links: Vec<ResourceLink>,
    pub examples: Vec<Example>,
}

impl GraphChangeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the changeset would write nothing
    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
            && self.relations.is_empty()
            && self.resources.is_empty()
            && self.resource_links.is_empty()
            && self.examples.is_empty()
    }

    /// Total number of records in the changeset
    pub fn len(&self) -> usize {
        self.concepts.len()
            + self.relations.len()
            + self.resources.len()
            + self.resource_links.len()
            + self.examples.len()
    }
}

/// Graph store trait
///
/// Provides atomic changeset commits, single-entity upserts, lookups and the
/// traversal primitives the retrieval engine needs.
#[async_trait]
pub trait GraphStore: Send + Sync {
    // ========== Write Operations ==========

    /// Commit every upsert in `changeset` atomically
    async fn apply(&self, changeset: GraphChangeset) -> Result<()>;

    /// Insert or replace a concept
    async fn upsert_concept(&self, concept: &Concept) -> Result<()> {
        self.apply(GraphChangeset {
            concepts: vec![concept.clone()],
            ..Default::default()
        })
        .await
    }

    /// Insert a relation if absent
    async fn upsert_relation(&self, relation: &Relation) -> Result<()> {
        self.apply(GraphChangeset {
            relations: vec![relation.clone()],
            ..Default::default()
        })
        .await
    }

    /// Insert a resource and link it to `concept_ids`
    async fn upsert_resource(&self, resource: &Resource, concept_ids: &[String]) -> Result<()> {
        self.apply(GraphChangeset {
            resources: vec![resource.clone()],
            resource_links: concept_ids
                .iter()
                .map(|id| ResourceLink::new(&resource.id, id))
                .collect(),
            ..Default::default()
        })
        .await
    }

    /// Insert an example if absent
    async fn upsert_example(&self, example: &Example) -> Result<()> {
        self.apply(GraphChangeset {
            examples: vec![example.clone()],
            ..Default::default()
        })
        .await
    }

    /// Remove every node and edge
    async fn clear(&self) -> Result<()>;

    // ========== Concept Operations ==========

    /// Get a concept by ID
    async fn get_concept(&self, id: &str) -> Result<Option<Concept>>;

    /// Find concepts whose title or any alias normalizes to `normalized`
    ///
    /// Ordered by creation time, then id.
    async fn find_concepts_by_name(&self, normalized: &str) -> Result<Vec<Concept>>;

    /// Get the concept whose canonical title matches `title`
    async fn get_concept_by_title(&self, title: &str) -> Result<Option<Concept>>;

    /// List all concepts in insertion order
    async fn list_concepts(&self) -> Result<Vec<Concept>>;

    /// Delete a concept with its relations, examples and resource links
    async fn delete_concept(&self, id: &str) -> Result<bool>;

    // ========== Relation Operations ==========

    /// Get a relation by its identity triple
    async fn get_relation(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
    ) -> Result<Option<Relation>>;

    /// All relations touching a concept, in either direction
    async fn relations_for(&self, concept_id: &str) -> Result<Vec<Relation>>;

    /// IDs of every concept A with `(A, concept_id, prereq_of)`, sorted
    async fn inbound_prereqs(&self, concept_id: &str) -> Result<Vec<String>>;

    // ========== Material Operations ==========

    /// Resources linked to a concept, in insertion order
    async fn resources_for(&self, concept_id: &str) -> Result<Vec<Resource>>;

    /// Get a resource by URL
    async fn get_resource_by_url(&self, url: &str) -> Result<Option<Resource>>;

    /// Examples attached to a concept, in insertion order
    async fn examples_for(&self, concept_id: &str) -> Result<Vec<Example>>;

    /// Get an example by ID
    async fn get_example(&self, id: &str) -> Result<Option<Example>>;

    // ========== Statistics ==========

    /// Get graph statistics
    async fn stats(&self) -> Result<GraphStats>;
}

/// Statistics about the knowledge graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub concepts: u64,
    pub relations: u64,
    /// Relation counts keyed by type name
    pub relations_by_type: BTreeMap<String, u64>,
    pub resources: u64,
    pub examples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changeset_len() {
        let mut changeset = GraphChangeset::new();
        assert!(changeset.is_empty());

        changeset.concepts.push(Concept::new("A"));
        changeset.resource_links.push(ResourceLink::new("r", "c"));
        assert!(!changeset.is_empty());
        assert_eq!(changeset.len(), 2);
    }
}
