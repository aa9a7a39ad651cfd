//! Concept resolver
//!
//! Merges raw per-chunk extractions into canonical concepts, relations,
//! examples and resources. Each batch is planned in memory while holding the
//! title locks for every name it touches, then committed through a single
//! atomic [`GraphStore::apply`] call.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::locking::{TitleLockGuard, TitleLockManager};
use crate::error::Result;

use super::concept::{Concept, Difficulty, normalize_name};
use super::extraction::ExtractionBatch;
use super::material::{Example, ExampleType, Resource, ResourceLink};
use super::relation::{Relation, RelationKey, RelationType};
use super::store::{GraphChangeset, GraphStore};

/// Final status of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeStatus {
    /// The changeset was committed (possibly empty)
    Merged,
    /// The extractor marked the batch as malformed; nothing was written
    Rejected { reason: String },
    /// The store or lock layer failed; nothing was written
    Failed { error: String },
}

/// Counters for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeCounts {
    pub concepts_created: usize,
    pub concepts_merged: usize,
    pub relations_created: usize,
    pub relations_existing: usize,
    pub self_loops_dropped: usize,
    pub examples_attached: usize,
    pub examples_existing: usize,
    pub resources_linked: usize,
}

/// Something the resolver skipped or decided on the caller's behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeNote {
    /// Several concepts answer to `name`; `chosen` won the tie-break
    AmbiguousMatch {
        name: String,
        candidates: Vec<String>,
        chosen: String,
    },
    /// A relation endpoint did not resolve to any concept
    UnresolvedRelation { source: String, target: String },
    /// An example's concept did not resolve
    UnresolvedExample { concept: String },
    /// Both endpoints resolved to the same concept
    SelfLoop { source: String, target: String },
    UnknownRelationType { relation_type: String },
    UnknownExampleType { example_type: String },
    /// `alias` already belongs to `owner`, so it was not added to `concept`
    AliasConflict {
        alias: String,
        concept: String,
        owner: String,
    },
}

/// Outcome of resolving one extraction batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub batch_id: String,
    pub status: MergeStatus,
    pub counts: MergeCounts,
    pub notes: Vec<MergeNote>,
}

impl MergeReport {
    fn new(batch_id: impl Into<String>, status: MergeStatus) -> Self {
        Self {
            batch_id: batch_id.into(),
            status,
            counts: MergeCounts::default(),
            notes: Vec::new(),
        }
    }

    /// Report for a batch that failed before commit
    pub fn failed(batch_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(batch_id, MergeStatus::Failed { error: error.into() })
    }

    pub fn is_merged(&self) -> bool {
        matches!(self.status, MergeStatus::Merged)
    }
}

/// Store candidates for each locked name
type Lookup = HashMap<String, Vec<Concept>>;

/// In-memory plan for one batch
struct MergePlan<'a> {
    lookup: &'a Lookup,
    /// Concepts touched by this batch, keyed by id, plus insertion order
    working: HashMap<String, Concept>,
    order: Vec<String>,
    /// Pre-batch snapshot of existing concepts in `working`
    original: HashMap<String, Concept>,
    created: HashSet<String>,
    /// Normalized name -> concept id decided while planning
    owners: HashMap<String, String>,
    /// Names already reported as ambiguous
    ambiguous_noted: HashSet<String>,
    relations: HashSet<RelationKey>,
    example_ids: HashSet<String>,
    changeset: GraphChangeset,
    report: MergeReport,
}

impl<'a> MergePlan<'a> {
    fn new(lookup: &'a Lookup, batch_id: &str) -> Self {
        Self {
            lookup,
            working: HashMap::new(),
            order: Vec::new(),
            original: HashMap::new(),
            created: HashSet::new(),
            owners: HashMap::new(),
            ambiguous_noted: HashSet::new(),
            relations: HashSet::new(),
            example_ids: HashSet::new(),
            changeset: GraphChangeset::new(),
            report: MergeReport::new(batch_id, MergeStatus::Merged),
        }
    }

    fn title_of(&self, id: &str) -> String {
        self.working
            .get(id)
            .map(|c| c.title.clone())
            .or_else(|| {
                self.lookup
                    .values()
                    .flatten()
                    .find(|c| c.id == id)
                    .map(|c| c.title.clone())
            })
            .unwrap_or_else(|| id.to_string())
    }

    /// Resolve a normalized name to a concept id
    ///
    /// Names decided earlier in the batch win; otherwise the store candidates are
    /// tie-broken by alias overlap with `names`, then creation time, then id.
    fn resolve(&mut self, norm: &str, names: &[String]) -> Option<String> {
        if let Some(id) = self.owners.get(norm) {
            return Some(id.clone());
        }

        let candidates = self.lookup.get(norm).filter(|c| !c.is_empty())?;
        let chosen = candidates
            .iter()
            .min_by(|a, b| {
                b.alias_overlap(names)
                    .cmp(&a.alias_overlap(names))
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            })?
            .clone();

        if candidates.len() > 1 && self.ambiguous_noted.insert(norm.to_string()) {
            let titles: Vec<String> = candidates.iter().map(|c| c.title.clone()).collect();
            warn!(
                name = %norm,
                candidates = ?titles,
                chosen = %chosen.title,
                "Ambiguous concept match"
            );
            self.report.notes.push(MergeNote::AmbiguousMatch {
                name: norm.to_string(),
                candidates: titles,
                chosen: chosen.title.clone(),
            });
        }

        let id = chosen.id.clone();
        self.owners.insert(norm.to_string(), id.clone());
        Some(id)
    }

    /// Bring an existing concept into the working set
    fn touch(&mut self, id: &str) {
        if self.working.contains_key(id) {
            return;
        }
        if let Some(concept) = self.lookup.values().flatten().find(|c| c.id == id) {
            self.original.insert(id.to_string(), concept.clone());
            self.working.insert(id.to_string(), concept.clone());
            self.order.push(id.to_string());
        }
    }

    /// Concept id owning `norm` other than `id`, if any
    ///
    /// A name already decided in this batch belongs to its owner alone, even when
    /// the store still lists other concepts under it.
    fn foreign_owner(&self, norm: &str, id: &str) -> Option<String> {
        if let Some(owner) = self.owners.get(norm) {
            return (owner != id).then(|| owner.clone());
        }
        self.lookup
            .get(norm)
            .and_then(|candidates| candidates.iter().find(|c| c.id != id))
            .map(|c| c.id.clone())
    }

    fn plan_concepts(&mut self, batch: &ExtractionBatch) -> Vec<String> {
        let mut mentioned = Vec::new();

        for raw in &batch.concepts {
            let title = raw.title.trim();
            if title.is_empty() {
                debug!("Skipping concept mention without a title");
                continue;
            }
            let norm = normalize_name(title);

            let mut names = vec![norm.clone()];
            for alias in &raw.aliases {
                let n = normalize_name(alias);
                if !n.is_empty() && !names.contains(&n) {
                    names.push(n);
                }
            }

            let id = match self.resolve(&norm, &names) {
                Some(id) => {
                    self.touch(&id);
                    self.report.counts.concepts_merged += 1;
                    debug!(concept_id = %id, mention = %title, "Merged with existing concept");
                    id
                }
                None => {
                    let concept = Concept::new(title);
                    let id = concept.id.clone();
                    debug!(concept_id = %id, title = %title, "Creating concept");
                    self.owners.insert(norm.clone(), id.clone());
                    self.created.insert(id.clone());
                    self.order.push(id.clone());
                    self.working.insert(id.clone(), concept);
                    self.report.counts.concepts_created += 1;
                    id
                }
            };

            for alias in std::iter::once(title).chain(raw.aliases.iter().map(String::as_str)) {
                let alias = alias.trim();
                let alias_norm = normalize_name(alias);
                if alias_norm.is_empty() {
                    continue;
                }
                if let Some(owner) = self.foreign_owner(&alias_norm, &id) {
                    let concept = self.title_of(&id);
                    let owner = self.title_of(&owner);
                    warn!(alias = %alias, concept = %concept, owner = %owner, "Alias owned by another concept");
                    self.report.notes.push(MergeNote::AliasConflict {
                        alias: alias.to_string(),
                        concept,
                        owner,
                    });
                    continue;
                }
                self.owners.insert(alias_norm, id.clone());
                if let Some(concept) = self.working.get_mut(&id) {
                    concept.add_alias(alias);
                }
            }

            if let Some(concept) = self.working.get_mut(&id) {
                if let Some(definition) = raw.definition.as_deref() {
                    concept.fill_definition(definition);
                }
                let difficulty = raw.difficulty.as_deref().and_then(|d| {
                    let parsed = Difficulty::parse(d);
                    if parsed.is_none() && !d.trim().is_empty() {
                        debug!(difficulty = %d, "Ignoring unknown difficulty");
                    }
                    parsed
                });
                concept.fill_difficulty(difficulty);
            }

            if !mentioned.contains(&id) {
                mentioned.push(id);
            }
        }

        mentioned
    }

    /// Whether `id` was created by this batch (so the store cannot know it yet)
    fn is_new(&self, id: &str) -> bool {
        self.created.contains(id)
    }

    fn finish(mut self) -> (GraphChangeset, MergeReport) {
        for id in &self.order {
            let Some(concept) = self.working.get(id) else {
                continue;
            };
            let changed = self.created.contains(id) || self.original.get(id) != Some(concept);
            if changed {
                self.changeset.concepts.push(concept.clone());
            }
        }
        (self.changeset, self.report)
    }
}

/// Resolves extraction batches into the canonical graph
pub struct ConceptResolver<S: GraphStore + ?Sized> {
    store: Arc<S>,
    locks: Arc<TitleLockManager>,
    lock_timeout: Option<Duration>,
}

impl<S: GraphStore + ?Sized> ConceptResolver<S> {
    /// Create a resolver with its own lock table
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: Arc::new(TitleLockManager::with_defaults()),
            lock_timeout: None,
        }
    }

    /// Share a lock table with other resolvers writing the same store
    pub fn with_locks(mut self, locks: Arc<TitleLockManager>) -> Self {
        self.locks = locks;
        self
    }

    /// Bound how long a batch waits for its title locks
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Get the underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolve one batch
    ///
    /// Malformed batches come back as `Rejected`. A lock timeout or store failure
    /// is returned as `Err` and leaves the graph untouched.
    pub async fn resolve(&self, batch: ExtractionBatch) -> Result<MergeReport> {
        let batch_id = batch.batch_id();

        if batch.is_malformed() {
            let reason = batch.error.clone().unwrap_or_default();
            warn!(batch_id = %batch_id, reason = %reason, "Rejecting malformed batch");
            return Ok(MergeReport::new(batch_id, MergeStatus::Rejected { reason }));
        }

        let (_guard, lookup) = self.lock_names(&batch_id, batch.mentioned_names()).await?;

        let mut plan = MergePlan::new(&lookup, &batch_id);
        let mentioned = plan.plan_concepts(&batch);
        self.plan_relations(&batch, &mut plan).await?;
        self.plan_examples(&batch, &mut plan).await?;
        self.plan_resource(&batch, &mentioned, &mut plan).await?;

        let (changeset, report) = plan.finish();
        if !changeset.is_empty() {
            self.store.apply(changeset).await?;
        }

        info!(
            batch_id = %batch_id,
            concepts_created = report.counts.concepts_created,
            concepts_merged = report.counts.concepts_merged,
            relations_created = report.counts.relations_created,
            examples_attached = report.counts.examples_attached,
            notes = report.notes.len(),
            "Batch merged"
        );

        Ok(report)
    }

    /// Resolve batches in order, one report per batch
    ///
    /// A failing batch is reported as `Failed` and the run continues.
    pub async fn resolve_all<I>(&self, batches: I) -> Vec<MergeReport>
    where
        I: IntoIterator<Item = ExtractionBatch>,
    {
        let mut reports = Vec::new();
        for batch in batches {
            let batch_id = batch.batch_id();
            match self.resolve(batch).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(batch_id = %batch_id, error = %e, "Batch failed");
                    reports.push(MergeReport::failed(batch_id, e.to_string()));
                }
            }
        }
        reports
    }

    /// Lock every name the batch touches plus the titles of matched concepts
    ///
    /// Matching can reveal titles outside the mentioned set; the locks are then
    /// released and the expanded set acquired again until nothing new appears.
    async fn lock_names(
        &self,
        batch_id: &str,
        mut keys: BTreeSet<String>,
    ) -> Result<(TitleLockGuard, Lookup)> {
        loop {
            let guard = self
                .locks
                .acquire_titles(keys.iter().cloned(), self.lock_timeout)
                .await?;
            let lookup = self.lookup(&keys).await?;

            let required: BTreeSet<String> = lookup
                .values()
                .flatten()
                .map(|c| c.normalized_title())
                .filter(|t| !t.is_empty())
                .collect();
            if guard.covers_all(&required) {
                return Ok((guard, lookup));
            }

            keys = guard.expanded_with(&required);
            debug!(batch_id = %batch_id, keys = keys.len(), "Expanding title lock set");
        }
    }

    async fn lookup(&self, keys: &BTreeSet<String>) -> Result<Lookup> {
        let results = join_all(keys.iter().map(|k| self.store.find_concepts_by_name(k))).await;
        keys.iter()
            .cloned()
            .zip(results)
            .map(|(k, r)| r.map(|concepts| (k, concepts)))
            .collect()
    }

    async fn plan_relations(&self, batch: &ExtractionBatch, plan: &mut MergePlan<'_>) -> Result<()> {
        for raw in &batch.relations {
            let Some(relation_type) = RelationType::parse(&raw.relation_type) else {
                debug!(relation_type = %raw.relation_type, "Dropping relation of unknown type");
                plan.report.notes.push(MergeNote::UnknownRelationType {
                    relation_type: raw.relation_type.clone(),
                });
                continue;
            };

            let source_norm = normalize_name(&raw.source);
            let target_norm = normalize_name(&raw.target);
            let source = plan.resolve(&source_norm, std::slice::from_ref(&source_norm));
            let target = plan.resolve(&target_norm, std::slice::from_ref(&target_norm));
            let (Some(source), Some(target)) = (source, target) else {
                warn!(source = %raw.source, target = %raw.target, "Unresolved relation endpoint");
                plan.report.notes.push(MergeNote::UnresolvedRelation {
                    source: raw.source.clone(),
                    target: raw.target.clone(),
                });
                continue;
            };

            if source == target {
                debug!(concept_id = %source, "Dropping self-referential relation");
                plan.report.counts.self_loops_dropped += 1;
                plan.report.notes.push(MergeNote::SelfLoop {
                    source: raw.source.clone(),
                    target: raw.target.clone(),
                });
                continue;
            }

            let relation = Relation::new(source, target, relation_type);
            let key = relation.key();
            if plan.relations.contains(&key) {
                plan.report.counts.relations_existing += 1;
                continue;
            }

            let exists = !plan.is_new(&relation.source_id)
                && !plan.is_new(&relation.target_id)
                && self
                    .store
                    .get_relation(&relation.source_id, &relation.target_id, relation_type)
                    .await?
                    .is_some();
            plan.relations.insert(key);

            if exists {
                plan.report.counts.relations_existing += 1;
            } else {
                plan.report.counts.relations_created += 1;
                plan.changeset.relations.push(relation);
            }
        }
        Ok(())
    }

    async fn plan_examples(&self, batch: &ExtractionBatch, plan: &mut MergePlan<'_>) -> Result<()> {
        let source_url = batch
            .source_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        for raw in &batch.examples {
            if raw.text.trim().is_empty() {
                debug!(concept = %raw.concept, "Skipping empty example");
                continue;
            }

            let Some(example_type) = ExampleType::parse(&raw.example_type) else {
                debug!(example_type = %raw.example_type, "Dropping example of unknown type");
                plan.report.notes.push(MergeNote::UnknownExampleType {
                    example_type: raw.example_type.clone(),
                });
                continue;
            };

            let norm = normalize_name(&raw.concept);
            let Some(concept_id) = plan.resolve(&norm, std::slice::from_ref(&norm)) else {
                warn!(concept = %raw.concept, "Unresolved example concept");
                plan.report.notes.push(MergeNote::UnresolvedExample {
                    concept: raw.concept.clone(),
                });
                continue;
            };

            let mut example = Example::new(&concept_id, &raw.text, example_type);
            if let Some(url) = source_url {
                example = example.with_source_url(url);
            }

            let exists = plan.example_ids.contains(&example.id)
                || (!plan.is_new(&concept_id) && self.store.get_example(&example.id).await?.is_some());
            if exists {
                plan.report.counts.examples_existing += 1;
                continue;
            }

            plan.example_ids.insert(example.id.clone());
            plan.report.counts.examples_attached += 1;
            plan.changeset.examples.push(example);
        }
        Ok(())
    }

    async fn plan_resource(
        &self,
        batch: &ExtractionBatch,
        mentioned: &[String],
        plan: &mut MergePlan<'_>,
    ) -> Result<()> {
        let Some(url) = batch
            .source_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
        else {
            return Ok(());
        };

        let mut resource = match self.store.get_resource_by_url(url).await? {
            Some(existing) => existing,
            None => Resource::new(url),
        };
        if resource.resource_type.is_none() {
            if let Some(resource_type) = batch.resource_type.as_deref() {
                resource = resource.with_type(resource_type);
            }
        }

        for concept_id in mentioned {
            plan.changeset
                .resource_links
                .push(ResourceLink::new(&resource.id, concept_id));
        }
        plan.report.counts.resources_linked = mentioned.len();
        plan.changeset.resources.push(resource);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::extraction::RawConcept;
    use crate::infrastructure::knowledge::InMemoryGraphStore;
    use chrono::{Duration as ChronoDuration, Utc};

    fn resolver() -> ConceptResolver<InMemoryGraphStore> {
        ConceptResolver::new(Arc::new(InMemoryGraphStore::new()))
    }

    #[tokio::test]
    async fn test_gradient_descent_alias_merge() {
        let resolver = resolver();

        let first = ExtractionBatch::new("chunk-1")
            .with_concept(RawConcept::new("Gradient Descent").with_aliases(["GD"]));
        let second = ExtractionBatch::new("chunk-2")
            .with_concept(RawConcept::new("gd").with_definition("An optimization method"));

        let r1 = resolver.resolve(first).await.unwrap();
        let r2 = resolver.resolve(second).await.unwrap();

        assert_eq!(r1.counts.concepts_created, 1);
        assert_eq!(r2.counts.concepts_created, 0);
        assert_eq!(r2.counts.concepts_merged, 1);

        let concepts = resolver.store().list_concepts().await.unwrap();
        assert_eq!(concepts.len(), 1);
        let gd = &concepts[0];
        assert_eq!(gd.title, "Gradient Descent");
        assert_eq!(gd.definition, "An optimization method");
        let aliases: Vec<&str> = gd.aliases.iter().map(String::as_str).collect();
        assert_eq!(aliases, vec!["GD", "Gradient Descent", "gd"]);
    }

    #[tokio::test]
    async fn test_definition_and_difficulty_first_write_wins() {
        let resolver = resolver();
        resolver
            .resolve(ExtractionBatch::new("a").with_concept(
                RawConcept::new("Loss").with_definition("first").with_difficulty("beginner"),
            ))
            .await
            .unwrap();
        resolver
            .resolve(ExtractionBatch::new("b").with_concept(
                RawConcept::new("loss").with_definition("second").with_difficulty("advanced"),
            ))
            .await
            .unwrap();

        let loss = resolver.store().get_concept_by_title("LOSS").await.unwrap().unwrap();
        assert_eq!(loss.definition, "first");
        assert_eq!(loss.difficulty, Some(Difficulty::Beginner));
    }

    #[tokio::test]
    async fn test_unknown_difficulty_stays_unset() {
        let resolver = resolver();
        resolver
            .resolve(ExtractionBatch::new("a").with_concept(RawConcept::new("Loss").with_difficulty("expert")))
            .await
            .unwrap();
        let loss = resolver.store().get_concept_by_title("loss").await.unwrap().unwrap();
        assert_eq!(loss.difficulty, None);
    }

    #[tokio::test]
    async fn test_malformed_batch_is_rejected_wholesale() {
        let resolver = resolver();
        let batch = ExtractionBatch::new("bad")
            .with_concept(RawConcept::new("Loss"))
            .with_error("llm returned invalid json");

        let report = resolver.resolve(batch).await.unwrap();

        assert!(matches!(report.status, MergeStatus::Rejected { .. }));
        assert!(resolver.store().list_concepts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relations_resolve_self_loops_and_unknowns() {
        let resolver = resolver();
        let batch = ExtractionBatch::new("c1")
            .with_concept(RawConcept::new("Derivative"))
            .with_concept(RawConcept::new("Gradient Descent").with_aliases(["GD"]))
            .with_relation("Derivative", "GD", "PREREQ_OF")
            .with_relation("derivative", "gradient descent", "prereq_of")
            .with_relation("GD", "Gradient Descent", "is_a")
            .with_relation("Derivative", "Calculus", "part_of")
            .with_relation("Derivative", "GD", "uses");

        let report = resolver.resolve(batch).await.unwrap();

        assert_eq!(report.counts.relations_created, 1);
        assert_eq!(report.counts.relations_existing, 1);
        assert_eq!(report.counts.self_loops_dropped, 1);
        assert!(report
            .notes
            .iter()
            .any(|n| matches!(n, MergeNote::UnresolvedRelation { target, .. } if target == "Calculus")));
        assert!(report
            .notes
            .iter()
            .any(|n| matches!(n, MergeNote::UnknownRelationType { relation_type } if relation_type == "uses")));

        let stats = resolver.store().stats().await.unwrap();
        assert_eq!(stats.relations, 1);
    }

    #[tokio::test]
    async fn test_relation_reingest_is_existing() {
        let resolver = resolver();
        let batch = ExtractionBatch::new("c1")
            .with_concept(RawConcept::new("A"))
            .with_concept(RawConcept::new("B"))
            .with_relation("A", "B", "prereq_of");

        resolver.resolve(batch.clone()).await.unwrap();
        let report = resolver.resolve(batch).await.unwrap();

        assert_eq!(report.counts.relations_created, 0);
        assert_eq!(report.counts.relations_existing, 1);
    }

    #[tokio::test]
    async fn test_examples_and_resource() {
        let resolver = resolver();
        let batch = ExtractionBatch::new("c1")
            .with_source_url("https://course.example/week3")
            .with_concept(RawConcept::new("Backpropagation"))
            .with_example("backpropagation", "dL/dw = dL/dy * dy/dw", "math")
            .with_example("Backpropagation", "  dl/dw = dl/dy * dy/dw ", "math")
            .with_example("Attention", "softmax(QK^T)V", "math")
            .with_example("Backpropagation", "a story", "anecdote");

        let report = resolver.resolve(batch).await.unwrap();

        assert_eq!(report.counts.examples_attached, 1);
        assert_eq!(report.counts.examples_existing, 1);
        assert_eq!(report.counts.resources_linked, 1);
        assert!(report
            .notes
            .iter()
            .any(|n| matches!(n, MergeNote::UnresolvedExample { concept } if concept == "Attention")));
        assert!(report
            .notes
            .iter()
            .any(|n| matches!(n, MergeNote::UnknownExampleType { .. })));

        let concept = resolver
            .store()
            .get_concept_by_title("backpropagation")
            .await
            .unwrap()
            .unwrap();
        let examples = resolver.store().examples_for(&concept.id).await.unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(
            examples[0].source_url.as_deref(),
            Some("https://course.example/week3")
        );
        let resources = resolver.store().resources_for(&concept.id).await.unwrap();
        assert_eq!(resources.len(), 1);
    }

    #[tokio::test]
    async fn test_alias_conflict_preserves_partition() {
        let resolver = resolver();
        resolver
            .resolve(ExtractionBatch::new("a").with_concept(RawConcept::new("Gradient Descent").with_aliases(["GD"])))
            .await
            .unwrap();

        let report = resolver
            .resolve(ExtractionBatch::new("b").with_concept(RawConcept::new("Gaussian Distribution").with_aliases(["GD"])))
            .await
            .unwrap();

        assert_eq!(report.counts.concepts_created, 1);
        assert!(report.notes.iter().any(|n| matches!(
            n,
            MergeNote::AliasConflict { alias, owner, .. } if alias == "GD" && owner == "Gradient Descent"
        )));

        let gaussian = resolver
            .store()
            .get_concept_by_title("gaussian distribution")
            .await
            .unwrap()
            .unwrap();
        assert!(!gaussian.aliases.contains("GD"));
    }

    #[tokio::test]
    async fn test_ambiguous_match_prefers_overlap_then_age() {
        let store = Arc::new(InMemoryGraphStore::new());
        let older = Concept::new("Normalization")
            .with_id("older")
            .with_created_at(Utc::now() - ChronoDuration::hours(2));
        let newer = Concept::new("Norm")
            .with_id("newer")
            .with_aliases(["Normalization", "Layer Norm"]);
        // Written directly, bypassing the resolver's partition checks.
        store.upsert_concept(&older).await.unwrap();
        store.upsert_concept(&newer).await.unwrap();
        let resolver = ConceptResolver::new(store.clone());

        let report = resolver
            .resolve(ExtractionBatch::new("x").with_concept(
                RawConcept::new("normalization").with_aliases(["layer norm"]),
            ))
            .await
            .unwrap();
        assert!(report.notes.iter().any(|n| matches!(
            n,
            MergeNote::AmbiguousMatch { chosen, .. } if chosen == "Norm"
        )));

        let report = resolver
            .resolve(ExtractionBatch::new("y").with_concept(
                RawConcept::new("normalization").with_definition("rescaling"),
            ))
            .await
            .unwrap();
        assert!(report.notes.iter().any(|n| matches!(
            n,
            MergeNote::AmbiguousMatch { chosen, .. } if chosen == "Normalization"
        )));
        let older = store.get_concept("older").await.unwrap().unwrap();
        assert_eq!(older.definition, "rescaling");
    }

    #[tokio::test]
    async fn test_ambiguous_winner_keeps_mention_alias() {
        let store = Arc::new(InMemoryGraphStore::new());
        let norm = Concept::new("Norm")
            .with_id("a")
            .with_created_at(Utc::now() - ChronoDuration::hours(1));
        let normalization = Concept::new("Normalization").with_id("b").with_aliases(["norm"]);
        store.upsert_concept(&norm).await.unwrap();
        store.upsert_concept(&normalization).await.unwrap();
        let resolver = ConceptResolver::new(store.clone());

        let report = resolver
            .resolve(ExtractionBatch::new("x").with_concept(RawConcept::new("NORM")))
            .await
            .unwrap();

        assert_eq!(report.counts.concepts_merged, 1);
        let ambiguous: Vec<&MergeNote> = report
            .notes
            .iter()
            .filter(|n| matches!(n, MergeNote::AmbiguousMatch { .. }))
            .collect();
        assert_eq!(ambiguous.len(), 1);
        assert!(matches!(
            ambiguous[0],
            MergeNote::AmbiguousMatch { chosen, .. } if chosen == "Norm"
        ));
        assert!(!report
            .notes
            .iter()
            .any(|n| matches!(n, MergeNote::AliasConflict { .. })));

        let norm = store.get_concept("a").await.unwrap().unwrap();
        assert!(norm.aliases.contains("NORM"));
    }

    #[tokio::test]
    async fn test_resolve_all_continues_after_rejection() {
        let resolver = resolver();
        let reports = resolver
            .resolve_all(vec![
                ExtractionBatch::new("1").with_concept(RawConcept::new("A")),
                ExtractionBatch::new("2").with_error("boom"),
                ExtractionBatch::new("3").with_concept(RawConcept::new("B")),
            ])
            .await;

        assert_eq!(reports.len(), 3);
        assert!(reports[0].is_merged());
        assert!(!reports[1].is_merged());
        assert!(reports[2].is_merged());
        assert_eq!(resolver.store().list_concepts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lock_timeout_surfaces_as_error() {
        let locks = Arc::new(TitleLockManager::with_defaults());
        let resolver = resolver()
            .with_locks(locks.clone())
            .with_lock_timeout(Duration::from_millis(20));
        let _held = locks
            .acquire_titles(["loss".to_string()], None)
            .await
            .unwrap();

        let err = resolver
            .resolve(ExtractionBatch::new("a").with_concept(RawConcept::new("Loss")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E300");
        assert!(resolver.store().list_concepts().await.unwrap().is_empty());
    }
}
