//! Query-time retrieval of explanation paths
//!
//! Concepts named by the caller and the concepts nearest to the embedded query
//! become seeds, named ones first, and the engine walks
//! inbound `prereq_of` edges breadth-first (one concurrent fan-out per level)
//! until the depth or size bound is hit. The visited set is then ordered with
//! prerequisites first and each step gets its resources, examples and the
//! relations that connect it to the rest of the path.

use futures_util::future::{join_all, join3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::concept::{Concept, normalize_name};
use super::embedding::{ConceptMatch, EmbeddingGateway};
use super::material::{Example, Resource};
use super::ordering::{OrderNode, prerequisite_order};
use super::relation::{Relation, RelationType};
use super::store::GraphStore;

/// Per-query retrieval bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOptions {
    /// Number of nearest concepts requested as seeds
    pub seed_count: usize,
    /// Maximum number of prerequisite hops from a seed
    pub max_depth: usize,
    /// Maximum number of concepts in the path
    pub max_concepts: usize,
    /// Overall deadline for every embedding and store call
    pub timeout: Duration,
    /// Seeds scoring below this are dropped
    pub min_similarity: f32,
    /// Cap on examples attached per step (None = all)
    pub max_examples_per_concept: Option<usize>,
    /// Concept titles or aliases seeded ahead of the semantic matches
    #[serde(default)]
    pub explicit_seeds: Vec<String>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            seed_count: 5,
            max_depth: 2,
            max_concepts: 15,
            timeout: Duration::from_secs(10),
            min_similarity: 0.0,
            max_examples_per_concept: Some(2),
            explicit_seeds: Vec::new(),
        }
    }
}

impl RetrievalOptions {
    pub fn with_seed_count(mut self, seed_count: usize) -> Self {
        self.seed_count = seed_count;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_concepts(mut self, max_concepts: usize) -> Self {
        self.max_concepts = max_concepts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn with_max_examples_per_concept(mut self, max: Option<usize>) -> Self {
        self.max_examples_per_concept = max;
        self
    }

    pub fn with_explicit_seeds<I, S>(mut self, titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.explicit_seeds.extend(titles.into_iter().map(Into::into));
        self
    }
}

/// How a retrieval ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalOutcome {
    /// Every stage finished within bounds
    Complete,
    /// No seeds were found; not an error
    EmptyResult,
    /// A stage timed out; the path holds what was gathered before it
    Partial,
}

impl RetrievalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::EmptyResult => "empty_result",
            Self::Partial => "partial",
        }
    }
}

impl std::fmt::Display for RetrievalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Non-fatal conditions recorded while building a path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalWarning {
    /// The similarity index returned an id the graph does not have
    SeedMissing { concept_id: String },
    /// A named seed matches no concept title or alias
    UnknownConcept { title: String },
    /// The size bound cut candidates at this depth (titles of dropped concepts)
    Truncated { depth: usize, dropped: Vec<String> },
    /// A prerequisite cycle was broken by emitting `emitted` early (titles)
    CycleBroken { members: Vec<String>, emitted: String },
    /// A stage ran past the deadline
    UpstreamTimeout { stage: String },
}

impl std::fmt::Display for RetrievalWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SeedMissing { concept_id } => {
                write!(f, "seed {} is not in the graph", concept_id)
            }
            Self::UnknownConcept { title } => write!(f, "no concept named {}", title),
            Self::Truncated { depth, dropped } => write!(
                f,
                "size bound dropped {} concept(s) at depth {}: {}",
                dropped.len(),
                depth,
                dropped.join(", ")
            ),
            Self::CycleBroken { members, emitted } => write!(
                f,
                "prerequisite cycle [{}] broken at {}",
                members.join(" -> "),
                emitted
            ),
            Self::UpstreamTimeout { stage } => write!(f, "{} timed out", stage),
        }
    }
}

/// A relation from a step to another concept on the same path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedConcept {
    pub concept_id: String,
    pub title: String,
    pub relation_type: RelationType,
    /// True when this step is the relation's source
    pub outgoing: bool,
}

/// One concept on the explanation path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub concept: Concept,
    /// Seed similarity; None for named seeds and concepts reached by traversal
    pub similarity: Option<f32>,
    /// Prerequisite hops from the nearest seed
    pub depth: usize,
    pub resources: Vec<Resource>,
    pub examples: Vec<Example>,
    pub related: Vec<RelatedConcept>,
}

/// Counters describing the work done for one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStats {
    pub seeds_found: usize,
    pub concepts_visited: usize,
    pub store_calls: usize,
    pub levels_expanded: usize,
}

/// Ordered, bounded set of concepts answering a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationPath {
    pub query: String,
    /// Steps, prerequisites first
    pub steps: Vec<PathStep>,
    pub outcome: RetrievalOutcome,
    pub warnings: Vec<RetrievalWarning>,
    pub stats: RetrievalStats,
}

impl ExplanationPath {
    /// Titles in path order
    pub fn titles(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.concept.title.as_str()).collect()
    }

    /// Whether the path has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of cycle breaks recorded
    pub fn cycle_breaks(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, RetrievalWarning::CycleBroken { .. }))
            .count()
    }
}

#[derive(Debug)]
struct Visit {
    concept: Concept,
    depth: usize,
    similarity: Option<f32>,
}

type Attachments = (Vec<Resource>, Vec<Example>, Vec<Relation>);

/// Mutable bookkeeping for one query
#[derive(Debug)]
struct Run {
    deadline: Instant,
    warnings: Vec<RetrievalWarning>,
    stats: RetrievalStats,
    partial: bool,
}

impl Run {
    fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            deadline: now.checked_add(timeout).unwrap_or(now + Duration::from_secs(86_400)),
            warnings: Vec::new(),
            stats: RetrievalStats::default(),
            partial: false,
        }
    }

    /// Await `fut` against the deadline; a timeout marks the run partial
    async fn within<T, F>(&mut self, stage: &str, fut: F) -> Result<Option<T>>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout_at(self.deadline, fut).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                warn!(stage, "Retrieval stage timed out");
                self.partial = true;
                self.warnings.push(RetrievalWarning::UpstreamTimeout {
                    stage: stage.to_string(),
                });
                Ok(None)
            }
        }
    }

    fn finish(self, query: &str, steps: Vec<PathStep>) -> ExplanationPath {
        let outcome = if self.partial {
            RetrievalOutcome::Partial
        } else if steps.is_empty() {
            RetrievalOutcome::EmptyResult
        } else {
            RetrievalOutcome::Complete
        };

        info!(
            outcome = %outcome,
            steps = steps.len(),
            seeds = self.stats.seeds_found,
            visited = self.stats.concepts_visited,
            store_calls = self.stats.store_calls,
            warnings = self.warnings.len(),
            "Explanation path built"
        );

        ExplanationPath {
            query: query.to_string(),
            steps,
            outcome,
            warnings: self.warnings,
            stats: self.stats,
        }
    }
}

/// Builds explanation paths from a graph store and an embedding gateway
pub struct RetrievalEngine<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    embeddings: Arc<E>,
}

impl<S: ?Sized, E: ?Sized> Clone for RetrievalEngine<S, E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            embeddings: Arc::clone(&self.embeddings),
        }
    }
}

impl<S, E> RetrievalEngine<S, E>
where
    S: GraphStore + ?Sized,
    E: EmbeddingGateway + ?Sized,
{
    /// Create a new retrieval engine
    pub fn new(store: Arc<S>, embeddings: Arc<E>) -> Self {
        Self { store, embeddings }
    }

    /// Turn a free-text question into an ordered explanation path
    ///
    /// Store and gateway failures are returned as errors; timeouts, missing
    /// seeds, truncation and cycles are reported through the path itself.
    pub async fn build_explanation_path(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<ExplanationPath> {
        let query = query.trim();
        let mut run = Run::new(options.timeout);

        let semantic = options.seed_count > 0 && !query.is_empty();
        if options.max_concepts == 0 || (!semantic && options.explicit_seeds.is_empty()) {
            debug!(query, "Nothing to retrieve");
            return Ok(run.finish(query, Vec::new()));
        }

        // ---- Seeds ----
        let mut seeds = self.named_seeds(options, &mut run).await?;
        let room = options.max_concepts.saturating_sub(seeds.len());
        if semantic && room > 0 && !run.partial {
            if let Some(matches) = self.semantic_matches(query, options, &mut run).await? {
                let named: HashSet<String> = seeds.iter().map(|(c, _)| c.id.clone()).collect();
                let nearest = self
                    .select_seeds(matches, options, &named, room, &mut run)
                    .await?;
                seeds.extend(nearest.into_iter().map(|(c, score)| (c, Some(score))));
            }
        }
        run.stats.seeds_found = seeds.len();
        if seeds.is_empty() {
            return Ok(run.finish(query, Vec::new()));
        }

        // ---- Breadth-first prerequisite expansion ----
        let mut visited: HashMap<String, Visit> = HashMap::new();
        let mut discovery: Vec<String> = Vec::new();
        let mut inbound: HashMap<String, Vec<String>> = HashMap::new();

        let mut frontier = Vec::with_capacity(seeds.len());
        for (concept, score) in seeds {
            frontier.push(concept.id.clone());
            discovery.push(concept.id.clone());
            visited.insert(
                concept.id.clone(),
                Visit {
                    concept,
                    depth: 0,
                    similarity: score,
                },
            );
        }

        let mut depth = 0;
        while depth < options.max_depth && !frontier.is_empty() {
            run.stats.store_calls += frontier.len();
            let Some(lists) = run.within("expand", self.fetch_inbound(&frontier)).await? else {
                break;
            };
            run.stats.levels_expanded += 1;

            let mut candidates = BTreeSet::new();
            for (id, sources) in frontier.iter().zip(lists) {
                candidates.extend(
                    sources
                        .iter()
                        .filter(|s| !visited.contains_key(*s))
                        .cloned(),
                );
                inbound.insert(id.clone(), sources);
            }
            if candidates.is_empty() {
                break;
            }

            let candidates: Vec<String> = candidates.into_iter().collect();
            run.stats.store_calls += candidates.len();
            let Some(found) = run.within("expand", self.fetch_concepts(&candidates)).await? else {
                break;
            };
            let mut found: Vec<Concept> = found.into_iter().flatten().collect();

            let room = options.max_concepts.saturating_sub(visited.len());
            if found.len() > room {
                found.sort_by(|a, b| a.ordering_key().cmp(&b.ordering_key()));
                let dropped: Vec<String> = found.split_off(room).into_iter().map(|c| c.title).collect();
                warn!(
                    depth = depth + 1,
                    dropped = dropped.len(),
                    max_concepts = options.max_concepts,
                    "Size bound reached, truncating frontier"
                );
                run.warnings.push(RetrievalWarning::Truncated {
                    depth: depth + 1,
                    dropped,
                });
            }

            depth += 1;
            frontier = found.iter().map(|c| c.id.clone()).collect();
            for concept in found {
                debug!(concept = %concept.title, depth, "Visited prerequisite");
                discovery.push(concept.id.clone());
                visited.insert(
                    concept.id.clone(),
                    Visit {
                        concept,
                        depth,
                        similarity: None,
                    },
                );
            }

            if visited.len() >= options.max_concepts {
                break;
            }
        }

        // Nodes at the depth/size limit still need their inbound edges for ordering.
        let unexpanded: Vec<String> = discovery
            .iter()
            .filter(|id| !inbound.contains_key(*id))
            .cloned()
            .collect();
        if !unexpanded.is_empty() && !run.partial {
            run.stats.store_calls += unexpanded.len();
            if let Some(lists) = run.within("expand", self.fetch_inbound(&unexpanded)).await? {
                inbound.extend(unexpanded.into_iter().zip(lists));
            }
        }

        run.stats.concepts_visited = visited.len();

        // ---- Ordering ----
        let nodes: Vec<OrderNode> = discovery
            .iter()
            .filter_map(|id| visited.get(id))
            .map(|v| OrderNode {
                id: v.concept.id.clone(),
                title: v.concept.title.clone(),
                depth: v.depth,
                difficulty: v.concept.difficulty,
            })
            .collect();
        let mut edges = Vec::new();
        for (target, sources) in &inbound {
            for source in sources {
                if visited.contains_key(source) {
                    edges.push((source.clone(), target.clone()));
                }
            }
        }
        edges.sort();

        let ordering = prerequisite_order(&nodes, &edges);
        let title_of = |id: &String| {
            visited
                .get(id)
                .map(|v| v.concept.title.clone())
                .unwrap_or_else(|| id.clone())
        };
        for cycle in &ordering.cycle_breaks {
            let members: Vec<String> = cycle.members.iter().map(title_of).collect();
            let emitted = title_of(&cycle.emitted);
            warn!(
                members = ?members,
                emitted = %emitted,
                "Prerequisite cycle broken"
            );
            run.warnings.push(RetrievalWarning::CycleBroken { members, emitted });
        }

        // ---- Attachments ----
        let attachments = if run.partial {
            None
        } else {
            run.stats.store_calls += ordering.order.len() * 3;
            run.within("attachments", self.fetch_attachments(&ordering.order))
                .await?
        };

        let mut attachments = attachments.map(|a| a.into_iter());
        let mut steps = Vec::with_capacity(ordering.order.len());
        for id in &ordering.order {
            let Some(visit) = visited.get(id) else {
                continue;
            };
            let (resources, examples, relations) = attachments
                .as_mut()
                .and_then(|it| it.next())
                .unwrap_or_default();

            steps.push(PathStep {
                concept: visit.concept.clone(),
                similarity: visit.similarity,
                depth: visit.depth,
                resources: dedup_by_id(resources, |r| r.id.clone()),
                examples: cap(
                    dedup_by_id(examples, |e| e.id.clone()),
                    options.max_examples_per_concept,
                ),
                related: related_on_path(id, relations, &visited),
            });
        }

        Ok(run.finish(query, steps))
    }

    /// Resolve the caller's named seeds, in the order given
    ///
    /// Each name maps to the oldest concept answering to it. Unknown names are
    /// reported; names beyond `max_concepts` are truncated at depth 0.
    async fn named_seeds(
        &self,
        options: &RetrievalOptions,
        run: &mut Run,
    ) -> Result<Vec<(Concept, Option<f32>)>> {
        let names: Vec<(&str, String)> = options
            .explicit_seeds
            .iter()
            .map(|t| (t.trim(), normalize_name(t)))
            .filter(|(_, norm)| !norm.is_empty())
            .collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }

        run.stats.store_calls += names.len();
        let lookups = join_all(
            names
                .iter()
                .map(|(_, norm)| self.store.find_concepts_by_name(norm)),
        );
        let Some(found) = run.within("seed_lookup", async {
            lookups.await.into_iter().collect::<Result<Vec<_>>>()
        })
        .await?
        else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut seeds = Vec::new();
        for ((title, _), candidates) in names.into_iter().zip(found) {
            match candidates.into_iter().next() {
                Some(concept) => {
                    if seen.insert(concept.id.clone()) {
                        debug!(concept = %concept.title, name = %title, "Named seed");
                        seeds.push((concept, None));
                    }
                }
                None => {
                    warn!(name = %title, "Named seed matches no concept");
                    run.warnings.push(RetrievalWarning::UnknownConcept {
                        title: title.to_string(),
                    });
                }
            }
        }

        if seeds.len() > options.max_concepts {
            let dropped: Vec<String> = seeds
                .split_off(options.max_concepts)
                .into_iter()
                .map(|(c, _)| c.title)
                .collect();
            run.warnings.push(RetrievalWarning::Truncated { depth: 0, dropped });
        }
        Ok(seeds)
    }

    /// Embed the query and ask the index for its nearest concepts
    async fn semantic_matches(
        &self,
        query: &str,
        options: &RetrievalOptions,
        run: &mut Run,
    ) -> Result<Option<Vec<ConceptMatch>>> {
        let Some(vector) = run.within("embed", self.embeddings.embed(query)).await? else {
            return Ok(None);
        };
        run.within(
            "nearest_concepts",
            self.embeddings.nearest_concepts(&vector, options.seed_count),
        )
        .await
    }

    /// Filter, dedupe, resolve and bound the nearest-concept matches
    ///
    /// Concepts in `named` are already seeds and are skipped; at most `room`
    /// seeds are kept.
    async fn select_seeds(
        &self,
        matches: Vec<ConceptMatch>,
        options: &RetrievalOptions,
        named: &HashSet<String>,
        room: usize,
        run: &mut Run,
    ) -> Result<Vec<(Concept, f32)>> {
        let mut best: BTreeMap<String, f32> = BTreeMap::new();
        for m in matches {
            if named.contains(&m.concept_id) {
                continue;
            }
            if m.score.is_nan() || m.score < options.min_similarity {
                debug!(concept_id = %m.concept_id, score = m.score, "Seed below similarity floor");
                continue;
            }
            let entry = best.entry(m.concept_id).or_insert(m.score);
            if m.score > *entry {
                *entry = m.score;
            }
        }

        let mut ranked: Vec<(String, f32)> = best.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(options.seed_count);
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        run.stats.store_calls += ids.len();
        let Some(fetched) = run.within("seed_lookup", self.fetch_concepts(&ids)).await? else {
            return Ok(Vec::new());
        };

        let mut seeds = Vec::with_capacity(ranked.len());
        for ((id, score), concept) in ranked.into_iter().zip(fetched) {
            match concept {
                Some(concept) => seeds.push((concept, score)),
                None => {
                    warn!(concept_id = %id, "Seed not found in graph store");
                    run.warnings.push(RetrievalWarning::SeedMissing { concept_id: id });
                }
            }
        }

        seeds.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa)
                .then_with(|| a.title.cmp(&b.title))
                .then_with(|| a.id.cmp(&b.id))
        });
        if seeds.len() > room {
            let dropped: Vec<String> = seeds
                .split_off(room)
                .into_iter()
                .map(|(c, _)| c.title)
                .collect();
            warn!(
                dropped = dropped.len(),
                max_concepts = options.max_concepts,
                "Size bound reached, truncating seeds"
            );
            run.warnings.push(RetrievalWarning::Truncated { depth: 0, dropped });
        }
        Ok(seeds)
    }

    async fn fetch_concepts(&self, ids: &[String]) -> Result<Vec<Option<Concept>>> {
        join_all(ids.iter().map(|id| self.store.get_concept(id)))
            .await
            .into_iter()
            .collect()
    }

    async fn fetch_inbound(&self, ids: &[String]) -> Result<Vec<Vec<String>>> {
        join_all(ids.iter().map(|id| self.store.inbound_prereqs(id)))
            .await
            .into_iter()
            .collect()
    }

    async fn fetch_attachments(&self, ids: &[String]) -> Result<Vec<Attachments>> {
        join_all(ids.iter().map(|id| async move {
            let (resources, examples, relations) = join3(
                self.store.resources_for(id),
                self.store.examples_for(id),
                self.store.relations_for(id),
            )
            .await;
            Ok::<Attachments, Error>((resources?, examples?, relations?))
        }))
        .await
        .into_iter()
        .collect()
    }
}

fn dedup_by_id<T>(items: Vec<T>, id: impl Fn(&T) -> String) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(id(item))).collect()
}

fn cap<T>(mut items: Vec<T>, max: Option<usize>) -> Vec<T> {
    if let Some(max) = max {
        items.truncate(max);
    }
    items
}

fn related_on_path(
    id: &str,
    relations: Vec<Relation>,
    visited: &HashMap<String, Visit>,
) -> Vec<RelatedConcept> {
    let mut seen = HashSet::new();
    relations
        .into_iter()
        .filter_map(|rel| {
            let other = rel.other_end(id)?.to_string();
            if other == id {
                return None;
            }
            let visit = visited.get(&other)?;
            let outgoing = rel.source_id == id;
            seen.insert((other.clone(), rel.relation_type, outgoing))
                .then(|| RelatedConcept {
                    concept_id: other,
                    title: visit.concept.title.clone(),
                    relation_type: rel.relation_type,
                    outgoing,
                })
        })
        .collect()
}
