//! Context assembler
//!
//! Renders an explanation path into a bounded markdown payload for the
//! downstream answer generator. Blocks are added in path order and assembly
//! stops at the first block that would overflow the budget; nothing already
//! included is evicted.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::retrieval::{ExplanationPath, PathStep, RetrievalOutcome};

const HEADER: &str = "### Relevant Concepts (ordered from foundational to advanced)";

/// Size limit for an assembled context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "limit", rename_all = "snake_case")]
pub enum ContextBudget {
    Characters(usize),
    /// Estimated at four bytes per token
    Tokens(usize),
}

impl ContextBudget {
    fn limit(&self) -> usize {
        match self {
            Self::Characters(n) => *n,
            Self::Tokens(n) => n.saturating_mul(4),
        }
    }

    fn measure(&self, text: &str) -> usize {
        match self {
            Self::Characters(_) => text.chars().count(),
            Self::Tokens(_) => text.len(),
        }
    }
}

/// One rendered concept block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub concept_id: String,
    pub title: String,
    pub text: String,
    pub resource_urls: Vec<String>,
    pub examples: usize,
}

/// What made it into the bundle and what did not
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub concepts_included: usize,
    pub concepts_truncated: usize,
    /// Distinct resource URLs
    pub resources_included: usize,
    pub resources_truncated: usize,
    pub examples_included: usize,
    pub examples_truncated: usize,
    pub outcome: Option<RetrievalOutcome>,
    /// Size of `text` in the budget's unit
    pub used: usize,
    pub estimated_tokens: usize,
}

/// Bounded context handed to the answer generator with the original query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub query: String,
    pub blocks: Vec<ContextBlock>,
    pub text: String,
    pub metadata: ContextMetadata,
}

impl ContextBundle {
    /// Titles of the included concepts, in order
    pub fn learning_path(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.title.as_str()).collect()
    }
}

/// Render `path` into a context bundle that fits `budget`
pub fn assemble(path: &ExplanationPath, budget: ContextBudget) -> ContextBundle {
    let mut blocks: Vec<ContextBlock> = Vec::new();
    let mut body = String::new();
    let mut text = String::new();
    let mut titles: Vec<&str> = Vec::new();

    for (index, step) in path.steps.iter().enumerate() {
        let block = render_block(index + 1, step);

        let mut candidate_body = body.clone();
        candidate_body.push_str(&block.text);
        candidate_body.push('\n');
        titles.push(&step.concept.title);
        let candidate = compose(&candidate_body, &titles);

        if budget.measure(&candidate) > budget.limit() {
            titles.pop();
            break;
        }

        body = candidate_body;
        text = candidate;
        blocks.push(block);
    }

    let metadata = summarize(path, &blocks, &text, budget);

    ContextBundle {
        query: path.query.clone(),
        blocks,
        text,
        metadata,
    }
}

fn compose(body: &str, titles: &[&str]) -> String {
    format!(
        "{}\n\n{}\n**Learning Path:** {}\n",
        HEADER,
        body,
        titles.join(" -> ")
    )
}

fn render_block(position: usize, step: &PathStep) -> ContextBlock {
    let concept = &step.concept;
    let mut lines = Vec::new();

    let difficulty = concept
        .difficulty
        .map(|d| d.as_str())
        .unwrap_or("unknown");
    lines.push(format!("**{}. {}** [{}]", position, concept.title, difficulty));
    if concept.definition.is_empty() {
        lines.push("No definition available.".to_string());
    } else {
        lines.push(concept.definition.clone());
    }

    for related in &step.related {
        let (from, to) = if related.outgoing {
            (concept.title.as_str(), related.title.as_str())
        } else {
            (related.title.as_str(), concept.title.as_str())
        };
        lines.push(format!("*({} {} {})*", from, related.relation_type.describe(), to));
    }

    if !step.examples.is_empty() {
        lines.push("Examples:".to_string());
        for example in &step.examples {
            lines.push(format!("- [{}] {}", example.example_type, example.text));
            if let Some(url) = &example.source_url {
                lines.push(format!("  Source: {}", url));
            }
        }
    }

    let mut resource_urls = Vec::new();
    if !step.resources.is_empty() {
        lines.push("Resources:".to_string());
        for resource in &step.resources {
            match &resource.resource_type {
                Some(kind) => lines.push(format!("- {} ({})", resource.url, kind)),
                None => lines.push(format!("- {}", resource.url)),
            }
            resource_urls.push(resource.url.clone());
        }
    }

    ContextBlock {
        concept_id: concept.id.clone(),
        title: concept.title.clone(),
        text: lines.join("\n") + "\n",
        resource_urls,
        examples: step.examples.len(),
    }
}

fn summarize(
    path: &ExplanationPath,
    blocks: &[ContextBlock],
    text: &str,
    budget: ContextBudget,
) -> ContextMetadata {
    let included_urls: HashSet<&str> = blocks
        .iter()
        .flat_map(|b| b.resource_urls.iter().map(String::as_str))
        .collect();
    let truncated_steps = &path.steps[blocks.len()..];
    let truncated_urls: HashSet<&str> = truncated_steps
        .iter()
        .flat_map(|s| s.resources.iter().map(|r| r.url.as_str()))
        .filter(|url| !included_urls.contains(url))
        .collect();

    ContextMetadata {
        concepts_included: blocks.len(),
        concepts_truncated: truncated_steps.len(),
        resources_included: included_urls.len(),
        resources_truncated: truncated_urls.len(),
        examples_included: blocks.iter().map(|b| b.examples).sum(),
        examples_truncated: truncated_steps.iter().map(|s| s.examples.len()).sum(),
        outcome: Some(path.outcome),
        used: budget.measure(text),
        estimated_tokens: estimate_tokens(text),
    }
}

/// Rough token estimate (about four bytes per token)
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::concept::{Concept, Difficulty};
    use crate::domain::knowledge::material::{Example, ExampleType, Resource};
    use crate::domain::knowledge::relation::RelationType;
    use crate::domain::knowledge::retrieval::{RelatedConcept, RetrievalStats};

    fn step(title: &str, definition: &str) -> PathStep {
        PathStep {
            concept: Concept::new(title).with_definition(definition),
            similarity: None,
            depth: 0,
            resources: Vec::new(),
            examples: Vec::new(),
            related: Vec::new(),
        }
    }

    fn path(steps: Vec<PathStep>) -> ExplanationPath {
        ExplanationPath {
            query: "how does backprop work".to_string(),
            outcome: if steps.is_empty() {
                RetrievalOutcome::EmptyResult
            } else {
                RetrievalOutcome::Complete
            },
            steps,
            warnings: Vec::new(),
            stats: RetrievalStats::default(),
        }
    }

    #[test]
    fn test_renders_blocks_in_order_with_learning_path() {
        let mut derivative = step("Derivative", "Rate of change");
        derivative.concept.difficulty = Some(Difficulty::Beginner);
        derivative.examples.push(
            Example::new(&derivative.concept.id, "d/dx x^2 = 2x", ExampleType::Math)
                .with_source_url("https://x/calc"),
        );
        derivative
            .resources
            .push(Resource::new("https://x/calc.pdf").with_type("pdf"));
        let mut backprop = step("Backprop", "");
        backprop.related.push(RelatedConcept {
            concept_id: derivative.concept.id.clone(),
            title: "Derivative".to_string(),
            relation_type: RelationType::PrereqOf,
            outgoing: false,
        });

        let bundle = assemble(&path(vec![derivative, backprop]), ContextBudget::Tokens(2000));

        assert_eq!(bundle.learning_path(), vec!["Derivative", "Backprop"]);
        assert!(bundle.text.starts_with(HEADER));
        assert!(bundle.text.contains("**1. Derivative** [beginner]"));
        assert!(bundle.text.contains("- [math] d/dx x^2 = 2x"));
        assert!(bundle.text.contains("  Source: https://x/calc"));
        assert!(bundle.text.contains("- https://x/calc.pdf (pdf)"));
        assert!(bundle.text.contains("**2. Backprop** [unknown]\nNo definition available."));
        assert!(bundle.text.contains("*(Derivative is a prerequisite of Backprop)*"));
        assert!(bundle.text.ends_with("**Learning Path:** Derivative -> Backprop\n"));

        assert_eq!(bundle.metadata.concepts_included, 2);
        assert_eq!(bundle.metadata.resources_included, 1);
        assert_eq!(bundle.metadata.examples_included, 1);
        assert_eq!(bundle.metadata.concepts_truncated, 0);
        assert_eq!(bundle.metadata.outcome, Some(RetrievalOutcome::Complete));
    }

    #[test]
    fn test_stops_at_first_overflowing_block() {
        let steps = vec![
            step("A", "short"),
            step("B", &"long definition ".repeat(40)),
            step("C", "short"),
        ];
        let full = assemble(&path(steps.clone()), ContextBudget::Characters(100_000));
        let only_a = assemble(&path(steps[..1].to_vec()), ContextBudget::Characters(100_000));

        let budget = ContextBudget::Characters(only_a.text.chars().count() + 20);
        let bundle = assemble(&path(steps), budget);

        assert!(full.metadata.concepts_included == 3);
        assert_eq!(bundle.learning_path(), vec!["A"]);
        assert_eq!(bundle.metadata.concepts_truncated, 2);
        assert_eq!(bundle.text, only_a.text);
        assert!(bundle.metadata.used <= 100_000);
    }

    #[test]
    fn test_budget_is_respected() {
        let steps: Vec<PathStep> = (0..20)
            .map(|i| step(&format!("Concept {}", i), &"text ".repeat(i * 3)))
            .collect();

        for limit in [0, 50, 200, 800, 3000] {
            let bundle = assemble(&path(steps.clone()), ContextBudget::Characters(limit));
            assert!(bundle.text.chars().count() <= limit);
            assert_eq!(
                bundle.metadata.concepts_included + bundle.metadata.concepts_truncated,
                20
            );

            let bundle = assemble(&path(steps.clone()), ContextBudget::Tokens(limit));
            assert!(estimate_tokens(&bundle.text) <= limit);
        }
    }

    #[test]
    fn test_truncated_resources_counted_by_distinct_url() {
        let mut a = step("A", "a");
        a.resources.push(Resource::new("https://x/shared"));
        let mut b = step("B", &"b".repeat(500));
        b.resources.push(Resource::new("https://x/shared"));
        b.resources.push(Resource::new("https://x/only-b"));
        b.examples.push(Example::new("b", "ex", ExampleType::Code));

        let small = assemble(&path(vec![a.clone()]), ContextBudget::Characters(10_000));
        let limit = small.text.chars().count() + 10;
        let bundle = assemble(&path(vec![a, b]), ContextBudget::Characters(limit));

        assert_eq!(bundle.metadata.resources_included, 1);
        assert_eq!(bundle.metadata.resources_truncated, 1);
        assert_eq!(bundle.metadata.examples_truncated, 1);
    }

    #[test]
    fn test_empty_path() {
        let bundle = assemble(&path(Vec::new()), ContextBudget::Tokens(100));
        assert!(bundle.text.is_empty());
        assert!(bundle.blocks.is_empty());
        assert_eq!(bundle.metadata.outcome, Some(RetrievalOutcome::EmptyResult));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }
}
