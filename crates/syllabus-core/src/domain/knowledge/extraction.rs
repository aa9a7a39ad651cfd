//! Raw, pre-resolution extraction batches
//!
//! One batch is produced per source chunk by the upstream extractor. Fields
//! are parsed leniently: anything missing or `null` falls back to empty.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;

use tracing::warn;

use super::concept::normalize_name;
use crate::error::{Error, Result};

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Concepts, relations and examples extracted from one chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionBatch {
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub concepts: Vec<RawConcept>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub relations: Vec<RawRelation>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub examples: Vec<RawExample>,
    /// Set by the extractor when the chunk could not be processed
    #[serde(default)]
    pub error: Option<String>,
}

/// A concept mention as extracted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawConcept {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub aliases: Vec<String>,
}

/// A relation between two concept titles as extracted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRelation {
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub target: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub relation_type: String,
}

/// An example snippet attached to a concept title as extracted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawExample {
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub concept: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub example_type: String,
}

impl ExtractionBatch {
    /// Create an empty batch for a chunk
    pub fn new(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: Some(chunk_id.into()),
            ..Default::default()
        }
    }

    /// Set the source URL
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Add a concept mention
    pub fn with_concept(mut self, concept: RawConcept) -> Self {
        self.concepts.push(concept);
        self
    }

    /// Add a relation
    pub fn with_relation(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        self.relations.push(RawRelation {
            source: source.into(),
            target: target.into(),
            relation_type: relation_type.into(),
        });
        self
    }

    /// Add an example
    pub fn with_example(
        mut self,
        concept: impl Into<String>,
        text: impl Into<String>,
        example_type: impl Into<String>,
    ) -> Self {
        self.examples.push(RawExample {
            text: text.into(),
            concept: concept.into(),
            example_type: example_type.into(),
        });
        self
    }

    /// Mark the batch as malformed
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Identifier used in reports: the chunk id, or a content hash when absent
    pub fn batch_id(&self) -> String {
        if let Some(id) = self.chunk_id.as_ref().filter(|id| !id.trim().is_empty()) {
            return id.clone();
        }
        let body = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(body.as_bytes());
        format!("batch-{}", hex::encode(&digest[..6]))
    }

    /// Whether the extractor flagged this batch as malformed
    pub fn is_malformed(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.trim().is_empty())
    }

    /// Every normalized name the batch refers to
    pub fn mentioned_names(&self) -> BTreeSet<String> {
        let concept_names = self
            .concepts
            .iter()
            .flat_map(|c| std::iter::once(&c.title).chain(c.aliases.iter()));
        let relation_names = self
            .relations
            .iter()
            .flat_map(|r| [&r.source, &r.target]);
        let example_names = self.examples.iter().map(|e| &e.concept);

        concept_names
            .chain(relation_names)
            .chain(example_names)
            .map(|n| normalize_name(n))
            .filter(|n| !n.is_empty())
            .collect()
    }
}

impl RawConcept {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    pub fn with_difficulty(mut self, difficulty: impl Into<String>) -> Self {
        self.difficulty = Some(difficulty.into());
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }
}

/// Parse extraction batches from a JSON array or a JSON Lines document
pub fn parse_extraction_batches(content: &str) -> Result<Vec<ExtractionBatch>> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| Error::MalformedExtractionFile(format!("invalid JSON array: {}", e)));
    }

    // A line that does not decode becomes a rejected batch; the rest still ingest
    Ok(content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).unwrap_or_else(|e| {
                let line_no = index + 1;
                warn!(line = line_no, error = %e, "Undecodable extraction line");
                ExtractionBatch::new(format!("line-{}", line_no))
                    .with_error(format!("line {}: {}", line_no, e))
            })
        })
        .collect())
}

/// Read and parse an extraction file
pub async fn read_extraction_file(path: impl AsRef<Path>) -> Result<Vec<ExtractionBatch>> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    parse_extraction_batches(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let content = r#"[
            {"chunk_id": "c1", "source_url": "https://x/1",
             "concepts": [{"title": "Gradient Descent", "definition": null, "difficulty": "intermediate", "aliases": ["GD"]}],
             "relations": [{"source": "Derivative", "target": "Gradient Descent", "relation_type": "PREREQ_OF"}],
             "examples": [{"text": "w -= lr * g", "concept": "GD", "example_type": "code"}],
             "error": null}
        ]"#;

        let batches = parse_extraction_batches(content).unwrap();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.batch_id(), "c1");
        assert_eq!(batch.concepts[0].aliases, vec!["GD".to_string()]);
        assert_eq!(batch.concepts[0].definition, None);
        assert_eq!(batch.relations[0].relation_type, "PREREQ_OF");
        assert!(!batch.is_malformed());
    }

    #[test]
    fn test_parse_json_lines_with_nulls() {
        let content = "{\"chunk_id\": \"a\", \"concepts\": null}\n\n{\"chunk_id\": \"b\", \"error\": \"timeout\"}\n";

        let batches = parse_extraction_batches(content).unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches[0].concepts.is_empty());
        assert!(batches[1].is_malformed());
    }

    #[test]
    fn test_parse_reports_bad_line() {
        let content = "{\"chunk_id\": \"a\"}\nnot json\n";
        let batches = parse_extraction_batches(content).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].batch_id(), "line-2");
        assert!(batches[1].is_malformed());
        assert!(batches[1].error.as_deref().is_some_and(|e| e.starts_with("line 2")));
    }

    #[test]
    fn test_bad_line_keeps_neighbouring_batches() {
        let content = concat!(
            "{\"chunk_id\": \"a\", \"concepts\": [{\"title\": \"Norm\"}]}\n",
            "{\"chunk_id\": \"b\", \"concepts\": \"oops\"}\n",
            "{\"chunk_id\": \"c\", \"concepts\": [{\"title\": \"Vector\"}]}\n",
        );

        let batches = parse_extraction_batches(content).unwrap();
        let ids: Vec<String> = batches.iter().map(|b| b.batch_id()).collect();
        assert_eq!(ids, vec!["a", "line-2", "c"]);
        assert!(!batches[0].is_malformed());
        assert!(batches[1].is_malformed());
        assert_eq!(batches[2].concepts[0].title, "Vector");
    }

    #[test]
    fn test_bad_json_array_still_fails() {
        let err = parse_extraction_batches("[{\"chunk_id\": 1").unwrap_err();
        assert!(matches!(err, Error::MalformedExtractionFile(_)));
    }

    #[test]
    fn test_empty_content() {
        assert!(parse_extraction_batches("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_batch_id_falls_back_to_hash() {
        let batch = ExtractionBatch::default().with_concept(RawConcept::new("Loss"));
        let id = batch.batch_id();
        assert!(id.starts_with("batch-"));
        assert_eq!(id, batch.clone().batch_id());
    }

    #[test]
    fn test_mentioned_names() {
        let batch = ExtractionBatch::new("c1")
            .with_concept(RawConcept::new("Gradient Descent").with_aliases(["GD"]))
            .with_relation("Derivative", " gradient descent ", "prereq_of")
            .with_example("Chain Rule", "d/dx f(g(x))", "math");

        let names: Vec<String> = batch.mentioned_names().into_iter().collect();
        assert_eq!(
            names,
            vec!["chain rule", "derivative", "gd", "gradient descent"]
        );
    }

    #[test]
    fn test_blank_error_is_not_malformed() {
        assert!(!ExtractionBatch::new("c").with_error("  ").is_malformed());
    }
}
