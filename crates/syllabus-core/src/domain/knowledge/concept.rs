//! Concept nodes of the course knowledge graph
//!
//! A concept is identified by a canonical title and owns a set of alias
//! strings. Matching is done on normalized names, so "Gradient Descent",
//! " gradient  descent " and "GRADIENT DESCENT" all refer to the same node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Normalize a concept name for matching
///
/// Trims, lowercases and collapses whitespace runs. Punctuation is kept, so
/// "C++" and "C" stay distinct.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A canonical concept in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Canonical display title
    pub title: String,
    /// Alias display strings, always including the title
    pub aliases: BTreeSet<String>,
    /// Definition text (empty until first provided)
    pub definition: String,
    /// Difficulty level, unset until first provided
    pub difficulty: Option<Difficulty>,
    /// When the concept was created
    pub created_at: DateTime<Utc>,
    /// When the concept was last updated
    pub updated_at: DateTime<Utc>,
}

impl Concept {
    /// Create a new concept with a fresh identifier
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into().trim().to_string();
        let now = Utc::now();
        let mut aliases = BTreeSet::new();
        aliases.insert(title.clone());

        Self {
            id: Uuid::new_v4().to_string(),
            title,
            aliases,
            definition: String::new(),
            difficulty: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the definition
    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = definition.into().trim().to_string();
        self
    }

    /// Set the difficulty
    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    /// Add aliases
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for alias in aliases {
            self.add_alias(alias.as_ref());
        }
        self
    }

    /// Set the creation timestamp
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    /// Normalized form of the canonical title
    pub fn normalized_title(&self) -> String {
        normalize_name(&self.title)
    }

    /// Normalized forms of every name this concept answers to
    pub fn normalized_names(&self) -> BTreeSet<String> {
        self.aliases
            .iter()
            .map(|a| normalize_name(a))
            .chain(std::iter::once(self.normalized_title()))
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// Add an alias display string
    ///
    /// Returns false when the trimmed alias is empty or already present verbatim.
    /// Case variants of an existing alias are kept as separate display strings.
    pub fn add_alias(&mut self, alias: &str) -> bool {
        let alias = alias.trim();
        if alias.is_empty() || self.aliases.contains(alias) {
            return false;
        }
        self.aliases.insert(alias.to_string());
        self.updated_at = Utc::now();
        true
    }

    /// Check if this concept answers to an already-normalized name
    pub fn matches_normalized(&self, normalized: &str) -> bool {
        self.normalized_title() == normalized
            || self.aliases.iter().any(|a| normalize_name(a) == normalized)
    }

    /// Check if this concept matches a raw name (title or alias)
    pub fn matches_name(&self, name: &str) -> bool {
        self.matches_normalized(&normalize_name(name))
    }

    /// Number of `names` (normalized) this concept answers to
    pub fn alias_overlap<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> usize {
        let own = self.normalized_names();
        names.into_iter().filter(|n| own.contains(*n)).count()
    }

    /// Fill the definition if it is still empty; returns whether it changed
    pub fn fill_definition(&mut self, definition: &str) -> bool {
        let definition = definition.trim();
        if !self.definition.is_empty() || definition.is_empty() {
            return false;
        }
        self.definition = definition.to_string();
        self.updated_at = Utc::now();
        true
    }

    /// Set the difficulty if it is still unset; returns whether it changed
    pub fn fill_difficulty(&mut self, difficulty: Option<Difficulty>) -> bool {
        match (self.difficulty, difficulty) {
            (None, Some(d)) => {
                self.difficulty = Some(d);
                self.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Sort key used for deterministic tie-breaks: difficulty, then title, then id
    pub fn ordering_key(&self) -> (u8, String, String) {
        (
            Difficulty::rank(self.difficulty),
            self.title.clone(),
            self.id.clone(),
        )
    }

    /// Text used when indexing this concept for similarity search
    pub fn embedding_text(&self) -> String {
        let mut text = self.title.clone();
        if !self.definition.is_empty() {
            text.push_str(". ");
            text.push_str(&self.definition);
        }
        let others: Vec<&str> = self
            .aliases
            .iter()
            .filter(|a| a.as_str() != self.title)
            .map(String::as_str)
            .collect();
        if !others.is_empty() {
            text.push_str(". Also known as: ");
            text.push_str(&others.join(", "));
        }
        text
    }
}

/// Difficulty levels, ordered from easiest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginner" | "basic" | "introductory" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }

    /// Ordering rank; unset sorts after every level
    pub fn rank(difficulty: Option<Self>) -> u8 {
        match difficulty {
            Some(Self::Beginner) => 0,
            Some(Self::Intermediate) => 1,
            Some(Self::Advanced) => 2,
            None => 3,
        }
    }

    /// Get all difficulty levels
    pub fn all() -> &'static [Difficulty] {
        &[Self::Beginner, Self::Intermediate, Self::Advanced]
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concept_creation() {
        let concept = Concept::new("  Gradient Descent ")
            .with_definition("An optimization method")
            .with_difficulty(Difficulty::Intermediate)
            .with_aliases(["GD"]);

        assert!(!concept.id.is_empty());
        assert_eq!(concept.title, "Gradient Descent");
        assert_eq!(concept.normalized_title(), "gradient descent");
        assert!(concept.aliases.contains("Gradient Descent"));
        assert!(concept.aliases.contains("GD"));
        assert_eq!(concept.difficulty, Some(Difficulty::Intermediate));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_name("Gradient Descent"), "gradient descent");
        assert_eq!(normalize_name("  Multiple   Spaces\t "), "multiple spaces");
        assert_eq!(normalize_name("C++"), "c++");
        assert_ne!(normalize_name("C++"), normalize_name("C"));
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn test_alias_case_variants_are_kept() {
        let mut concept = Concept::new("Gradient Descent").with_aliases(["GD"]);

        assert!(concept.add_alias("gd"));
        assert!(!concept.add_alias(" gd "));
        assert!(!concept.add_alias(""));
        assert_eq!(concept.aliases.len(), 3);
        assert_eq!(concept.normalized_names().len(), 2);
    }

    #[test]
    fn test_matches_name() {
        let concept = Concept::new("Gradient Descent").with_aliases(["GD"]);

        assert!(concept.matches_name("gradient   DESCENT"));
        assert!(concept.matches_name("gd"));
        assert!(!concept.matches_name("gradient"));
    }

    #[test]
    fn test_fill_is_first_write_wins() {
        let mut concept = Concept::new("Backpropagation");

        assert!(concept.fill_definition("Computes gradients"));
        assert!(!concept.fill_definition("Something else"));
        assert_eq!(concept.definition, "Computes gradients");

        assert!(concept.fill_difficulty(Some(Difficulty::Advanced)));
        assert!(!concept.fill_difficulty(Some(Difficulty::Beginner)));
        assert!(!concept.fill_difficulty(None));
        assert_eq!(concept.difficulty, Some(Difficulty::Advanced));
    }

    #[test]
    fn test_alias_overlap() {
        let concept = Concept::new("Gradient Descent").with_aliases(["GD", "Steepest Descent"]);
        let names = vec!["gd".to_string(), "steepest descent".to_string(), "sgd".to_string()];
        assert_eq!(concept.alias_overlap(&names), 2);
    }

    #[test]
    fn test_embedding_text() {
        let concept = Concept::new("Gradient Descent")
            .with_definition("An optimization method")
            .with_aliases(["GD"]);
        assert_eq!(
            concept.embedding_text(),
            "Gradient Descent. An optimization method. Also known as: GD"
        );
        assert_eq!(Concept::new("Loss").embedding_text(), "Loss");
    }

    #[test]
    fn test_difficulty_parsing_and_rank() {
        assert_eq!(Difficulty::parse("Beginner"), Some(Difficulty::Beginner));
        assert_eq!(Difficulty::parse(" ADVANCED "), Some(Difficulty::Advanced));
        assert_eq!(Difficulty::parse("expert"), None);

        assert!(Difficulty::rank(Some(Difficulty::Beginner)) < Difficulty::rank(Some(Difficulty::Advanced)));
        assert!(Difficulty::rank(Some(Difficulty::Advanced)) < Difficulty::rank(None));
        assert_eq!(Difficulty::all().len(), 3);
    }
}
