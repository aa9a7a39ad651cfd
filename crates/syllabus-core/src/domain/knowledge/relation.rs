//! Typed, directed edges between concepts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A directed relation between two concepts
///
/// `(source, target, relation_type)` is unique in the graph; self-loops are
/// never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// ID of the source concept
    pub source_id: String,
    /// ID of the target concept
    pub target_id: String,
    /// Type of relation
    pub relation_type: RelationType,
    /// When the relation was created
    pub created_at: DateTime<Utc>,
}

impl Relation {
    /// Create a new relation between two concepts
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type,
            created_at: Utc::now(),
        }
    }

    /// Whether both endpoints are the same concept
    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }

    /// Identity triple of this relation
    pub fn key(&self) -> RelationKey {
        RelationKey {
            source_id: self.source_id.clone(),
            target_id: self.target_id.clone(),
            relation_type: self.relation_type,
        }
    }

    /// The endpoint opposite to `concept_id`, if it is an endpoint at all
    pub fn other_end(&self, concept_id: &str) -> Option<&str> {
        if self.source_id == concept_id {
            Some(&self.target_id)
        } else if self.target_id == concept_id {
            Some(&self.source_id)
        } else {
            None
        }
    }
}

/// Identity of a relation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationKey {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
}

/// Types of relations between concepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Source must be understood before target
    PrereqOf,
    /// Source is a kind of target
    IsA,
    /// Source is a component of target
    PartOf,
    /// Source is commonly contrasted with target
    ContrastsWith,
    /// Source and target sit at the same level under a shared parent
    Sibling,
}

impl RelationType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrereqOf => "prereq_of",
            Self::IsA => "is_a",
            Self::PartOf => "part_of",
            Self::ContrastsWith => "contrasts_with",
            Self::Sibling => "sibling",
        }
    }

    /// Parse from string (extractor output is usually upper snake case)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "prereq_of" | "prerequisite_of" | "prereq" => Some(Self::PrereqOf),
            "is_a" => Some(Self::IsA),
            "part_of" => Some(Self::PartOf),
            "contrasts_with" => Some(Self::ContrastsWith),
            "sibling" | "sibling_of" => Some(Self::Sibling),
            _ => None,
        }
    }

    /// Get all relation types
    pub fn all() -> &'static [RelationType] {
        &[
            Self::PrereqOf,
            Self::IsA,
            Self::PartOf,
            Self::ContrastsWith,
            Self::Sibling,
        ]
    }

    /// Human-readable phrase used when rendering context
    pub fn describe(&self) -> &'static str {
        match self {
            Self::PrereqOf => "is a prerequisite of",
            Self::IsA => "is a kind of",
            Self::PartOf => "is part of",
            Self::ContrastsWith => "contrasts with",
            Self::Sibling => "is a sibling of",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_creation() {
        let rel = Relation::new("a", "b", RelationType::PrereqOf);

        assert_eq!(rel.source_id, "a");
        assert_eq!(rel.target_id, "b");
        assert!(!rel.is_self_loop());
        assert!(Relation::new("a", "a", RelationType::IsA).is_self_loop());
    }

    #[test]
    fn test_other_end() {
        let rel = Relation::new("a", "b", RelationType::Sibling);
        assert_eq!(rel.other_end("a"), Some("b"));
        assert_eq!(rel.other_end("b"), Some("a"));
        assert_eq!(rel.other_end("c"), None);
    }

    #[test]
    fn test_key_ignores_timestamp() {
        let first = Relation::new("a", "b", RelationType::PartOf);
        let second = Relation::new("a", "b", RelationType::PartOf);
        assert_eq!(first.key(), second.key());
        assert_ne!(first.key(), Relation::new("a", "b", RelationType::IsA).key());
    }

    #[test]
    fn test_relation_type_parsing() {
        assert_eq!(RelationType::parse("PREREQ_OF"), Some(RelationType::PrereqOf));
        assert_eq!(RelationType::parse("is a"), Some(RelationType::IsA));
        assert_eq!(RelationType::parse("contrasts-with"), Some(RelationType::ContrastsWith));
        assert_eq!(RelationType::parse("SIBLING"), Some(RelationType::Sibling));
        assert_eq!(RelationType::parse("uses"), None);

        for ty in RelationType::all() {
            assert_eq!(RelationType::parse(ty.as_str()), Some(*ty));
        }
    }
}
