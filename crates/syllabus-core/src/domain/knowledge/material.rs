//! Resources and examples attached to concepts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::concept::normalize_name;

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

/// A course resource (page, PDF, video) documenting one or more concepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Stable identifier derived from the URL
    pub id: String,
    pub url: String,
    /// Optional type such as `webpage`, `pdf` or `video`
    pub resource_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    /// Create a resource for a URL
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into().trim().to_string();
        Self {
            id: Self::id_for_url(&url),
            url,
            resource_type: None,
            created_at: Utc::now(),
        }
    }

    /// Set the resource type
    pub fn with_type(mut self, resource_type: impl Into<String>) -> Self {
        let resource_type = resource_type.into().trim().to_lowercase();
        if !resource_type.is_empty() {
            self.resource_type = Some(resource_type);
        }
        self
    }

    /// Stable identifier for a URL
    pub fn id_for_url(url: &str) -> String {
        format!("res-{}", short_hash(url.trim()))
    }
}

/// Link between a resource and a concept it documents
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceLink {
    pub resource_id: String,
    pub concept_id: String,
}

impl ResourceLink {
    pub fn new(resource_id: impl Into<String>, concept_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            concept_id: concept_id.into(),
        }
    }
}

/// A worked example illustrating exactly one concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Content hash of (concept id, normalized text)
    pub id: String,
    pub concept_id: String,
    pub text: String,
    pub example_type: ExampleType,
    /// Page the example was extracted from
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Example {
    /// Create a new example for a concept
    pub fn new(concept_id: impl Into<String>, text: impl Into<String>, example_type: ExampleType) -> Self {
        let concept_id = concept_id.into();
        let text = text.into().trim().to_string();
        Self {
            id: Self::id_for(&concept_id, &text),
            concept_id,
            text,
            example_type,
            source_url: None,
            created_at: Utc::now(),
        }
    }

    /// Set the source URL
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Stable identifier: the same text re-extracted for the same concept collapses
    pub fn id_for(concept_id: &str, text: &str) -> String {
        format!("ex-{}", short_hash(&format!("{}\n{}", concept_id, normalize_name(text))))
    }
}

/// Types of examples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleType {
    Code,
    Math,
    CaseStudy,
    Walkthrough,
    Diagram,
}

impl ExampleType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Math => "math",
            Self::CaseStudy => "case_study",
            Self::Walkthrough => "walkthrough",
            Self::Diagram => "diagram",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "code" => Some(Self::Code),
            "math" | "equation" => Some(Self::Math),
            "case_study" => Some(Self::CaseStudy),
            "walkthrough" => Some(Self::Walkthrough),
            "diagram" => Some(Self::Diagram),
            _ => None,
        }
    }

    /// Get all example types
    pub fn all() -> &'static [ExampleType] {
        &[
            Self::Code,
            Self::Math,
            Self::CaseStudy,
            Self::Walkthrough,
            Self::Diagram,
        ]
    }
}

impl std::fmt::Display for ExampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
