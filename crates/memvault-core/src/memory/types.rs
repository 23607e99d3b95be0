//! ============================================================================
//! Memory Types - Data structures for stored memories
//! ============================================================================
//! Defines memory ids, metadata records, search hits, conversation turns,
//! and extraction candidates.
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::{MemoryError, MemoryResult};

/// Category assigned when the caller does not supply one
pub const DEFAULT_CATEGORY: &str = "general";

/// Source assigned when the caller does not supply one
pub const DEFAULT_SOURCE: &str = "unknown";

/// Source recorded for memories stored by conversation extraction
pub const CONVERSATION_SOURCE: &str = "conversation";

/// Attribute holding the extractor's confidence for extracted memories
pub const ATTR_CONFIDENCE: &str = "confidence";

/// Attribute set to "true" on memories stored by conversation extraction
pub const ATTR_EXTRACTED: &str = "extracted";

/// Attribute keys written only by the service, never by callers
pub const RESERVED_ATTRIBUTES: &[&str] = &[ATTR_CONFIDENCE, ATTR_EXTRACTED];

/// Caller-supplied free-form metadata
pub type Attributes = BTreeMap<String, String>;

/// Reject attribute maps that touch a reserved key
pub fn validate_attributes(attributes: &Attributes) -> MemoryResult<()> {
    match attributes
        .keys()
        .find(|key| RESERVED_ATTRIBUTES.contains(&key.as_str()))
    {
        Some(key) => Err(MemoryError::ReservedAttribute(key.clone())),
        None => Ok(()),
    }
}

/// Stable, caller-facing identifier of a memory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Generate a fresh random id (122 bits of entropy)
    pub fn generate() -> Self {
        Self(format!("mem_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Metadata for one stored memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    /// The remembered text
    pub text: String,
    pub category: String,
    /// Where the memory came from (e.g. "conversation", "manual")
    pub source: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Attributes,
    /// Row of this memory's vector in the index; shifts when earlier rows are deleted
    pub slot: usize,
}

/// A memory returned from similarity search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub record: MemoryRecord,
    /// Cosine similarity to the query
    pub similarity: f32,
}

/// Store-level counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub count: usize,
    pub dimension: Option<usize>,
    pub categories: BTreeMap<String, usize>,
}

/// A single turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Role: "user" or "assistant"
    pub role: String,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Extractor's confidence that a candidate is worth remembering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    /// Only high and medium confidence candidates are stored
    pub fn is_persistable(&self) -> bool {
        matches!(self, Confidence::High | Confidence::Medium)
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            _ => Err(format!("Unknown confidence: {}", s)),
        }
    }
}

/// A memory proposed by the extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCandidate {
    pub text: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub confidence: Confidence,
}

impl MemoryCandidate {
    pub fn new(text: impl Into<String>, category: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            text: text.into(),
            category: category.into(),
            confidence,
        }
    }
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}
