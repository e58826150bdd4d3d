//! Instruction records and the traits around them.
//!
//! An instruction is a reusable free-text preference learned from a
//! conversation ("keep letters short", "always sign with the full title").
//! Records are grouped by a small closed set of categories and deduplicated
//! by fuzzy similarity inside each category.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExtractionError, InstructionError, StorageError};

/// The closed set of instruction categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Length, wording, phrasing
    Style,
    /// Layout, headers, signatures
    Format,
    /// What the letter must or must not contain
    Content,
    /// Formality and register
    Tone,
    /// Anything that fits nowhere else
    General,
}

impl Category {
    /// Every category, in display order.
    pub const ALL: [Category; 5] = [
        Category::Style,
        Category::Format,
        Category::Content,
        Category::Tone,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Style => "style",
            Category::Format => "format",
            Category::Content => "content",
            Category::Tone => "tone",
            Category::General => "general",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = InstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| InstructionError::Validation(format!("unknown category '{}'", s.trim())))
    }
}

/// A deduplicated instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionRecord {
    pub id: String,

    /// Human-readable text, shown in prompts
    pub raw_text: String,

    /// Comparison form only, never shown to users
    pub normalized_text: String,

    pub category: Category,

    /// Times this instruction was matched again or applied
    pub usage_count: u64,

    pub created_at: DateTime<Utc>,

    pub last_used_at: DateTime<Utc>,

    /// Soft-delete flag
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// On-disk snapshot of an instruction store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub records: Vec<InstructionRecord>,
}

impl InstructionSnapshot {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(records: Vec<InstructionRecord>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            saved_at: Utc::now(),
            records,
        }
    }
}

/// Persistence for instruction records.
///
/// Implementations: JSON file, in-memory (for testing), none (no-op).
#[async_trait]
pub trait InstructionBackend: Send + Sync {
    /// The backend name (e.g., "file", "memory", "none").
    fn name(&self) -> &str;

    /// Load every persisted record. An absent store yields an empty list.
    async fn load(&self) -> Result<Vec<InstructionRecord>, StorageError>;

    /// Replace the persisted state with `records`.
    async fn save(&self, records: &[InstructionRecord]) -> Result<(), StorageError>;
}

/// What an extractor found in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedInstruction {
    /// Category tag as produced by the collaborator, validated by the store
    pub category: String,
    pub text: String,
}

impl ExtractedInstruction {
    pub fn new(category: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            text: text.into(),
        }
    }
}

/// The opaque text-to-instruction collaborator.
///
/// Typically backed by a generative model; the core only relies on this
/// signature and bounds every call with a timeout.
#[async_trait]
pub trait InstructionExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        message_text: &str,
        conversation_context: &str,
    ) -> Result<Option<ExtractedInstruction>, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_known_tags() {
        assert_eq!("style".parse::<Category>().unwrap(), Category::Style);
        assert_eq!(" Tone ".parse::<Category>().unwrap(), Category::Tone);
    }

    #[test]
    fn malformed_category_is_a_validation_error() {
        let err = "poetry".parse::<Category>().unwrap_err();
        assert!(matches!(err, InstructionError::Validation(_)));
        assert!(err.to_string().contains("poetry"));
    }

    #[test]
    fn record_defaults_to_active_when_flag_missing() {
        let json = r#"{
            "id": "r1",
            "raw_text": "Keep it short",
            "normalized_text": "make it shorter",
            "category": "style",
            "usage_count": 3,
            "created_at": "2026-01-01T00:00:00Z",
            "last_used_at": "2026-01-02T00:00:00Z"
        }"#;
        let record: InstructionRecord = serde_json::from_str(json).unwrap();
        assert!(record.active);
        assert_eq!(record.category, Category::Style);
    }

    #[test]
    fn snapshot_carries_version() {
        let snap = InstructionSnapshot::new(vec![]);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"version\":1"));
    }
}
