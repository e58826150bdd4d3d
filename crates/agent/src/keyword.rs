//! Offline instruction extractor driven by trigger keywords.
//!
//! A message is taken as an instruction when it contains one of the trigger
//! phrases below; the first matching row decides the category and the
//! message itself becomes the instruction text. Rows are checked in order,
//! so the more specific categories come first.

use std::sync::LazyLock;

use async_trait::async_trait;
use qalam_core::error::ExtractionError;
use qalam_core::instruction::{Category, ExtractedInstruction, InstructionExtractor};
use regex::Regex;
use tracing::warn;

const DEFAULT_TRIGGERS: &[(&str, Category)] = &[
    (
        r"(?i)\b(?:bullet|bullets|heading|headings|paragraph|paragraphs|signature|sign with|sign off|date at the top|layout|format)\b",
        Category::Format,
    ),
    (r"(?:تنسيق|فقره|فقرة|فقرات|عنوان|توقيع|وقع باسم|التاريخ)", Category::Format),
    (
        r"(?i)\b(?:formal|informal|polite|friendly|warm|tone|respectful|firm)\b",
        Category::Tone,
    ),
    (r"(?:رسمي|رسميه|رسمية|ودي|لطيف|نبره|نبرة|لهجه|لهجة|بلطف|بحزم)", Category::Tone),
    (
        r"(?i)\b(?:shorter|longer|brief|concise|detailed|wordy|simpler|style|shorten|expand)\b",
        Category::Style,
    ),
    (r"(?:مختصر|مختصره|مختصرة|اختصر|قصير|اقصر|أقصر|اطول|أطول|مفصل|اسلوب|أسلوب|ببساطه|ببساطة)", Category::Style),
    (
        r"(?i)\b(?:mention|include|add|remove|omit|leave out|reference)\b",
        Category::Content,
    ),
    (r"(?:اذكر|أذكر|اضف|أضف|احذف|لا تذكر|ضمن)", Category::Content),
    (r"(?i)\b(?:always|never|prefer|from now on)\b", Category::General),
    (r"(?:دائما|دائماً|ابدا|أبدا|أبداً|من الآن)", Category::General),
];

static DEFAULT_COMPILED: LazyLock<Vec<(Regex, Category)>> = LazyLock::new(|| {
    DEFAULT_TRIGGERS
        .iter()
        .filter_map(|(pattern, category)| match Regex::new(pattern) {
            Ok(re) => Some((re, *category)),
            Err(e) => {
                warn!(pattern, error = %e, "Skipping invalid trigger pattern");
                None
            }
        })
        .collect()
});

/// Classifies messages by trigger phrase. Needs no network or model.
pub struct KeywordExtractor {
    triggers: Vec<(Regex, Category)>,
}

impl KeywordExtractor {
    pub fn new() -> Self {
        Self {
            triggers: DEFAULT_COMPILED.clone(),
        }
    }

    /// Use a custom trigger table instead of the built-in one.
    pub fn with_triggers(triggers: Vec<(Regex, Category)>) -> Self {
        Self { triggers }
    }

    /// Category of the first trigger found in `text`.
    pub fn classify(&self, text: &str) -> Option<Category> {
        self.triggers
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, category)| *category)
    }
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstructionExtractor for KeywordExtractor {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn extract(
        &self,
        message_text: &str,
        _conversation_context: &str,
    ) -> Result<Option<ExtractedInstruction>, ExtractionError> {
        let text = message_text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        Ok(self
            .classify(text)
            .map(|category| ExtractedInstruction::new(category.as_str(), text)))
    }
}
