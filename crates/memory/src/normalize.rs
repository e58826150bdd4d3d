//! Text normalization for instruction comparison.
//!
//! Produces a canonical comparison form of free text so that instructions
//! written differently but meaning the same thing compare equal-ish:
//!
//! 1. Unicode decomposition (NFD) and removal of combining marks, which
//!    strips Latin accents and Arabic harakat and splits hamza/madda off
//!    the alef variants
//! 2. Lowercasing
//! 3. Character-equivalence folding (see [`fold_char`])
//! 4. Whitespace collapse
//! 5. An ordered table of [`CanonicalRule`]s that rewrite common phrasal
//!    variants to one stem
//!
//! Normalization is total: text no rule recognizes passes through with only
//! the character-level folding applied.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Built-in canonicalization table, applied in order.
///
/// Patterns run against already-folded text, so they are written without
/// diacritics, with bare alef, `ه` for ta marbuta and `ي` for alef maqsura.
const DEFAULT_RULES: &[(&str, &str)] = &[
    // Politeness markers carry no instruction
    (r"\b(?:please|kindly)\b", ""),
    (r"\b(?:من فضلك|لو سمحت|رجاء)\b", ""),
    // Shorter
    (
        r"\b(?:make|keep) (?:it|this|the letter|the text|letters?) (?:a bit |much |more )?(?:shorter|short|brief|briefer|concise)\b",
        "make it shorter",
    ),
    (
        r"\b(?:shorten|condense|trim) (?:it|this|the letter|the text)\b",
        "make it shorter",
    ),
    (
        r"\b(?:اجعل|خلي|خل)(?:ه|ها)? ?(?:الخطاب|الرساله|النص)? ?(?:اكثر )?(?:مختصر|مختصرا|قصير|قصيرا|موجز|موجزا|اقصر)\b",
        "اختصر",
    ),
    (
        r"\b(?:اختصر|قصر)(?:ه|ها)?(?: (?:الخطاب|الرساله|النص))?\b",
        "اختصر",
    ),
    // Longer
    (
        r"\b(?:make|keep) (?:it|this|the letter|the text) (?:a bit |much )?(?:longer|more detailed|detailed)\b",
        "make it longer",
    ),
    (
        r"\b(?:expand|elaborate on) (?:it|this|the letter|the text)\b",
        "make it longer",
    ),
    (
        r"\b(?:اجعل|خلي|خل)(?:ه|ها)? ?(?:الخطاب|الرساله|النص)? ?(?:اطول|مفصل|مفصلا)\b",
        "اطل",
    ),
    // Formal
    (
        r"\b(?:make|keep) (?:it|this|the letter|the text) (?:more )?formal\b",
        "make it formal",
    ),
    (
        r"\b(?:use|write in|keep) (?:a )?(?:more )?formal (?:tone|language|style)\b",
        "make it formal",
    ),
    (r"\bbe more formal\b", "make it formal"),
    (
        r"\b(?:اجعل|خلي|خل)(?:ه|ها)? ?(?:الخطاب|الرساله|النص)? ?(?:اكثر )?(?:رسمي|رسميا|رسميه)\b",
        "رسمي",
    ),
];

static DEFAULT_COMPILED: LazyLock<Vec<CanonicalRule>> = LazyLock::new(|| {
    DEFAULT_RULES
        .iter()
        .filter_map(|(pattern, replacement)| match CanonicalRule::new(pattern, replacement) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(pattern, error = %e, "Skipping invalid canonical rule");
                None
            }
        })
        .collect()
});

/// One rewrite in the canonicalization table.
#[derive(Debug, Clone)]
pub struct CanonicalRule {
    pattern: Regex,
    replacement: String,
}

impl CanonicalRule {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    fn apply(&self, text: &str) -> Option<String> {
        if !self.pattern.is_match(text) {
            return None;
        }
        Some(
            self.pattern
                .replace_all(text, self.replacement.as_str())
                .into_owned(),
        )
    }
}

/// Canonicalizes free text for comparison.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    rules: Vec<CanonicalRule>,
}

impl TextNormalizer {
    /// A normalizer with a custom rule table (replaces the built-in one).
    pub fn with_rules(rules: Vec<CanonicalRule>) -> Self {
        Self { rules }
    }

    /// A normalizer that only does character-level folding.
    pub fn without_rules() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rules(&self) -> &[CanonicalRule] {
        &self.rules
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut folded = String::with_capacity(text.len());
        for c in text.nfd() {
            if is_combining_mark(c) {
                continue;
            }
            for lower in c.to_lowercase() {
                if let Some(f) = fold_char(lower) {
                    folded.push(f);
                }
            }
        }

        let mut out = collapse_whitespace(&folded);
        for rule in &self.rules {
            if let Some(rewritten) = rule.apply(&out) {
                out = rewritten;
            }
        }
        collapse_whitespace(&out)
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::with_rules(DEFAULT_COMPILED.clone())
    }
}

/// Normalize with the built-in rule table.
pub fn normalize(text: &str) -> String {
    static DEFAULT: LazyLock<TextNormalizer> = LazyLock::new(TextNormalizer::default);
    DEFAULT.normalize(text)
}

/// Character-equivalence classes. `None` drops the character.
fn fold_char(c: char) -> Option<char> {
    match c {
        // Alef maqsura and Farsi yeh fold to yeh
        'ى' | 'ی' => Some('ي'),
        // Keheh folds to kaf
        'ک' => Some('ك'),
        // Ta marbuta folds to heh
        'ة' => Some('ه'),
        // Tatweel and zero-width characters
        'ـ' | '\u{200B}'..='\u{200F}' | '\u{FEFF}' => None,
        // Arabic-Indic and Extended Arabic-Indic digits
        '\u{0660}'..='\u{0669}' => char::from_digit(c as u32 - 0x0660, 10),
        '\u{06F0}'..='\u{06F9}' => char::from_digit(c as u32 - 0x06F0, 10),
        // Apostrophes join the word they sit in
        '\'' | '\u{2019}' => None,
        '،' | '؛' | '؟' | '«' | '»' | '\u{2010}'..='\u{2027}' => Some(' '),
        c if c.is_ascii_punctuation() => Some(' '),
        c => Some(c),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtin_rules_compile() {
        assert_eq!(TextNormalizer::default().rules().len(), DEFAULT_RULES.len());
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(normalize("  hello \t  world \n"), "hello world");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn lowercases_and_strips_punctuation() {
        assert_eq!(normalize("Hello, World!"), "hello world");
        assert_eq!(normalize("don't"), "dont");
    }

    #[test]
    fn strips_latin_accents() {
        assert_eq!(normalize("Café résumé"), "cafe resume");
    }

    #[test]
    fn strips_arabic_harakat() {
        assert_eq!(normalize("مُخْتَصَر"), "مختصر");
    }

    #[test]
    fn folds_arabic_letter_variants() {
        assert_eq!(normalize("أكتب"), "اكتب");
        assert_eq!(normalize("إلى"), "الي");
        assert_eq!(normalize("آخر"), "اخر");
        assert_eq!(normalize("رسالة"), "رساله");
        assert_eq!(normalize("مـــختصر"), "مختصر");
    }

    #[test]
    fn folds_eastern_digits() {
        assert_eq!(normalize("عام ٢٠٢٦"), "عام 2026");
        assert_eq!(normalize("۱۲"), "12");
    }

    #[test]
    fn english_variants_share_a_stem() {
        assert_eq!(normalize("Please keep it brief."), "make it shorter");
        assert_eq!(normalize("Make the letter more concise"), "make it shorter");
        assert_eq!(normalize("shorten it"), "make it shorter");
        assert_eq!(normalize("Use a formal tone"), "make it formal");
    }

    #[test]
    fn arabic_variants_share_a_stem() {
        assert_eq!(normalize("اجعل الخطاب مختصر"), "اختصر");
        assert_eq!(normalize("اجعلْه مختصراً من فضلك"), "اختصر");
        assert_eq!(normalize("اختصر الرسالة"), "اختصر");
    }

    #[test]
    fn unrecognized_text_passes_through() {
        assert_eq!(normalize("sign with my full title"), "sign with my full title");
        assert_eq!(normalize("اكتب خطابات مختصرة"), "اكتب خطابات مختصره");
    }

    #[test]
    fn custom_rule_table_replaces_builtin() {
        let normalizer =
            TextNormalizer::with_rules(vec![CanonicalRule::new(r"\bcolour\b", "color").unwrap()]);
        assert_eq!(normalizer.normalize("Colour scheme"), "color scheme");
        // Built-in rules no longer apply
        assert_eq!(normalizer.normalize("keep it brief"), "keep it brief");
    }

    #[test]
    fn invalid_rule_is_rejected() {
        assert!(CanonicalRule::new("(unclosed", "x").is_err());
    }

    #[test]
    fn normalization_is_idempotent() {
        for text in ["Please keep it brief.", "اجعل الخطاب مختصر", "Café, au lait!"] {
            let once = normalize(text);
            assert_eq!(normalize(&once), once);
        }
    }
}
