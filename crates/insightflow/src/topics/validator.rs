use crate::similarity::Similarity;
use std::sync::Arc;
use thiserror::Error;

pub const MIN_TOPIC_CHARS: usize = 2;

const BLOCKED_TOPICS: &[&str] = &[
    "asdf", "qwerty", "xxx", "xxxx", "test", "demo", "example", "fuck", "shit",
];

const VAGUE_WORDS: &[&str] = &[
    "stuff", "things", "content", "random", "misc", "various", "general",
];

const QUESTION_PREFIXES: &[&str] = &["how ", "what ", "why ", "when ", "where "];

/// Short topics are only accepted when they are one of these.
const KNOWN_ACRONYMS: &[&str] = &[
    "ai", "ml", "nlp", "llm", "slm", "gpt", "saas", "paas", "iaas", "b2b", "b2c", "d2c", "seo",
    "sem", "cro", "hr", "pr", "ar", "vr", "xr", "ios", "api", "sdk", "cli", "web3", "defi", "nft",
    "dao", "vc", "pe", "ipo", "roi", "ui", "ux",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("topic is empty")]
    Empty,
    #[error("topic is too short (minimum {min} characters)")]
    TooShort { min: usize },
    #[error("topic is too long ({len} characters, maximum {max})")]
    TooLong { len: usize, max: usize },
    #[error("topic contains a control character (U+{0:04X})")]
    ControlCharacter(u32),
    #[error("topic contains '{0}'; only letters, numbers, spaces, hyphens, apostrophes and '&' are allowed")]
    DisallowedCharacter(char),
    #[error("topic cannot be only numbers")]
    NumericOnly,
    #[error("'{0}' is a placeholder, not a topic")]
    Placeholder(String),
    #[error("'{0}' is too short to be a topic unless it is a known acronym")]
    UnknownAcronym(String),
    #[error("topic is too vague: '{0}'")]
    Vague(String),
    #[error("topics should be phrases, not questions")]
    Question,
    #[error("topic needs at least one word of 3 or more characters")]
    NoSubstantialWord,
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub max_chars: usize,
    /// A request collapses onto an existing topic only when it scores strictly
    /// above this.
    pub similarity_threshold: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_chars: 50,
            similarity_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub canonical_key: String,
    /// The request as it is stored and handed to the fetcher: trimmed, runs of
    /// whitespace replaced by one space, case kept.
    pub display: String,
    /// Present when the request was folded into a different registered topic.
    pub collapsed: Option<Collapsed>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collapsed {
    pub requested: String,
    pub score: f64,
}

/// Trim and collapse internal whitespace, keeping case.
pub fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim, collapse internal whitespace, lowercase.
pub fn normalize(raw: &str) -> String {
    collapse_whitespace(raw).to_lowercase()
}

/// Rule checks only; returns the normalized form. Lengths are measured on the
/// trimmed input, before whitespace is collapsed.
pub fn check(raw: &str, max_chars: usize) -> Result<String, RejectionReason> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RejectionReason::Empty);
    }

    if let Some(c) = trimmed
        .chars()
        .find(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        return Err(RejectionReason::ControlCharacter(c as u32));
    }

    let len = trimmed.chars().count();
    if len < MIN_TOPIC_CHARS {
        return Err(RejectionReason::TooShort {
            min: MIN_TOPIC_CHARS,
        });
    }
    if len > max_chars {
        return Err(RejectionReason::TooLong {
            len,
            max: max_chars,
        });
    }

    if let Some(c) = trimmed.chars().find(|c| {
        !(c.is_ascii_alphanumeric() || c.is_ascii_whitespace() || matches!(c, '-' | '\'' | '&'))
    }) {
        return Err(RejectionReason::DisallowedCharacter(c));
    }

    let normalized = normalize(trimmed);

    if BLOCKED_TOPICS.contains(&normalized.as_str()) {
        return Err(RejectionReason::Placeholder(normalized));
    }

    let numeric_only = normalized
        .chars()
        .all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
        && normalized.chars().any(|c| c.is_ascii_digit());
    if numeric_only {
        return Err(RejectionReason::NumericOnly);
    }

    let words: Vec<&str> = normalized.split(' ').collect();
    let is_acronym = KNOWN_ACRONYMS.contains(&normalized.as_str());

    if words.len() == 1 && normalized.len() <= 4 && !is_acronym {
        return Err(RejectionReason::UnknownAcronym(normalized));
    }

    if let Some(vague) = words.iter().find(|w| VAGUE_WORDS.contains(*w)) {
        return Err(RejectionReason::Vague(vague.to_string()));
    }

    if QUESTION_PREFIXES.iter().any(|p| normalized.starts_with(*p)) {
        return Err(RejectionReason::Question);
    }

    if !is_acronym && !words.iter().any(|w| w.len() >= 3) {
        return Err(RejectionReason::NoSubstantialWord);
    }

    Ok(normalized)
}

#[derive(Clone)]
pub struct TopicValidator {
    cfg: ValidatorConfig,
    similarity: Arc<dyn Similarity>,
}

impl TopicValidator {
    pub fn new(cfg: ValidatorConfig, similarity: Arc<dyn Similarity>) -> Self {
        Self { cfg, similarity }
    }

    /// Validate `raw` and resolve its canonical key against `existing`
    /// registered keys. Pure: the caller decides what to do with the result.
    pub fn validate(&self, raw: &str, existing: &[String]) -> Result<Validated, RejectionReason> {
        let normalized = check(raw, self.cfg.max_chars)?;
        let (canonical_key, collapsed) = self.resolve(normalized, existing);
        Ok(Validated {
            canonical_key,
            display: collapse_whitespace(raw),
            collapsed,
        })
    }

    /// The registered key `normalized` should use, and the collapse that led
    /// there if it is not `normalized` itself.
    pub(crate) fn resolve(
        &self,
        normalized: String,
        existing: &[String],
    ) -> (String, Option<Collapsed>) {
        if existing.iter().any(|k| *k == normalized) {
            return (normalized, None);
        }

        let best = existing
            .iter()
            .map(|k| (k, self.similarity.similarity(&normalized, k)))
            .filter(|(_, score)| *score > self.cfg.similarity_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((key, score)) => (
                key.clone(),
                Some(Collapsed {
                    requested: normalized,
                    score,
                }),
            ),
            None => (normalized, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::LexicalSimilarity;

    fn validator() -> TopicValidator {
        TopicValidator::new(ValidatorConfig::default(), Arc::new(LexicalSimilarity::new()))
    }

    #[test]
    fn normalizes_whitespace_and_case() {
        assert_eq!(normalize("  Rust   Async\tRuntime "), "rust async runtime");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(check("   ", 50), Err(RejectionReason::Empty));
        assert_eq!(check("a", 50), Err(RejectionReason::TooShort { min: 2 }));
        assert_eq!(check("2024", 50), Err(RejectionReason::NumericOnly));
        assert_eq!(check("12 - 34", 50), Err(RejectionReason::NumericOnly));
        assert_eq!(
            check("  ASDF ", 50),
            Err(RejectionReason::Placeholder("asdf".into()))
        );
        assert_eq!(
            check("rust\u{0007}lang", 50),
            Err(RejectionReason::ControlCharacter(7))
        );
        assert!(matches!(
            check(&"x".repeat(51), 50),
            Err(RejectionReason::TooLong { len: 51, max: 50 })
        ));
    }

    #[test]
    fn tabs_and_newlines_are_whitespace_not_control() {
        assert_eq!(check("rust\tasync\n", 50).unwrap(), "rust async");
    }

    #[test]
    fn length_counts_the_input_not_the_collapsed_form() {
        let padded = format!("rust{}async", " ".repeat(100));
        assert_eq!(
            check(&padded, 50),
            Err(RejectionReason::TooLong { len: 109, max: 50 })
        );
        assert_eq!(check("  rust async  ", 10).unwrap(), "rust async");
    }

    #[test]
    fn only_plain_characters_are_allowed() {
        assert_eq!(
            check("rust/async", 50),
            Err(RejectionReason::DisallowedCharacter('/'))
        );
        assert_eq!(
            check("café culture", 50),
            Err(RejectionReason::DisallowedCharacter('é'))
        );
        assert_eq!(check("Q&A platforms", 50).unwrap(), "q&a platforms");
        assert_eq!(check("women's football", 50).unwrap(), "women's football");
        assert_eq!(check("real-time systems", 50).unwrap(), "real-time systems");
    }

    #[test]
    fn short_single_words_must_be_known_acronyms() {
        assert_eq!(check("AI", 50).unwrap(), "ai");
        assert_eq!(check("SaaS", 50).unwrap(), "saas");
        assert_eq!(
            check("zq", 50),
            Err(RejectionReason::UnknownAcronym("zq".into()))
        );
        assert_eq!(
            check("blah", 50),
            Err(RejectionReason::UnknownAcronym("blah".into()))
        );
        assert_eq!(check("chess", 50).unwrap(), "chess");
    }

    #[test]
    fn vague_words_are_rejected() {
        assert_eq!(
            check("random stuff", 50),
            Err(RejectionReason::Vague("random".into()))
        );
        assert_eq!(
            check("General Knowledge", 50),
            Err(RejectionReason::Vague("general".into()))
        );
        assert_eq!(
            check("contentious debates", 50).unwrap(),
            "contentious debates"
        );
    }

    #[test]
    fn questions_are_rejected() {
        assert_eq!(check("How to bake bread", 50), Err(RejectionReason::Question));
        assert_eq!(check("what\tis rust", 50), Err(RejectionReason::Question));
        assert_eq!(check("whatsapp marketing", 50).unwrap(), "whatsapp marketing");
    }

    #[test]
    fn needs_one_substantial_word() {
        assert_eq!(check("ab cd", 50), Err(RejectionReason::NoSubstantialWord));
        assert_eq!(check("AI in F1", 50), Err(RejectionReason::NoSubstantialWord));
        assert_eq!(check("AI in medicine", 50).unwrap(), "ai in medicine");
    }

    #[test]
    fn digits_inside_words_are_fine() {
        assert_eq!(check("web3", 50).unwrap(), "web3");
        assert_eq!(check("F1 racing", 50).unwrap(), "f1 racing");
    }

    #[test]
    fn collapses_near_duplicate_onto_existing_key() {
        let v = validator();
        let existing = vec!["rust async runtime".to_string(), "gardening".to_string()];

        let out = v.validate("Rust  async runtimes", &existing).unwrap();
        assert_eq!(out.canonical_key, "rust async runtime");
        assert_eq!(out.display, "Rust async runtimes");
        let collapsed = out.collapsed.unwrap();
        assert_eq!(collapsed.requested, "rust async runtimes");
        assert!(collapsed.score > 0.85);
    }

    #[test]
    fn exact_match_is_not_reported_as_collapse() {
        let v = validator();
        let existing = vec!["gardening".to_string()];
        let out = v.validate(" Gardening ", &existing).unwrap();
        assert_eq!(out.canonical_key, "gardening");
        assert!(out.collapsed.is_none());
    }

    #[test]
    fn unrelated_topic_mints_new_key() {
        let v = validator();
        let existing = vec!["gardening".to_string()];
        let out = v.validate("Formula One", &existing).unwrap();
        assert_eq!(out.canonical_key, "formula one");
        assert!(out.collapsed.is_none());
    }
}
