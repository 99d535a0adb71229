//! Text similarity used for topic collapse and content dedup.
//!
//! The engine is a trait object so the queue and the pipeline can be handed a
//! different scorer (an embedding model, say) without either of them changing.

use std::collections::BTreeMap;

/// Scores two strings in `[0, 1]`. Implementations must be symmetric and
/// deterministic; identical inputs score `1.0`.
pub trait Similarity: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Cosine similarity over lowercased word tokens plus padded character
/// trigrams of each word. Trigrams make plurals and small spelling variants
/// land close together ("runtime" vs "runtimes"), word tokens keep unrelated
/// strings that share a few letters apart.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalSimilarity;

impl LexicalSimilarity {
    pub fn new() -> Self {
        Self
    }

    fn features(text: &str) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            *out.entry(format!("w:{word}")).or_insert(0.0) += 1.0;

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                *out.entry(format!("t:{gram}")).or_insert(0.0) += 1.0;
            }
        }

        out
    }
}

impl Similarity for LexicalSimilarity {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }

        let fa = Self::features(a);
        let fb = Self::features(b);
        if fa.is_empty() || fb.is_empty() {
            return 0.0;
        }
        if fa == fb {
            return 1.0;
        }

        // BTreeMap iteration is key-ordered, so the dot product sums the same
        // terms in the same order whichever argument comes first.
        let dot: f64 = fa
            .iter()
            .filter_map(|(k, va)| fb.get(k).map(|vb| va * vb))
            .sum();
        let norm_a = fa.values().map(|v| v * v).sum::<f64>().sqrt();
        let norm_b = fb.values().map(|v| v * v).sum::<f64>().sqrt();

        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_and_case_variants_score_one() {
        let s = LexicalSimilarity::new();
        assert_eq!(s.similarity("rust async", "rust async"), 1.0);
        assert_eq!(s.similarity("Rust  Async", "rust async"), 1.0);
    }

    #[test]
    fn plural_variant_is_close() {
        let s = LexicalSimilarity::new();
        let score = s.similarity("rust async runtime", "rust async runtimes");
        assert!(score > 0.85, "score was {score}");
    }

    #[test]
    fn unrelated_strings_score_near_zero() {
        let s = LexicalSimilarity::new();
        assert_eq!(s.similarity("rust", "gardening"), 0.0);
        assert!(s.similarity("sourdough baking", "marathon training") < 0.2);
    }

    #[test]
    fn symmetric() {
        let s = LexicalSimilarity::new();
        let pairs = [
            ("machine learning", "machine learning papers"),
            ("climate policy news", "climate news"),
        ];
        for (a, b) in pairs {
            assert_eq!(s.similarity(a, b), s.similarity(b, a));
        }
    }

    #[test]
    fn empty_input_scores_zero_against_text() {
        let s = LexicalSimilarity::new();
        assert_eq!(s.similarity("", "rust"), 0.0);
        assert_eq!(s.similarity("---", "rust"), 0.0);
    }
}
