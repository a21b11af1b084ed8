// NLP metrics
//
// Purely computational metrics over (response, reference): n-gram overlap
// (BLEU, ROUGE), character n-gram F-score (chrF) and edit-distance string
// similarity. They run through the same protocol as the LLM-judge metrics
// (a single compute step) so reporters see one uniform event stream.

use std::collections::HashMap;

pub mod bleu;
pub mod chrf;
pub mod rouge;
pub mod string_similarity;

pub use bleu::{Bleu, BleuConfig};
pub use chrf::{Chrf, ChrfConfig};
pub use rouge::{Rouge, RougeConfig, RougeMeasure, RougeVariant};
pub use string_similarity::{StringSimilarity, StringSimilarityConfig, StringSimilarityVariant};

/// Lowercased whitespace tokenization shared by the n-gram metrics
pub(crate) fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Occurrence counts of the n-grams of a token sequence
pub(crate) fn ngram_counts(tokens: &[String], n: usize) -> HashMap<Vec<String>, usize> {
    let mut counts = HashMap::new();
    if n == 0 || tokens.len() < n {
        return counts;
    }
    for window in tokens.windows(n) {
        *counts.entry(window.to_vec()).or_insert(0) += 1;
    }
    counts
}

/// Clipped overlap between two n-gram count maps
pub(crate) fn clipped_overlap(
    candidate: &HashMap<Vec<String>, usize>,
    reference: &HashMap<Vec<String>, usize>,
) -> usize {
    candidate
        .iter()
        .map(|(gram, count)| (*count).min(reference.get(gram).copied().unwrap_or(0)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_lowercase_and_split() {
        assert_eq!(tokens("The  Cat sat"), vec!["the", "cat", "sat"]);
    }

    #[test]
    fn test_ngram_counts_bigrams() {
        let toks = tokens("a b a b");
        let counts = ngram_counts(&toks, 2);
        assert_eq!(counts.len(), 3);
        assert_eq!(counts[&vec!["a".to_string(), "b".to_string()]], 2);
    }

    #[test]
    fn test_clipped_overlap_clips_at_reference_count() {
        let cand = ngram_counts(&tokens("the the the"), 1);
        let reference = ngram_counts(&tokens("the cat"), 1);
        assert_eq!(clipped_overlap(&cand, &reference), 1);
    }
}
