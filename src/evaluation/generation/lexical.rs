//! Fuzzy token alignment between a generated answer and its ground truth
//!
//! Tokens that appear verbatim on both sides match outright. Every other token is
//! compared against the unmatched tokens of the opposite side by normalized
//! Levenshtein similarity, and counts as matched when its best score reaches an
//! adaptive threshold driven by the sentence-level similarity hint.

use std::collections::HashSet;

use super::tokenize;

/// Lower bound of the adaptive fuzzy-match threshold
pub const MIN_FUZZY_THRESHOLD: f64 = 0.7;
/// Upper bound of the adaptive fuzzy-match threshold
pub const MAX_FUZZY_THRESHOLD: f64 = 0.8;

/// Token-level precision and recall for one (generated, ground truth) pair
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct MatchResult {
    /// Fraction of generated tokens matched in the ground truth
    pub precision: f64,
    /// Fraction of ground-truth tokens matched in the generated answer
    pub recall: f64,
}

impl MatchResult {
    pub fn new(precision: f64, recall: f64) -> Self {
        Self { precision, recall }
    }
}

/// Threshold a fuzzy score must reach, given the pair's overall similarity
///
/// `clamp(0.7 + hint * 0.1, 0.7, 0.8)`
pub fn adaptive_threshold(similarity_hint: f64) -> f64 {
    let raw = MIN_FUZZY_THRESHOLD + similarity_hint * 0.1;
    if raw.is_nan() {
        return MIN_FUZZY_THRESHOLD;
    }
    raw.clamp(MIN_FUZZY_THRESHOLD, MAX_FUZZY_THRESHOLD)
}

/// Match two texts token by token
///
/// Edge cases are resolved before any alignment work:
/// both empty gives `(1, 1)`, only the generated side empty gives `(1, 0)` and
/// only the ground truth empty gives `(0, 1)`.
pub fn lexical_match(generated: &str, ground_truth: &str, similarity_hint: f64) -> MatchResult {
    let gen_tokens = tokenize(generated);
    let truth_tokens = tokenize(ground_truth);
    match_tokens(&gen_tokens, &truth_tokens, similarity_hint)
}

/// Match two already tokenized sequences
pub fn match_tokens(
    gen_tokens: &[String],
    truth_tokens: &[String],
    similarity_hint: f64,
) -> MatchResult {
    match (gen_tokens.is_empty(), truth_tokens.is_empty()) {
        (true, true) => return MatchResult::new(1.0, 1.0),
        (true, false) => return MatchResult::new(1.0, 0.0),
        (false, true) => return MatchResult::new(0.0, 1.0),
        (false, false) => {}
    }

    // Truth tokens present verbatim anywhere in the generated sequence
    let gen_set: HashSet<&str> = gen_tokens.iter().map(String::as_str).collect();
    let exact: HashSet<&str> = truth_tokens
        .iter()
        .map(String::as_str)
        .filter(|t| gen_set.contains(t))
        .collect();

    let threshold = adaptive_threshold(similarity_hint);

    let gen_matches = count_matches(gen_tokens, truth_tokens, &exact, threshold);
    let truth_matches = count_matches(truth_tokens, gen_tokens, &exact, threshold);

    MatchResult {
        precision: gen_matches as f64 / gen_tokens.len() as f64,
        recall: truth_matches as f64 / truth_tokens.len() as f64,
    }
}

/// Count tokens of `side` that match either exactly or fuzzily against `other`
fn count_matches(
    side: &[String],
    other: &[String],
    exact: &HashSet<&str>,
    threshold: f64,
) -> usize {
    side.iter()
        .filter(|token| {
            if exact.contains(token.as_str()) {
                return true;
            }

            let best = other
                .iter()
                .filter(|candidate| !exact.contains(candidate.as_str()))
                .map(|candidate| normalized_levenshtein(token, candidate))
                .fold(0.0_f64, f64::max);

            best >= threshold
        })
        .count()
}

/// Character-level edit distance (insertions, deletions, substitutions)
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Single rolling row over `b`
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut diagonal = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let above = row[j];
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            row[j] = (row[j] + 1).min(row[j - 1] + 1).min(diagonal + cost);
            diagonal = above;
        }
    }

    row[b.len()]
}

/// `1 - distance / max(len)`, or 1 when both strings are empty
pub fn normalized_levenshtein(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / max_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts_match_fully() {
        for text in ["Paris", "the cat sat on the mat", "May 7, 2023", "a a a b"] {
            for hint in [0.0, 0.5, 1.0] {
                let result = lexical_match(text, text, hint);
                assert_eq!(result, MatchResult::new(1.0, 1.0), "{text} @ {hint}");
            }
        }
    }

    #[test]
    fn test_empty_edge_cases() {
        assert_eq!(lexical_match("", "", 0.3), MatchResult::new(1.0, 1.0));
        assert_eq!(lexical_match("", "x", 0.3), MatchResult::new(1.0, 0.0));
        assert_eq!(lexical_match("x", "", 0.3), MatchResult::new(0.0, 1.0));
        // Whitespace-only texts tokenize to nothing
        assert_eq!(lexical_match("   ", "\t\n", 0.0), MatchResult::new(1.0, 1.0));
    }

    #[test]
    fn test_case_insensitive_exact_match() {
        let result = lexical_match("PARIS", "paris", 0.0);
        assert_eq!(result, MatchResult::new(1.0, 1.0));
    }

    #[test]
    fn test_partial_overlap() {
        // "the" and "cat" match exactly, "dog" vs "sat" shares no characters
        let result = lexical_match("the cat dog", "the cat sat", 0.0);
        assert!((result.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((result.recall - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_fuzzy_match_above_threshold() {
        // "colour" vs "color": distance 1 over 6 chars -> 0.833
        let result = lexical_match("colour", "color", 0.0);
        assert_eq!(result, MatchResult::new(1.0, 1.0));
    }

    #[test]
    fn test_fuzzy_match_depends_on_hint() {
        // "tuesday" vs "tusday": distance 1 over 7 -> 0.857, above both bounds
        assert_eq!(lexical_match("tuesday", "tusday", 1.0).precision, 1.0);

        // "planet" vs "plane": distance 1 over 6 -> 0.833 still clears 0.8
        assert_eq!(lexical_match("planet", "plane", 1.0).precision, 1.0);

        // "abcd" vs "abcx": distance 1 over 4 -> 0.75, between the two bounds
        assert_eq!(lexical_match("abcd", "abcx", 0.0).precision, 1.0);
        assert_eq!(lexical_match("abcd", "abcx", 1.0).precision, 0.0);
        assert_eq!(lexical_match("abcd", "abcx", 1.0).recall, 0.0);
    }

    #[test]
    fn test_exact_tokens_excluded_from_fuzzy_candidates() {
        // "cats" would fuzzily match "cat", but "cat" is already an exact match
        // on both sides, so it is not available as a candidate for "cats".
        let result = lexical_match("cat cats", "cat", 0.0);
        assert!((result.precision - 0.5).abs() < 1e-9);
        assert_eq!(result.recall, 1.0);
    }

    #[test]
    fn test_adaptive_threshold_clamped() {
        assert!((adaptive_threshold(0.0) - 0.7).abs() < 1e-12);
        assert!((adaptive_threshold(0.5) - 0.75).abs() < 1e-12);
        assert!((adaptive_threshold(1.0) - 0.8).abs() < 1e-12);
        assert!((adaptive_threshold(5.0) - 0.8).abs() < 1e-12);
        assert!((adaptive_threshold(-3.0) - 0.7).abs() < 1e-12);
        assert!((adaptive_threshold(f64::NAN) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("flaw", "lawn"), 2);
        assert_eq!(levenshtein_distance("same", "same"), 0);
    }

    #[test]
    fn test_normalized_levenshtein() {
        assert_eq!(normalized_levenshtein("", ""), 1.0);
        assert_eq!(normalized_levenshtein("abc", "abc"), 1.0);
        assert_eq!(normalized_levenshtein("abc", "xyz"), 0.0);
        assert!((normalized_levenshtein("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-12);
    }
}
