//! Relevance scoring for operation search
//!
//! Scoring is a plain additive formula over case-insensitive substring hits:
//!
//! | Signal | Points |
//! |---|---|
//! | name contains query | `name_match` (10) |
//! | description contains query | `description_match` (5) |
//! | each keyword containing query | `keyword_match` (3) |
//! | usage frequency | `usage_bonus` × invocations (0.5) |
//!
//! The usage bonus only applies to operations that already match textually,
//! so popularity can reorder matches but never turns a non-match into one.

use serde::{Deserialize, Serialize};

use crate::descriptor::OperationDescriptor;

/// Tunable weights for [`score`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Points when the operation name contains the query
    pub name_match: f64,
    /// Points when the description contains the query
    pub description_match: f64,
    /// Points per keyword containing the query
    pub keyword_match: f64,
    /// Points per recorded invocation
    pub usage_bonus: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            name_match: 10.0,
            description_match: 5.0,
            keyword_match: 3.0,
            usage_bonus: 0.5,
        }
    }
}

/// A ranked candidate with its score
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<T> {
    /// The candidate
    pub item: T,
    /// Relevance score (> 0)
    pub score: f64,
}

/// Normalize a free-text query: trimmed and lowercased.
///
/// Returns `None` for an absent or blank query.
#[must_use]
pub fn normalize_query(query: Option<&str>) -> Option<String> {
    query
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_lowercase)
}

/// Text-only relevance of `descriptor` for a pre-lowercased query.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn text_relevance(
    descriptor: &OperationDescriptor,
    query_lower: &str,
    weights: &ScoringWeights,
) -> f64 {
    let mut score = 0.0;
    if descriptor.name.to_lowercase().contains(query_lower) {
        score += weights.name_match;
    }
    if descriptor.description.to_lowercase().contains(query_lower) {
        score += weights.description_match;
    }
    let keyword_hits = descriptor
        .keywords
        .iter()
        .filter(|k| k.to_lowercase().contains(query_lower))
        .count();
    score += keyword_hits as f64 * weights.keyword_match;
    score
}

/// Full score: text relevance plus the usage bonus (only for text matches).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score(
    descriptor: &OperationDescriptor,
    query_lower: &str,
    usage: u64,
    weights: &ScoringWeights,
) -> f64 {
    let text = text_relevance(descriptor, query_lower, weights);
    if text > 0.0 {
        text + weights.usage_bonus * usage as f64
    } else {
        0.0
    }
}

/// Score and rank candidates against a pre-lowercased query.
///
/// Candidates are `(descriptor, usage_count)` pairs in registration order.
/// Zero-score candidates are dropped; the rest are sorted by descending
/// score with a stable sort, so equal scores keep registration order.
pub fn rank<T, I>(candidates: I, query_lower: &str, weights: &ScoringWeights) -> Vec<Ranked<T>>
where
    T: AsRef<OperationDescriptor>,
    I: IntoIterator<Item = (T, u64)>,
{
    let mut ranked: Vec<Ranked<T>> = candidates
        .into_iter()
        .filter_map(|(item, usage)| {
            let s = score(item.as_ref(), query_lower, usage, weights);
            (s > 0.0).then_some(Ranked { item, score: s })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn op(name: &str, description: &str, keywords: &[&str]) -> OperationDescriptor {
        OperationDescriptor::new(name, "b")
            .with_description(description)
            .with_keywords(keywords.iter().copied())
    }

    #[test]
    fn name_match_scores_10() {
        let w = ScoringWeights::default();
        assert!((score(&op("search_files", "", &[]), "search", 0, &w) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn name_and_description_accumulate() {
        let w = ScoringWeights::default();
        let d = op("search_files", "Search files by glob", &[]);
        assert!((score(&d, "search", 0, &w) - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn each_matching_keyword_adds_3() {
        let w = ScoringWeights::default();
        let d = op("grep_code", "Find text", &["search", "research", "grep"]);
        assert!((score(&d, "search", 0, &w) - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn usage_bonus_is_half_point_per_use() {
        let w = ScoringWeights::default();
        let d = op("grep_code", "", &["search", "grep"]);
        assert!((score(&d, "search", 3, &w) - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn usage_never_turns_a_miss_into_a_match() {
        let w = ScoringWeights::default();
        let d = op("read_file", "Read a file", &[]);
        assert!(score(&d, "search", 1_000, &w).abs() < f64::EPSILON);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let w = ScoringWeights::default();
        let d = op("SearchFiles", "", &["GREP"]);
        assert!(score(&d, "search", 0, &w) > 0.0);
        assert!(score(&d, "grep", 0, &w) > 0.0);
    }

    #[test]
    fn more_usage_strictly_increases_score_for_matches() {
        let w = ScoringWeights::default();
        let d = op("grep_code", "search code", &[]);
        let mut previous = score(&d, "search", 0, &w);
        for usage in 1..20 {
            let current = score(&d, "search", usage, &w);
            assert!(current > previous);
            previous = current;
        }
    }

    #[test]
    fn custom_weights_are_applied() {
        let w = ScoringWeights {
            name_match: 1.0,
            description_match: 0.0,
            keyword_match: 0.0,
            usage_bonus: 0.0,
        };
        let d = op("search_files", "search", &["search"]);
        assert!((score(&d, "search", 10, &w) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rank_drops_zero_scores_and_sorts_descending() {
        let w = ScoringWeights::default();
        let candidates = vec![
            (op("list_directory", "List entries", &[]), 0),
            (op("grep_code", "", &["search"]), 0),
            (op("search_files", "", &[]), 0),
        ];
        let ranked = rank(candidates.iter().map(|(d, u)| (d, *u)), "search", &w);
        let names: Vec<&str> = ranked.iter().map(|r| r.item.name.as_str()).collect();
        assert_eq!(names, vec!["search_files", "grep_code"]);
    }

    #[test]
    fn rank_ties_keep_input_order() {
        let w = ScoringWeights::default();
        let candidates = vec![
            (op("search_b", "", &[]), 0),
            (op("search_a", "", &[]), 0),
            (op("search_c", "", &[]), 0),
        ];
        let ranked = rank(candidates.iter().map(|(d, u)| (d, *u)), "search", &w);
        let names: Vec<&str> = ranked.iter().map(|r| r.item.name.as_str()).collect();
        assert_eq!(names, vec!["search_b", "search_a", "search_c"]);
    }

    #[test]
    fn normalize_query_trims_and_lowercases() {
        assert_eq!(normalize_query(Some("  Search ")), Some("search".to_string()));
        assert_eq!(normalize_query(Some("   ")), None);
        assert_eq!(normalize_query(None), None);
    }

    #[test]
    fn weights_deserialize_with_defaults() {
        let w: ScoringWeights = serde_json::from_str(r#"{"usage_bonus": 1.0}"#).unwrap();
        assert!((w.usage_bonus - 1.0).abs() < f64::EPSILON);
        assert!((w.name_match - 10.0).abs() < f64::EPSILON);
    }
}
