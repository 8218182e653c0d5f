//! Similarity ranking for auto-complete candidates.
//!
//! Textual candidates are ordered by a normalized Damerau-Levenshtein
//! similarity to the typed fragment, ties broken by the invariant string
//! order so equal scores always come out the same way. Numeric candidates
//! are never scored: they are filtered by substring and keep the ascending
//! numeric order of the value cache.

use std::cmp::Ordering;

use rayon::prelude::*;

/// Below this many candidates scoring stays on the calling thread
const PARALLEL_SCORING_THRESHOLD: usize = 2048;

/// Invariant string order: case-folded first, ordinal as tiebreaker.
/// Total, so sorting and dedup with it are deterministic.
pub fn compare_invariant(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Case-insensitive substring test
pub fn contains_invariant(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// True when the whole fragment parses as an integer or a float
pub fn looks_numeric(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && (trimmed.parse::<i64>().is_ok() || trimmed.parse::<f64>().is_ok())
}

/// Similarity in `0.0..=1.0`: one minus the edit distance normalized by the
/// longer string's length. Comparison is case-insensitive.
pub fn similarity(query: &str, candidate: &str) -> f32 {
    let a = query.to_lowercase();
    let b = candidate.to_lowercase();
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    let distance = edit_distance(&a, &b);
    1.0 - distance as f32 / longest as f32
}

/// Rank `candidates` by similarity to `query` and keep the best `limit`.
///
/// An empty query is a short-circuit: the first `limit` candidates are
/// returned in their original order and nothing is scored.
pub fn rank_by_similarity(candidates: &[String], query: &str, limit: usize) -> Vec<String> {
    if query.is_empty() {
        return candidates.iter().take(limit).cloned().collect();
    }

    let scores: Vec<f32> = if candidates.len() >= PARALLEL_SCORING_THRESHOLD {
        candidates.par_iter().map(|c| similarity(query, c)).collect()
    } else {
        candidates.iter().map(|c| similarity(query, c)).collect()
    };

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .total_cmp(&scores[a])
            .then_with(|| compare_invariant(&candidates[a], &candidates[b]))
    });

    order
        .into_iter()
        .take(limit)
        .map(|i| candidates[i].clone())
        .collect()
}

/// Numeric fields: keep candidates containing `query`, in their existing order
pub fn numeric_matches(candidates: &[String], query: &str, limit: usize) -> Vec<String> {
    candidates
        .iter()
        .filter(|c| contains_invariant(c, query))
        .take(limit)
        .cloned()
        .collect()
}

/// Maximum allowed edit distance based on word length
pub(crate) fn max_edit_distance(word_len: usize) -> u8 {
    if word_len < 5 {
        0
    } else if word_len <= 8 {
        1
    } else {
        2
    }
}

/// Damerau-Levenshtein distance (optimal string alignment), unbounded.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let bound = a.chars().count().max(b.chars().count());
    edit_distance_bounded(a, b, bound).unwrap_or(bound)
}

/// Damerau-Levenshtein edit distance (optimal string alignment) with threshold pruning.
/// Counts insertions, deletions, substitutions, and adjacent transpositions each as 1 edit.
/// Returns `Some(distance)` if distance <= max_dist, `None` otherwise.
pub fn edit_distance_bounded(a: &str, b: &str, max_dist: usize) -> Option<usize> {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m.abs_diff(n) > max_dist {
        return None;
    }

    let mut prev2 = vec![0usize; n + 1];
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        let mut row_min = curr[0];

        for j in 1..=n {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(prev[j - 1] + cost);

            if i >= 2
                && j >= 2
                && a_chars[i - 1] == b_chars[j - 2]
                && a_chars[i - 2] == b_chars[j - 1]
            {
                curr[j] = curr[j].min(prev2[j - 2] + 1);
            }

            row_min = row_min.min(curr[j]);
        }

        if row_min > max_dist {
            return None;
        }

        std::mem::swap(&mut prev2, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }

    let result = prev[n];
    if result <= max_dist {
        Some(result)
    } else {
        None
    }
}
