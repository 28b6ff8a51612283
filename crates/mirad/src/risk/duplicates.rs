//! Duplicate-submission detection.
//!
//! Exact duplicates are found in one O(n) pass over normalized fingerprints.
//! When that pass comes up short but the sample is large enough, a bounded
//! number of pairwise Jaccard comparisons catches near-duplicates (renamed
//! variables, shuffled whitespace) without the full O(n^2) cost.

use super::{AttemptContext, DetectorOutcome};
use crate::config::RiskConfig;
use mira_common::{RiskFlag, RiskType, Severity};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Normalized content fingerprint: lowercase, whitespace-collapsed, hashed.
fn fingerprint(code: &str) -> [u8; 32] {
    let normalized = code
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    Sha256::digest(normalized.as_bytes()).into()
}

/// Word-set Jaccard similarity of two submissions.
fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

pub fn detect(cfg: &RiskConfig, ctx: &AttemptContext<'_>) -> DetectorOutcome {
    if ctx.prior_submissions.is_empty() {
        return Ok(None);
    }

    let sample_size = ctx.prior_submissions.len() + 1;
    let mut groups: HashMap<[u8; 32], usize> = HashMap::new();
    for code in ctx.prior_submissions {
        *groups.entry(fingerprint(code)).or_insert(0) += 1;
    }
    *groups.entry(fingerprint(ctx.code)).or_insert(0) += 1;

    // Every submission past the first of its group is a duplicate
    let exact_duplicates: usize = groups
        .values()
        .filter(|count| **count > 1)
        .map(|count| count - 1)
        .sum();

    let mut near_duplicates = 0usize;
    if exact_duplicates < cfg.duplicate_count_threshold && sample_size >= cfg.duplicate_min_sample {
        let mut comparisons = 0usize;
        let all: Vec<&str> = ctx
            .prior_submissions
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(ctx.code))
            .collect();
        let fps: Vec<[u8; 32]> = all.iter().map(|code| fingerprint(code)).collect();
        // Newest pairs first; stop at the comparison budget
        'outer: for i in (1..all.len()).rev() {
            for j in (0..i).rev() {
                if comparisons >= cfg.duplicate_max_pairwise {
                    break 'outer;
                }
                comparisons += 1;
                if fps[i] != fps[j]
                    && jaccard(all[i], all[j]) >= cfg.duplicate_similarity_threshold
                {
                    near_duplicates += 1;
                }
            }
        }
    }

    let duplicate_count = exact_duplicates + near_duplicates;
    if duplicate_count < cfg.duplicate_count_threshold {
        return Ok(None);
    }

    Ok(Some(RiskFlag::new(
        RiskType::DuplicateSubmission,
        Severity::Low,
        format!(
            "{} duplicate or near-duplicate submissions among {}",
            duplicate_count, sample_size
        ),
        json!({
            "exact_duplicates": exact_duplicates,
            "near_duplicates": near_duplicates,
            "sample_size": sample_size,
        }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ctx<'a>(code: &'a str, prior: &'a [String]) -> AttemptContext<'a> {
        AttemptContext {
            exercise_id: "ex1",
            code,
            previous_code_length: None,
            seconds_since_last: 30.0,
            prior_submissions: prior,
        }
    }

    #[test]
    fn test_fingerprint_normalizes_case_and_whitespace() {
        assert_eq!(
            fingerprint("fn  Main() {\n  X\n}"),
            fingerprint("fn main() { x }")
        );
        assert_ne!(fingerprint("fn main() { x }"), fingerprint("fn main() { y }"));
    }

    #[test]
    fn test_jaccard_similarity() {
        assert_relative_eq!(jaccard("a b c", "a b c"), 1.0);
        assert_relative_eq!(jaccard("a b c d", "a b x y"), 2.0 / 6.0);
        assert_relative_eq!(jaccard("a", "b"), 0.0);
    }

    #[test]
    fn test_three_identical_among_five_flags_low() {
        let cfg = RiskConfig::default();
        let prior = vec![
            "let x = 1;".to_string(),
            "LET X = 1;".to_string(), // normalizes identical
            "something else entirely first".to_string(),
            "another unrelated attempt here".to_string(),
        ];
        let flag = detect(&cfg, &ctx("let  x = 1;", &prior)).unwrap().unwrap();
        assert_eq!(flag.severity, Severity::Low);
        assert_eq!(flag.details["exact_duplicates"], 2);
        assert_eq!(flag.details["sample_size"], 5);
    }

    #[test]
    fn test_below_threshold_is_quiet() {
        let cfg = RiskConfig::default();
        let prior = vec![
            "completely different one".to_string(),
            "let x = 1;".to_string(),
        ];
        // One exact duplicate pair: count 1 < threshold 2
        assert!(detect(&cfg, &ctx("let x = 1;", &prior)).unwrap().is_none());
    }

    #[test]
    fn test_near_duplicates_caught_by_jaccard_fallback() {
        let cfg = RiskConfig::default();
        // No exact duplicates, sample of 5, but heavy word overlap
        let prior = vec![
            "fn solve(n: u32) -> u32 { n + 1 }".to_string(),
            "fn solve(n: u32) -> u32 { n + 2 }".to_string(),
            "fn solve(n: u32) -> u32 { n + 3 }".to_string(),
            "zzz qqq www".to_string(),
        ];
        let flag = detect(&cfg, &ctx("fn solve(n: u32) -> u32 { n + 4 }", &prior))
            .unwrap()
            .unwrap();
        assert_eq!(flag.details["exact_duplicates"], 0);
        assert!(flag.details["near_duplicates"].as_u64().unwrap() >= 2);
    }

    #[test]
    fn test_small_sample_skips_similarity_fallback() {
        let cfg = RiskConfig::default();
        // Sample of 3 (< 5): similar but not identical stays quiet
        let prior = vec![
            "fn solve(n: u32) -> u32 { n + 1 }".to_string(),
            "fn solve(n: u32) -> u32 { n + 2 }".to_string(),
        ];
        assert!(detect(&cfg, &ctx("fn solve(n: u32) -> u32 { n + 3 }", &prior))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_no_prior_submissions_is_quiet() {
        let cfg = RiskConfig::default();
        assert!(detect(&cfg, &ctx("let x = 1;", &[])).unwrap().is_none());
    }
}
