//! Cognitive-state inference.
//!
//! Classifies each submission into a coarse cognitive state from behavioral
//! signals only: check results, attempt position, the diff against the
//! previous submission, and the recent failure streak.
//!
//! The rules form a prioritized table evaluated top to bottom; the first rule
//! that produces a classification wins. The ordering is part of the contract:
//! a passing submission is Validated even on attempt 1, a first attempt is
//! Exploring even if the session was previously stuck, and diff shape beats
//! streak counting.
//!
//! Pure with respect to the session store: callers pass a snapshot of the
//! recent-attempt ring, never a live handle.

use crate::config::InferenceConfig;
use crate::diff;
use crate::session::RecentAttempt;
use mira_common::{CognitiveInference, CognitiveState, ExecutionResult};
use std::collections::VecDeque;

/// Everything the inferencer is allowed to see for one submission.
pub struct InferenceInput<'a> {
    pub code: &'a str,
    pub execution: &'a ExecutionResult,
    /// 1-based attempt number within the session.
    pub attempt_number: u32,
    /// The previous submission's code, when history is available.
    pub previous_code: Option<&'a str>,
    /// Snapshot of the session's recent-attempt ring, oldest first.
    pub recent_attempts: &'a VecDeque<RecentAttempt>,
}

type Rule = fn(&InferenceInput<'_>, &InferenceConfig) -> Option<CognitiveInference>;

/// Prioritized rule table. Order is load-bearing.
const RULES: &[(&str, Rule)] = &[
    ("validated", rule_validated),
    ("first_attempt", rule_first_attempt),
    ("code_delta", rule_code_delta),
    ("failure_streak", rule_failure_streak),
];

/// Classify one submission. Falls back to Implementing when no rule fires.
pub fn infer(input: &InferenceInput<'_>, cfg: &InferenceConfig) -> CognitiveInference {
    for (_, rule) in RULES {
        if let Some(inference) = rule(input, cfg) {
            return inference;
        }
    }

    CognitiveInference::new(
        CognitiveState::Implementing,
        0.6,
        "no dominant signal; steady progress assumed",
    )
    .with_signals(vec![
        format!("attempt {}", input.attempt_number),
        format!(
            "{}/{} checks passing",
            input.execution.passed_checks, input.execution.total_checks
        ),
    ])
}

fn rule_validated(input: &InferenceInput<'_>, _cfg: &InferenceConfig) -> Option<CognitiveInference> {
    if !input.execution.all_passed() {
        return None;
    }
    Some(
        CognitiveInference::new(CognitiveState::Validated, 0.95, "all checks passed")
            .with_signals(vec![format!(
                "{}/{} checks passed",
                input.execution.passed_checks, input.execution.total_checks
            )]),
    )
}

fn rule_first_attempt(
    input: &InferenceInput<'_>,
    _cfg: &InferenceConfig,
) -> Option<CognitiveInference> {
    if input.attempt_number != 1 {
        return None;
    }
    Some(
        CognitiveInference::new(
            CognitiveState::Exploring,
            0.9,
            "first attempt at this exercise",
        )
        .with_signals(vec!["attempt 1".to_string()]),
    )
}

/// Diff-shape rule: a large rewrite is a strategy change, a handful of
/// touched lines is debugging. Medium-sized edits fall through to the
/// streak rule.
fn rule_code_delta(input: &InferenceInput<'_>, cfg: &InferenceConfig) -> Option<CognitiveInference> {
    let previous = input.previous_code?;
    let d = diff::line_diff(previous, input.code);
    let ratio = d.change_ratio();

    if ratio > cfg.structural_change_ratio {
        return Some(
            CognitiveInference::new(
                CognitiveState::StrategyChange,
                0.7,
                "large rewrite since the previous attempt",
            )
            .with_signals(vec![
                format!(
                    "change ratio {:.2} > {:.2}",
                    ratio, cfg.structural_change_ratio
                ),
                format!("{} lines added, {} removed", d.added, d.removed),
            ]),
        );
    }

    if d.changed_lines() > 0 && d.changed_lines() < cfg.debug_change_line_count {
        return Some(
            CognitiveInference::new(
                CognitiveState::Debugging,
                0.75,
                "small targeted edits since the previous attempt",
            )
            .with_signals(vec![format!(
                "{} changed lines < {}",
                d.changed_lines(),
                cfg.debug_change_line_count
            )]),
        );
    }

    None
}

fn rule_failure_streak(
    input: &InferenceInput<'_>,
    cfg: &InferenceConfig,
) -> Option<CognitiveInference> {
    let failures = input
        .recent_attempts
        .iter()
        .rev()
        .take(cfg.stuck_window)
        .filter(|a| !a.succeeded)
        .count();

    if failures < cfg.stuck_failure_count {
        return None;
    }
    Some(
        CognitiveInference::new(
            CognitiveState::Stuck,
            0.85,
            "repeated failures without a passing attempt",
        )
        .with_signals(vec![format!(
            "{} failures in last {} attempts",
            failures, cfg.stuck_window
        )]),
    )
}
