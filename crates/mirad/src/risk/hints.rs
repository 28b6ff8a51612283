//! Hint-dependency detection.
//!
//! Runs on hint-request events only. A student who keeps asking for hints
//! without attempting the exercise in between is leaning on the tutor
//! instead of the problem. The caller counts the hint before invoking this
//! detector and resets the attempts-since-last-hint counter afterwards.

use super::DetectorOutcome;
use crate::config::RiskConfig;
use crate::session::SessionRecord;
use mira_common::{RiskFlag, RiskType, Severity};
use serde_json::json;

pub fn detect(cfg: &RiskConfig, record: &SessionRecord) -> DetectorOutcome {
    if record.attempts_since_last_hint > cfg.hint_dependency_threshold {
        return Ok(None);
    }

    let severity = if record.hints_requested > cfg.max_hints_before_high_severity {
        Severity::High
    } else {
        Severity::Medium
    };

    Ok(Some(RiskFlag::new(
        RiskType::HintDependency,
        severity,
        format!(
            "hint requested after only {} attempts since the last hint",
            record.attempts_since_last_hint
        ),
        json!({
            "attempts_since_last_hint": record.attempts_since_last_hint,
            "hints_requested": record.hints_requested,
            "threshold": cfg.hint_dependency_threshold,
        }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn record(attempts_since_hint: u32, hints: u32) -> SessionRecord {
        SessionRecord {
            session_id: "s1".to_string(),
            student_id: "stu1".to_string(),
            total_attempts: 10,
            consecutive_failures: 0,
            hints_requested: hints,
            attempts_since_last_hint: attempts_since_hint,
            recent_attempts: Default::default(),
            alerts_sent: Default::default(),
            first_failure_at: None,
            last_activity: Instant::now(),
        }
    }

    #[test]
    fn test_few_attempts_between_hints_flags_medium() {
        let cfg = RiskConfig::default();
        let flag = detect(&cfg, &record(2, 2)).unwrap().unwrap();
        assert_eq!(flag.severity, Severity::Medium);
        assert_eq!(flag.risk_type, RiskType::HintDependency);
    }

    #[test]
    fn test_threshold_boundary_fires() {
        let cfg = RiskConfig::default();
        assert!(detect(&cfg, &record(3, 1)).unwrap().is_some());
        assert!(detect(&cfg, &record(4, 1)).unwrap().is_none());
    }

    #[test]
    fn test_many_cumulative_hints_escalate_to_high() {
        let cfg = RiskConfig::default();
        let flag = detect(&cfg, &record(1, 6)).unwrap().unwrap();
        assert_eq!(flag.severity, Severity::High);
    }

    #[test]
    fn test_hint_without_any_prior_attempt_fires() {
        let cfg = RiskConfig::default();
        // Asking for a hint before trying counts as dependency
        let flag = detect(&cfg, &record(0, 1)).unwrap().unwrap();
        assert_eq!(flag.severity, Severity::Medium);
    }
}
