//! Copy-paste detection from typing rate.
//!
//! A large jump in code size over a short interval is faster than anyone
//! types. The interval is floored at 0.1s so a same-second resubmission
//! cannot divide by zero.

use super::{AttemptContext, DetectorError, DetectorOutcome};
use crate::config::RiskConfig;
use mira_common::{RiskFlag, RiskType, Severity};
use serde_json::json;

pub fn detect(cfg: &RiskConfig, ctx: &AttemptContext<'_>) -> DetectorOutcome {
    let Some(previous_length) = ctx.previous_code_length else {
        return Ok(None); // first submission, no rate to compute
    };

    if !ctx.seconds_since_last.is_finite() || ctx.seconds_since_last < 0.0 {
        return Err(DetectorError::new(
            "copy_paste",
            format!("invalid inter-attempt interval {}", ctx.seconds_since_last),
        ));
    }

    let code_length = ctx.code.chars().count();
    let chars_added = code_length.saturating_sub(previous_length);
    if chars_added < cfg.copy_paste_min_chars {
        return Ok(None);
    }

    let elapsed = ctx.seconds_since_last.max(0.1);
    let rate = chars_added as f64 / elapsed;

    let severity = if rate > 2.0 * cfg.copy_paste_chars_per_second {
        Severity::Critical
    } else if rate > cfg.copy_paste_chars_per_second {
        Severity::High
    } else {
        return Ok(None);
    };

    Ok(Some(RiskFlag::new(
        RiskType::CopyPaste,
        severity,
        format!(
            "{} characters appeared in {:.1}s ({:.0} chars/s)",
            chars_added, elapsed, rate
        ),
        json!({
            "chars_added": chars_added,
            "seconds_since_last": elapsed,
            "rate_chars_per_second": rate,
            "threshold": cfg.copy_paste_chars_per_second,
        }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(code: &'a str, previous_length: Option<usize>, seconds: f64) -> AttemptContext<'a> {
        AttemptContext {
            exercise_id: "ex1",
            code,
            previous_code_length: previous_length,
            seconds_since_last: seconds,
            prior_submissions: &[],
        }
    }

    #[test]
    fn test_fast_large_addition_flags_high() {
        let cfg = RiskConfig::default();
        // 120 chars in 2.0s: 60 chars/s, above 50 but not above 100
        let code = "x".repeat(120);
        let flag = detect(&cfg, &ctx(&code, Some(0), 2.0)).unwrap().unwrap();
        assert_eq!(flag.severity, Severity::High);
        assert_eq!(flag.risk_type, RiskType::CopyPaste);
        assert_eq!(flag.details["chars_added"], 120);
    }

    #[test]
    fn test_very_fast_addition_escalates_to_critical() {
        let cfg = RiskConfig::default();
        // 140 chars in 1.0s: 140 chars/s, above the 2x threshold of 100
        let code = "x".repeat(140);
        let flag = detect(&cfg, &ctx(&code, Some(0), 1.0)).unwrap().unwrap();
        assert_eq!(flag.severity, Severity::Critical);
    }

    #[test]
    fn test_rate_at_double_threshold_stays_high() {
        let cfg = RiskConfig::default();
        // Exactly 100 chars/s: escalation requires strictly more than 2x
        let code = "x".repeat(100);
        let flag = detect(&cfg, &ctx(&code, Some(0), 1.0)).unwrap().unwrap();
        assert_eq!(flag.severity, Severity::High);
    }

    #[test]
    fn test_small_additions_are_skipped() {
        let cfg = RiskConfig::default();
        let code = "x".repeat(99);
        assert!(detect(&cfg, &ctx(&code, Some(0), 0.5)).unwrap().is_none());
    }

    #[test]
    fn test_slow_typing_is_fine() {
        let cfg = RiskConfig::default();
        // 150 chars over a minute
        let code = "x".repeat(150);
        assert!(detect(&cfg, &ctx(&code, Some(0), 60.0)).unwrap().is_none());
    }

    #[test]
    fn test_zero_interval_is_floored_not_divided() {
        let cfg = RiskConfig::default();
        let code = "x".repeat(120);
        // 0.0s floors to 0.1s: 1200 chars/s, critical
        let flag = detect(&cfg, &ctx(&code, Some(0), 0.0)).unwrap().unwrap();
        assert_eq!(flag.severity, Severity::Critical);
    }

    #[test]
    fn test_shrinking_code_is_skipped() {
        let cfg = RiskConfig::default();
        assert!(detect(&cfg, &ctx("short", Some(500), 1.0)).unwrap().is_none());
    }

    #[test]
    fn test_no_previous_submission_is_skipped() {
        let cfg = RiskConfig::default();
        let code = "x".repeat(500);
        assert!(detect(&cfg, &ctx(&code, None, 0.5)).unwrap().is_none());
    }

    #[test]
    fn test_invalid_interval_is_a_detector_error() {
        let cfg = RiskConfig::default();
        let code = "x".repeat(500);
        let err = detect(&cfg, &ctx(&code, Some(0), f64::NAN)).unwrap_err();
        assert_eq!(err.detector, "copy_paste");
    }
}
