//! Frustration detection from failure streaks.
//!
//! Fires when the consecutive-failure streak reaches the configured count
//! and the whole streak happened inside the configured window, measured from
//! the streak's first failure. Slow, spread-out failures are normal learning
//! and stay quiet.

use super::{DetectorError, DetectorOutcome};
use crate::clock;
use crate::config::RiskConfig;
use crate::session::SessionRecord;
use mira_common::{RiskFlag, RiskType, Severity};
use serde_json::json;

pub fn detect(cfg: &RiskConfig, record: &SessionRecord) -> DetectorOutcome {
    let failures = record.consecutive_failures;
    if failures < cfg.frustration_failure_count {
        return Ok(None);
    }

    let Some(first_failure) = record.first_failure_at else {
        // A positive streak without an anchor is a bookkeeping bug upstream.
        return Err(DetectorError::new(
            "frustration",
            format!("streak of {} has no start timestamp", failures),
        ));
    };

    let elapsed = clock::seconds_since(first_failure);
    if elapsed > cfg.frustration_window_seconds as f64 {
        return Ok(None);
    }

    let high_at = (cfg.frustration_failure_count as f64 * 1.5).ceil() as u32;
    let severity = if failures >= high_at {
        Severity::High
    } else {
        Severity::Medium
    };

    Ok(Some(RiskFlag::new(
        RiskType::Frustration,
        severity,
        format!(
            "{} consecutive failed attempts within {:.0}s",
            failures, elapsed
        ),
        json!({
            "consecutive_failures": failures,
            "window_seconds": cfg.frustration_window_seconds,
            "streak_elapsed_seconds": elapsed,
        }),
    )))
}
