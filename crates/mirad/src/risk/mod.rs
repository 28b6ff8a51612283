//! Risk rule engine.
//!
//! Independent detectors evaluate each event against accumulated session
//! state. A detector failure is a value, not a panic: the engine records it,
//! logs it, and keeps running the remaining detectors, so one bad rule never
//! suppresses the others' findings.
//!
//! High and critical flags are promoted to alerts exactly once per
//! (risk type, exercise) pair per session, via the record's dedup set.

pub mod copy_paste;
pub mod duplicates;
pub mod frustration;
pub mod hints;
pub mod recommend;

use crate::config::RiskConfig;
use crate::session::SessionRecord;
use mira_common::{Recommendation, RiskAlert, RiskAnalysisResult, RiskFlag};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

/// A single detector's soft failure. Carried in the aggregate result,
/// never propagated as a processing failure.
#[derive(Debug, Error)]
#[error("{detector}: {reason}")]
pub struct DetectorError {
    pub detector: &'static str,
    pub reason: String,
}

impl DetectorError {
    pub fn new(detector: &'static str, reason: impl Into<String>) -> Self {
        Self {
            detector,
            reason: reason.into(),
        }
    }
}

/// Zero or one flag, or a soft failure.
pub type DetectorOutcome = Result<Option<RiskFlag>, DetectorError>;

/// Submission-time facts the detectors need beyond the session record.
pub struct AttemptContext<'a> {
    pub exercise_id: &'a str,
    pub code: &'a str,
    /// Length of the previous submission's code, when history is available.
    pub previous_code_length: Option<usize>,
    /// Seconds between this submission and the previous session activity.
    pub seconds_since_last: f64,
    /// Prior submissions for the same exercise, oldest first.
    pub prior_submissions: &'a [String],
}

/// Runs the detector set and aggregates flags, alerts, and recommendations.
pub struct RiskEngine {
    cfg: RiskConfig,
}

impl RiskEngine {
    pub fn new(cfg: RiskConfig) -> Self {
        Self { cfg }
    }

    /// Full analysis of one code submission. Mutates only the record's
    /// alert dedup set.
    pub fn analyze_attempt(
        &self,
        ctx: &AttemptContext<'_>,
        record: &mut SessionRecord,
    ) -> RiskAnalysisResult {
        let outcomes = [
            ("copy_paste", copy_paste::detect(&self.cfg, ctx)),
            ("frustration", frustration::detect(&self.cfg, record)),
            ("duplicate_submission", duplicates::detect(&self.cfg, ctx)),
        ];
        self.collect(outcomes, ctx.exercise_id, record)
    }

    /// Hint-path analysis. Counts the hint, evaluates hint dependency
    /// against the attempts made since the previous hint, then resets that
    /// counter whether or not a flag fired.
    pub fn record_hint_request(
        &self,
        exercise_id: &str,
        record: &mut SessionRecord,
    ) -> RiskAnalysisResult {
        record.note_hint();
        let outcome = hints::detect(&self.cfg, record);
        record.attempts_since_last_hint = 0;
        self.collect([("hint_dependency", outcome)], exercise_id, record)
    }

    fn collect(
        &self,
        outcomes: impl IntoIterator<Item = (&'static str, DetectorOutcome)>,
        exercise_id: &str,
        record: &mut SessionRecord,
    ) -> RiskAnalysisResult {
        let mut result = RiskAnalysisResult::default();

        for (name, outcome) in outcomes {
            match outcome {
                Ok(Some(flag)) => {
                    debug!(detector = name, severity = ?flag.severity, "risk flag raised");
                    result.flags.push(flag);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(detector = name, error = %e, "detector failed, continuing");
                    result.detector_errors.push(e.to_string());
                }
            }
        }

        for flag in &result.flags {
            if !flag.severity.alertable() {
                continue;
            }
            let key = format!("{}:{}", flag.risk_type.key(), exercise_id);
            if record.mark_alerted(key) {
                result.alerts.push(RiskAlert {
                    risk_type: flag.risk_type,
                    severity: flag.severity,
                    exercise_id: exercise_id.to_string(),
                    message: flag.message.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for flag in &result.flags {
            if seen.insert(flag.risk_type) {
                result.recommendations.push(Recommendation {
                    risk_type: flag.risk_type,
                    advice: recommend::advice_for(flag.risk_type).to_string(),
                });
            }
        }

        result
    }
}
