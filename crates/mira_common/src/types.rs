//! Core value types: cognitive inference, risk flags, diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Cognitive state
// ============================================================================

/// Coarse cognitive state inferred from behavioral signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveState {
    /// First contact with the exercise.
    Exploring,
    /// Making steady forward progress.
    Implementing,
    /// Small, targeted edits between attempts.
    Debugging,
    /// Large rewrite between attempts.
    StrategyChange,
    /// Repeated failures without meaningful progress.
    Stuck,
    /// All checks passed.
    Validated,
}

impl fmt::Display for CognitiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CognitiveState::Exploring => "exploring",
            CognitiveState::Implementing => "implementing",
            CognitiveState::Debugging => "debugging",
            CognitiveState::StrategyChange => "strategy_change",
            CognitiveState::Stuck => "stuck",
            CognitiveState::Validated => "validated",
        };
        write!(f, "{}", s)
    }
}

/// Discrete confidence band derived from the continuous score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    /// Canonical score-to-tier mapping. The continuous score is
    /// authoritative; this band exists only for display and filtering.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceTier::High
        } else if score >= 0.6 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Result of cognitive-state inference for one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitiveInference {
    pub state: CognitiveState,
    /// Confidence in the classification, 0.0-1.0.
    pub confidence: f64,
    pub tier: ConfidenceTier,
    /// Human-readable justification for the chosen state.
    pub reasoning: String,
    /// Observable signals that drove the decision, for auditability.
    pub signals: Vec<String>,
}

impl CognitiveInference {
    pub fn new(state: CognitiveState, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            state,
            confidence,
            tier: ConfidenceTier::from_score(confidence),
            reasoning: reasoning.into(),
            signals: Vec::new(),
        }
    }

    pub fn with_signals(mut self, signals: Vec<String>) -> Self {
        self.signals = signals;
        self
    }
}

// ============================================================================
// Risk flags
// ============================================================================

/// The concerning pattern a detector looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskType {
    CopyPaste,
    Frustration,
    HintDependency,
    DuplicateSubmission,
}

impl RiskType {
    /// Stable key used in alert dedup sets and persisted records.
    pub fn key(&self) -> &'static str {
        match self {
            RiskType::CopyPaste => "copy_paste",
            RiskType::Frustration => "frustration",
            RiskType::HintDependency => "hint_dependency",
            RiskType::DuplicateSubmission => "duplicate_submission",
        }
    }
}

impl fmt::Display for RiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Flag severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Only high-severity flags are promoted to user-visible alerts.
    pub fn alertable(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

/// A single detector's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFlag {
    pub risk_type: RiskType,
    pub severity: Severity,
    pub message: String,
    /// Structured evidence (rates, counters, thresholds crossed).
    pub details: serde_json::Value,
    pub detected_at: DateTime<Utc>,
}

impl RiskFlag {
    pub fn new(
        risk_type: RiskType,
        severity: Severity,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            risk_type,
            severity,
            message: message.into(),
            details,
            detected_at: Utc::now(),
        }
    }
}

/// A flag promoted to teacher/student visibility after dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    pub risk_type: RiskType,
    pub severity: Severity,
    pub exercise_id: String,
    pub message: String,
}

/// Static guidance attached per detected risk type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub risk_type: RiskType,
    pub advice: String,
}

/// Aggregate output of one risk-analysis pass. Ephemeral; the engine does
/// not persist this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAnalysisResult {
    pub flags: Vec<RiskFlag>,
    pub alerts: Vec<RiskAlert>,
    pub recommendations: Vec<Recommendation>,
    /// Detectors that failed this pass; the rest of the result is still valid.
    pub detector_errors: Vec<String>,
}

impl RiskAnalysisResult {
    pub fn is_clean(&self) -> bool {
        self.flags.is_empty() && self.detector_errors.is_empty()
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Diagnostic view of one session's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub student_id: String,
    pub total_attempts: u32,
    pub hints_requested: u32,
    pub consecutive_failures: u32,
    pub alerts_sent: Vec<String>,
    pub recent_attempts_count: usize,
}

/// Circuit breaker state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected outright.
    Open,
    /// A bounded number of trial requests probe for recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        write!(f, "{}", s)
    }
}

/// Operational counters for one circuit breaker.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CircuitStats {
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub state_changes: u64,
}

/// Diagnostic snapshot of one circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub stats: CircuitStats,
}

// ============================================================================
// Generation outcomes
// ============================================================================

/// Where the text of a generation outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationSource {
    /// Produced by the generation dependency.
    Generated,
    /// Static fallback used because the call failed or was rejected.
    Fallback,
}

/// Text produced for the user, with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub text: String,
    pub source: GenerationSource,
}

impl GenerationOutcome {
    pub fn generated(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: GenerationSource::Generated,
        }
    }

    pub fn fallback(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: GenerationSource::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_tier_mapping() {
        assert_eq!(ConfidenceTier::from_score(0.95), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.8), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.7), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.6), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.59), ConfidenceTier::Low);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_alertable_severities() {
        assert!(!Severity::Low.alertable());
        assert!(!Severity::Medium.alertable());
        assert!(Severity::High.alertable());
        assert!(Severity::Critical.alertable());
    }

    #[test]
    fn test_risk_type_serde_wire_names() {
        let json = serde_json::to_string(&RiskType::CopyPaste).unwrap();
        assert_eq!(json, "\"copy_paste\"");
        let back: RiskType = serde_json::from_str("\"duplicate_submission\"").unwrap();
        assert_eq!(back, RiskType::DuplicateSubmission);
    }

    #[test]
    fn test_inference_derives_tier() {
        let inf = CognitiveInference::new(CognitiveState::Validated, 0.95, "all checks passed");
        assert_eq!(inf.tier, ConfidenceTier::High);
    }
}
