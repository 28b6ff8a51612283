//! Incoming per-session events.
//!
//! The API layer deserializes requests into these shapes and hands them to
//! the gateway unchanged. All timestamps are wall-clock UTC set by the
//! producer; the engine keeps its own monotonic clock for TTL decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of running a submission against the exercise's checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Number of checks that passed.
    pub passed_checks: u32,
    /// Total number of checks for the exercise.
    pub total_checks: u32,
    /// First error or failure message, if any.
    pub error_message: Option<String>,
}

impl ExecutionResult {
    /// True when every check passed (and there was at least one check).
    pub fn all_passed(&self) -> bool {
        self.total_checks > 0 && self.passed_checks == self.total_checks
    }

    pub fn passing(total_checks: u32) -> Self {
        Self {
            passed_checks: total_checks,
            total_checks,
            error_message: None,
        }
    }

    pub fn failing(passed: u32, total: u32, message: &str) -> Self {
        Self {
            passed_checks: passed,
            total_checks: total,
            error_message: Some(message.to_string()),
        }
    }
}

/// A student submitted code for an exercise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionEvent {
    pub session_id: String,
    pub student_id: String,
    pub exercise_id: String,
    pub code: String,
    pub execution: ExecutionResult,
    pub submitted_at: DateTime<Utc>,
}

/// A student asked for a hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintEvent {
    pub session_id: String,
    pub student_id: String,
    pub exercise_id: String,
    /// 1-based hint level within the exercise, if the product tracks one.
    pub hint_level: Option<u32>,
    pub requested_at: DateTime<Utc>,
}

/// A student sent a free-text prompt to the tutor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptEvent {
    pub session_id: String,
    pub student_id: String,
    pub exercise_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}
