//! Persistence boundary.
//!
//! Durable history lives behind `TraceStore`; the engine reads recent
//! submissions from it and writes traces and risk flags to it, but owns no
//! schema. Deployments without persistence plug in `NoopTraceStore` and the
//! engine degrades gracefully: no previous-code diff, no duplicate sample.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mira_common::{CognitiveState, RiskType, Severity};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// One submission with its inference outcome, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_id: Uuid,
    pub session_id: String,
    pub student_id: String,
    pub exercise_id: String,
    pub code: String,
    pub attempt_number: u32,
    pub succeeded: bool,
    pub state: CognitiveState,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// One risk flag, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFlagRecord {
    pub flag_id: Uuid,
    pub session_id: String,
    pub exercise_id: String,
    pub risk_type: RiskType,
    pub severity: Severity,
    pub message: String,
    pub details: serde_json::Value,
    pub detected_at: DateTime<Utc>,
}

/// Adapter over whatever the deployment uses for durable history.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn create_trace(&self, record: TraceRecord) -> Result<()>;

    async fn create_risk_flag(&self, record: RiskFlagRecord) -> Result<()>;

    /// Up to `limit` traces for the session, newest first.
    async fn recent_traces(&self, session_id: &str, limit: usize) -> Result<Vec<TraceRecord>>;
}

/// No persistence configured: writes vanish, reads are empty.
pub struct NoopTraceStore;

#[async_trait]
impl TraceStore for NoopTraceStore {
    async fn create_trace(&self, _record: TraceRecord) -> Result<()> {
        Ok(())
    }

    async fn create_risk_flag(&self, _record: RiskFlagRecord) -> Result<()> {
        Ok(())
    }

    async fn recent_traces(&self, _session_id: &str, _limit: usize) -> Result<Vec<TraceRecord>> {
        Ok(Vec::new())
    }
}

/// In-process store for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryTraceStore {
    traces: Mutex<Vec<TraceRecord>>,
    flags: Mutex<Vec<RiskFlagRecord>>,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trace_count(&self) -> usize {
        self.traces.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn flags(&self) -> Vec<RiskFlagRecord> {
        self.flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl TraceStore for MemoryTraceStore {
    async fn create_trace(&self, record: TraceRecord) -> Result<()> {
        self.traces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    async fn create_risk_flag(&self, record: RiskFlagRecord) -> Result<()> {
        self.flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    async fn recent_traces(&self, session_id: &str, limit: usize) -> Result<Vec<TraceRecord>> {
        let traces = self.traces.lock().unwrap_or_else(|e| e.into_inner());
        Ok(traces
            .iter()
            .rev()
            .filter(|t| t.session_id == session_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
