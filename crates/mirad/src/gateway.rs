//! Orchestrating gateway.
//!
//! The one entry point the API layer talks to. For each submission it
//! synchronously updates session counters, infers the cognitive state, and
//! persists the trace; risk analysis then runs through the background
//! supervisor so the student's response is never held up by it. Alerts that
//! survive dedup escalate to the generation gate for an intervention
//! message, with the static recommendation as the circuit-open fallback.

use crate::breaker::{CircuitRegistry, CircuitSettings};
use crate::clock;
use crate::config::EngineConfig;
use crate::generation::{ChatMessage, GenerationBackend, GenerationGate, GenerationParams};
use crate::inference::{self, InferenceInput};
use crate::persistence::{RiskFlagRecord, TraceRecord, TraceStore};
use crate::risk::{recommend, AttemptContext, RiskEngine};
use crate::session::SessionStore;
use crate::supervisor::TaskSupervisor;
use chrono::Utc;
use mira_common::{
    CircuitSnapshot, CognitiveInference, GenerationOutcome, HintEvent, PromptEvent,
    RiskAnalysisResult, SessionSummary, SubmissionEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Name of the protected generation dependency in the circuit registry.
pub const GENERATION_DEPENDENCY: &str = "generation";

/// How many persisted traces feed diff and duplicate analysis.
const HISTORY_LIMIT: usize = 10;

const TUTOR_SYSTEM_PROMPT: &str = "You are a patient programming tutor. \
Respond with one short, encouraging paragraph. Never hand over a full \
solution; point at the next thing worth trying.";

const PROMPT_FALLBACK: &str = "I can't generate a detailed answer right now. \
Re-read the exercise statement and try the simplest version of your idea; \
every attempt narrows things down.";

/// What the caller gets back immediately for one submission.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub flow_id: Uuid,
    pub trace_id: Uuid,
    pub inference: CognitiveInference,
}

/// Everything one background analysis pass needs, captured at submission
/// time so the job is self-contained.
struct AnalysisJob {
    event: SubmissionEvent,
    flow_id: Uuid,
    previous_code_length: Option<usize>,
    seconds_since_last: f64,
    prior_submissions: Vec<String>,
}

/// Shared handles the analysis job runs against.
#[derive(Clone)]
struct AnalysisDeps {
    sessions: Arc<SessionStore>,
    risk: Arc<RiskEngine>,
    traces: Arc<dyn TraceStore>,
    gate: Arc<GenerationGate>,
    analysis_timeout: Duration,
}

pub struct Gateway {
    config: EngineConfig,
    sessions: Arc<SessionStore>,
    risk: Arc<RiskEngine>,
    supervisor: TaskSupervisor,
    circuits: Arc<CircuitRegistry>,
    gate: Arc<GenerationGate>,
    traces: Arc<dyn TraceStore>,
}

impl Gateway {
    pub fn new(
        config: EngineConfig,
        traces: Arc<dyn TraceStore>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        let circuits = Arc::new(CircuitRegistry::new(CircuitSettings::from(&config.circuit)));
        let gate = Arc::new(GenerationGate::new(
            circuits.get_or_create(GENERATION_DEPENDENCY),
            backend,
            Duration::from_secs(config.generation.timeout_seconds),
        ));
        Self {
            sessions: Arc::new(SessionStore::new()),
            risk: Arc::new(RiskEngine::new(config.risk.clone())),
            supervisor: TaskSupervisor::new(),
            circuits,
            gate,
            traces,
            config,
        }
    }

    /// Primary path for one code submission: counters, inference, trace,
    /// and a scheduled (not awaited) risk analysis.
    pub async fn handle_submission(&self, event: SubmissionEvent) -> SubmissionOutcome {
        let flow_id = Uuid::new_v4();

        let recent = match self
            .traces
            .recent_traces(&event.session_id, HISTORY_LIMIT)
            .await
        {
            Ok(traces) => traces,
            Err(e) => {
                warn!(flow_id = %flow_id, error = %e, "trace history unavailable");
                Vec::new()
            }
        };
        let previous = recent.iter().find(|t| t.exercise_id == event.exercise_id);
        let previous_code = previous.map(|t| t.code.clone());
        let previous_code_length = previous.map(|t| t.code.chars().count());
        let mut prior_submissions: Vec<String> = recent
            .iter()
            .filter(|t| t.exercise_id == event.exercise_id)
            .map(|t| t.code.clone())
            .collect();
        prior_submissions.reverse(); // oldest first

        let succeeded = event.execution.all_passed();
        let code_length = event.code.chars().count();
        let (attempt_number, seconds_since_last, ring) = self
            .sessions
            .mutate(&event.session_id, &event.student_id, |record| {
                let seconds_since_last = clock::seconds_since(record.last_activity);
                let attempt_number =
                    record.note_attempt(code_length, succeeded, seconds_since_last);
                (attempt_number, seconds_since_last, record.recent_attempts.clone())
            })
            .await;

        let input = InferenceInput {
            code: &event.code,
            execution: &event.execution,
            attempt_number,
            previous_code: previous_code.as_deref(),
            recent_attempts: &ring,
        };
        let inferred = inference::infer(&input, &self.config.inference);
        info!(
            flow_id = %flow_id,
            session_id = %event.session_id,
            state = %inferred.state,
            confidence = inferred.confidence,
            "cognitive state inferred"
        );

        let trace_id = Uuid::new_v4();
        let trace = TraceRecord {
            trace_id,
            session_id: event.session_id.clone(),
            student_id: event.student_id.clone(),
            exercise_id: event.exercise_id.clone(),
            code: event.code.clone(),
            attempt_number,
            succeeded,
            state: inferred.state,
            confidence: inferred.confidence,
            created_at: Utc::now(),
        };
        if let Err(e) = self.traces.create_trace(trace).await {
            warn!(flow_id = %flow_id, error = %e, "trace persist failed");
        }

        self.spawn_analysis(AnalysisJob {
            event,
            flow_id,
            previous_code_length,
            seconds_since_last,
            prior_submissions,
        });

        SubmissionOutcome {
            flow_id,
            trace_id,
            inference: inferred,
        }
    }

    /// Classify a submission without touching any state. Same rule table
    /// the submission path uses, exposed for direct callers.
    pub fn infer_cognitive_state(&self, input: &InferenceInput<'_>) -> CognitiveInference {
        inference::infer(input, &self.config.inference)
    }

    /// Hint-request path: synchronous, returns the hint-dependency analysis.
    pub async fn handle_hint_request(&self, event: &HintEvent) -> RiskAnalysisResult {
        let result = self
            .sessions
            .mutate(&event.session_id, &event.student_id, |record| {
                self.risk.record_hint_request(&event.exercise_id, record)
            })
            .await;
        if !result.alerts.is_empty() {
            info!(
                session_id = %event.session_id,
                alerts = result.alerts.len(),
                "hint-dependency alert raised"
            );
        }
        result
    }

    /// Free-text prompt path: straight through the generation gate.
    pub async fn handle_prompt(&self, event: &PromptEvent) -> GenerationOutcome {
        let messages = [
            ChatMessage::system(TUTOR_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Exercise {}: the student asks: {}",
                event.exercise_id, event.text
            )),
        ];
        self.gate
            .generate_or_fallback(&messages, &GenerationParams::default(), PROMPT_FALLBACK)
            .await
    }

    /// Run risk analysis for a submission right now and return the result.
    /// The scheduled path goes through the same job.
    pub async fn analyze_attempt(
        &self,
        event: SubmissionEvent,
        previous_code_length: Option<usize>,
        seconds_since_last: f64,
        prior_submissions: Vec<String>,
    ) -> RiskAnalysisResult {
        let job = AnalysisJob {
            event,
            flow_id: Uuid::new_v4(),
            previous_code_length,
            seconds_since_last,
            prior_submissions,
        };
        run_analysis(self.analysis_deps(), job)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "inline risk analysis failed");
                RiskAnalysisResult::default()
            })
    }

    /// Fire-and-forget entry point: queue a risk analysis for a submission
    /// without waiting on it. Returns the flow ID for correlation.
    pub fn schedule_risk_analysis(
        &self,
        event: SubmissionEvent,
        previous_code_length: Option<usize>,
        seconds_since_last: f64,
        prior_submissions: Vec<String>,
    ) -> Uuid {
        let flow_id = Uuid::new_v4();
        self.spawn_analysis(AnalysisJob {
            event,
            flow_id,
            previous_code_length,
            seconds_since_last,
            prior_submissions,
        });
        flow_id
    }

    fn spawn_analysis(&self, job: AnalysisJob) {
        let deps = self.analysis_deps();
        let session_id = job.event.session_id.clone();
        let flow_id = job.flow_id;
        self.supervisor.schedule(&session_id, flow_id, async move {
            run_analysis(deps, job).await.map(|_| ())
        });
    }

    fn analysis_deps(&self) -> AnalysisDeps {
        AnalysisDeps {
            sessions: Arc::clone(&self.sessions),
            risk: Arc::clone(&self.risk),
            traces: Arc::clone(&self.traces),
            gate: Arc::clone(&self.gate),
            analysis_timeout: Duration::from_secs(self.config.risk.analysis_timeout_seconds),
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics and lifecycle
    // ------------------------------------------------------------------

    pub async fn session_summary(&self, session_id: &str) -> Option<SessionSummary> {
        self.sessions.summary(session_id).await
    }

    pub fn circuit_stats(&self, name: &str) -> Option<CircuitSnapshot> {
        self.circuits.snapshot(name)
    }

    /// Remove sessions idle past the configured TTL.
    pub async fn sweep_sessions(&self) -> usize {
        self.sessions
            .sweep_expired(Duration::from_secs(self.config.session.ttl_seconds))
            .await
    }

    /// Explicitly drop state for a session that has ended.
    pub async fn end_session(&self, session_id: &str) -> bool {
        self.sessions.clear(session_id).await
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.active_count().await
    }

    pub fn analyses_in_flight(&self) -> usize {
        self.supervisor.in_flight()
    }

    pub async fn generation_available(&self) -> bool {
        self.gate.is_available().await
    }

    /// Wait for in-flight background analysis before shutdown.
    pub async fn drain(&self) {
        self.supervisor.drain().await;
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.config.session.sweep_interval_seconds)
    }
}

/// One background analysis pass: detectors under their own timeout, then
/// flag persistence and alert escalation. Detector work never does I/O, so
/// the timeout only guards pathological lock contention.
async fn run_analysis(deps: AnalysisDeps, job: AnalysisJob) -> anyhow::Result<RiskAnalysisResult> {
    let event = &job.event;

    let detectors = deps.sessions.mutate(&event.session_id, &event.student_id, |record| {
        let ctx = AttemptContext {
            exercise_id: &event.exercise_id,
            code: &event.code,
            previous_code_length: job.previous_code_length,
            seconds_since_last: job.seconds_since_last,
            prior_submissions: &job.prior_submissions,
        };
        deps.risk.analyze_attempt(&ctx, record)
    });

    let result = match tokio::time::timeout(deps.analysis_timeout, detectors).await {
        Ok(result) => result,
        Err(_) => {
            warn!(flow_id = %job.flow_id, "risk analysis timed out, skipping");
            return Ok(RiskAnalysisResult::default());
        }
    };

    for flag in &result.flags {
        let record = RiskFlagRecord {
            flag_id: Uuid::new_v4(),
            session_id: event.session_id.clone(),
            exercise_id: event.exercise_id.clone(),
            risk_type: flag.risk_type,
            severity: flag.severity,
            message: flag.message.clone(),
            details: flag.details.clone(),
            detected_at: flag.detected_at,
        };
        if let Err(e) = deps.traces.create_risk_flag(record).await {
            warn!(flow_id = %job.flow_id, error = %e, "risk flag persist failed");
        }
    }

    for alert in &result.alerts {
        let fallback = recommend::advice_for(alert.risk_type);
        let messages = [
            ChatMessage::system(TUTOR_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "A student on exercise {} shows a {} pattern ({}). \
                 Write one supportive nudge for them.",
                alert.exercise_id, alert.risk_type, alert.message
            )),
        ];
        let outcome = deps
            .gate
            .generate_or_fallback(&messages, &GenerationParams::default(), fallback)
            .await;
        info!(
            flow_id = %job.flow_id,
            session_id = %event.session_id,
            risk = %alert.risk_type,
            source = ?outcome.source,
            "intervention ready: {}",
            outcome.text
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::fake::FakeGenerationBackend;
    use crate::persistence::MemoryTraceStore;
    use mira_common::{CognitiveState, ExecutionResult, GenerationSource, RiskType, Severity};

    fn submission(session: &str, exercise: &str, code: &str, passed: bool) -> SubmissionEvent {
        SubmissionEvent {
            session_id: session.to_string(),
            student_id: "stu1".to_string(),
            exercise_id: exercise.to_string(),
            code: code.to_string(),
            execution: if passed {
                ExecutionResult::passing(3)
            } else {
                ExecutionResult::failing(1, 3, "assertion failed")
            },
            submitted_at: Utc::now(),
        }
    }

    fn gateway_with(
        store: Arc<MemoryTraceStore>,
        backend: FakeGenerationBackend,
    ) -> Gateway {
        Gateway::new(EngineConfig::default(), store, Arc::new(backend))
    }

    #[tokio::test]
    async fn test_first_submission_end_to_end() {
        let store = Arc::new(MemoryTraceStore::new());
        let gateway = gateway_with(
            Arc::clone(&store),
            FakeGenerationBackend::new(vec![]),
        );

        let outcome = gateway
            .handle_submission(submission("s1", "ex1", "fn main() {}", false))
            .await;
        assert_eq!(outcome.inference.state, CognitiveState::Exploring);

        gateway.drain().await;
        assert_eq!(store.trace_count(), 1);
        assert!(store.flags().is_empty());

        let summary = gateway.session_summary("s1").await.unwrap();
        assert_eq!(summary.total_attempts, 1);
        assert_eq!(summary.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_passing_submission_is_validated() {
        let store = Arc::new(MemoryTraceStore::new());
        let gateway = gateway_with(store, FakeGenerationBackend::new(vec![]));

        let outcome = gateway
            .handle_submission(submission("s1", "ex1", "fn main() { solve() }", true))
            .await;
        assert_eq!(outcome.inference.state, CognitiveState::Validated);

        gateway.drain().await;
        let summary = gateway.session_summary("s1").await.unwrap();
        assert_eq!(summary.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_pasted_code_raises_flag_and_intervention() {
        let store = Arc::new(MemoryTraceStore::new());
        let gateway = gateway_with(
            Arc::clone(&store),
            FakeGenerationBackend::new(vec![Ok("take it slower".to_string())]),
        );

        gateway
            .handle_submission(submission("s1", "ex1", "short", false))
            .await;
        gateway.drain().await;

        // Second submission: 200+ chars seconds later, same exercise
        let pasted = "x".repeat(300);
        gateway
            .handle_submission(submission("s1", "ex1", &pasted, false))
            .await;
        gateway.drain().await;

        let flags = store.flags();
        assert!(flags
            .iter()
            .any(|f| f.risk_type == RiskType::CopyPaste && f.severity >= Severity::High));
    }

    #[tokio::test]
    async fn test_hint_path_flags_and_resets() {
        let store = Arc::new(MemoryTraceStore::new());
        let gateway = gateway_with(store, FakeGenerationBackend::new(vec![]));

        let hint = HintEvent {
            session_id: "s1".to_string(),
            student_id: "stu1".to_string(),
            exercise_id: "ex1".to_string(),
            hint_level: Some(1),
            requested_at: Utc::now(),
        };
        let result = gateway.handle_hint_request(&hint).await;
        assert_eq!(result.flags.len(), 1);
        assert_eq!(result.flags[0].risk_type, RiskType::HintDependency);

        let summary = gateway.session_summary("s1").await.unwrap();
        assert_eq!(summary.hints_requested, 1);
    }

    #[tokio::test]
    async fn test_prompt_path_uses_fallback_when_backend_down() {
        let store = Arc::new(MemoryTraceStore::new());
        let gateway = gateway_with(store, FakeGenerationBackend::always_failing());

        let prompt = PromptEvent {
            session_id: "s1".to_string(),
            student_id: "stu1".to_string(),
            exercise_id: "ex1".to_string(),
            text: "why does my loop never end?".to_string(),
            sent_at: Utc::now(),
        };
        let outcome = gateway.handle_prompt(&prompt).await;
        assert_eq!(outcome.source, GenerationSource::Fallback);
        assert!(!outcome.text.is_empty());

        let stats = gateway.circuit_stats(GENERATION_DEPENDENCY).unwrap();
        assert_eq!(stats.stats.failures, 1);
    }

    #[tokio::test]
    async fn test_analyze_attempt_inline_surface() {
        let store = Arc::new(MemoryTraceStore::new());
        let gateway = gateway_with(store, FakeGenerationBackend::new(vec![]));

        // Seed a session so the record exists
        gateway
            .handle_submission(submission("s1", "ex1", "a", false))
            .await;
        gateway.drain().await;

        let pasted = "y".repeat(250);
        let result = gateway
            .analyze_attempt(
                submission("s1", "ex1", &pasted, false),
                Some(1),
                0.5,
                vec!["a".to_string()],
            )
            .await;
        assert!(result
            .flags
            .iter()
            .any(|f| f.risk_type == RiskType::CopyPaste));
    }

    #[tokio::test]
    async fn test_sweep_and_end_session() {
        let store = Arc::new(MemoryTraceStore::new());
        let gateway = gateway_with(store, FakeGenerationBackend::new(vec![]));

        gateway
            .handle_submission(submission("s1", "ex1", "a", false))
            .await;
        gateway.drain().await;
        assert_eq!(gateway.active_sessions().await, 1);

        // Fresh session survives the sweep at the configured TTL
        assert_eq!(gateway.sweep_sessions().await, 0);
        assert!(gateway.end_session("s1").await);
        assert_eq!(gateway.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_analysis_failure_never_blocks_submission() {
        // Trace store that fails reads and writes
        struct BrokenStore;
        #[async_trait::async_trait]
        impl crate::persistence::TraceStore for BrokenStore {
            async fn create_trace(&self, _: TraceRecord) -> anyhow::Result<()> {
                anyhow::bail!("db down")
            }
            async fn create_risk_flag(&self, _: RiskFlagRecord) -> anyhow::Result<()> {
                anyhow::bail!("db down")
            }
            async fn recent_traces(
                &self,
                _: &str,
                _: usize,
            ) -> anyhow::Result<Vec<TraceRecord>> {
                anyhow::bail!("db down")
            }
        }

        let gateway = Gateway::new(
            EngineConfig::default(),
            Arc::new(BrokenStore),
            Arc::new(FakeGenerationBackend::new(vec![])),
        );

        // The primary path still completes and infers
        let outcome = gateway
            .handle_submission(submission("s1", "ex1", "fn main() {}", false))
            .await;
        assert_eq!(outcome.inference.state, CognitiveState::Exploring);
        gateway.drain().await;
    }
}
