//! Session-scoped state store.
//!
//! One record per active tutoring session: attempt counters, a bounded ring
//! of recent attempts, hint counters, and the alert dedup set. The store owns
//! the only lock; records are never handed out by reference, only cloned as
//! snapshots or mutated under `mutate`. TTL expiry is driven by the
//! monotonic clock, never wall time.

use crate::clock;
use chrono::{DateTime, Utc};
use mira_common::SessionSummary;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Recent-attempt ring capacity. Overflow evicts the oldest entry.
pub const RECENT_ATTEMPTS_CAP: usize = 10;

/// One entry in a session's recent-attempt ring.
#[derive(Debug, Clone)]
pub struct RecentAttempt {
    pub attempt_number: u32,
    pub code_length: usize,
    pub seconds_since_last: f64,
    pub succeeded: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Mutable per-session state. Only ever touched under the store lock.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub student_id: String,
    pub total_attempts: u32,
    pub consecutive_failures: u32,
    pub hints_requested: u32,
    pub attempts_since_last_hint: u32,
    pub recent_attempts: VecDeque<RecentAttempt>,
    /// Keys of alerts already raised this session ("{risk_type}:{exercise}").
    pub alerts_sent: HashSet<String>,
    /// Start of the current failure streak; cleared on success.
    pub first_failure_at: Option<Instant>,
    pub last_activity: Instant,
}

impl SessionRecord {
    fn new(session_id: &str, student_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
            total_attempts: 0,
            consecutive_failures: 0,
            hints_requested: 0,
            attempts_since_last_hint: 0,
            recent_attempts: VecDeque::with_capacity(RECENT_ATTEMPTS_CAP),
            alerts_sent: HashSet::new(),
            first_failure_at: None,
            last_activity: clock::monotonic_now(),
        }
    }

    /// Record one attempt and return its attempt number. Success resets the
    /// failure streak; failure extends it and anchors the streak start.
    pub fn note_attempt(
        &mut self,
        code_length: usize,
        succeeded: bool,
        seconds_since_last: f64,
    ) -> u32 {
        self.total_attempts += 1;
        self.attempts_since_last_hint += 1;

        if succeeded {
            self.consecutive_failures = 0;
            self.first_failure_at = None;
        } else {
            self.consecutive_failures += 1;
            if self.first_failure_at.is_none() {
                self.first_failure_at = Some(clock::monotonic_now());
            }
        }

        if self.recent_attempts.len() == RECENT_ATTEMPTS_CAP {
            self.recent_attempts.pop_front();
        }
        self.recent_attempts.push_back(RecentAttempt {
            attempt_number: self.total_attempts,
            code_length,
            seconds_since_last,
            succeeded,
            recorded_at: Utc::now(),
        });

        self.total_attempts
    }

    /// Record a hint request. The attempts-between-hints counter is reset by
    /// the hint detector after it has read the pre-reset value.
    pub fn note_hint(&mut self) {
        self.hints_requested += 1;
    }

    /// Failed attempts among the newest `window` ring entries.
    pub fn failures_in_window(&self, window: usize) -> usize {
        self.recent_attempts
            .iter()
            .rev()
            .take(window)
            .filter(|a| !a.succeeded)
            .count()
    }

    /// Insert an alert dedup key. Returns true if this is the first time the
    /// key is seen this session.
    pub fn mark_alerted(&mut self, key: String) -> bool {
        self.alerts_sent.insert(key)
    }

    pub fn summary(&self) -> SessionSummary {
        let mut alerts: Vec<String> = self.alerts_sent.iter().cloned().collect();
        alerts.sort();
        SessionSummary {
            session_id: self.session_id.clone(),
            student_id: self.student_id.clone(),
            total_attempts: self.total_attempts,
            hints_requested: self.hints_requested,
            consecutive_failures: self.consecutive_failures,
            alerts_sent: alerts,
            recent_attempts_count: self.recent_attempts.len(),
        }
    }
}

/// Concurrent map of session ID to session record.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Return a snapshot of the session's record, creating it on first
    /// contact. Always refreshes `last_activity`.
    pub async fn get_or_create(&self, session_id: &str, student_id: &str) -> SessionRecord {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, "creating session record");
                SessionRecord::new(session_id, student_id)
            });
        record.last_activity = clock::monotonic_now();
        record.clone()
    }

    /// Apply `f` to the session's record under the store lock, creating the
    /// record first if needed. Mutations for one session are serialized here,
    /// so counters are never updated out of arrival order.
    pub async fn mutate<R>(
        &self,
        session_id: &str,
        student_id: &str,
        f: impl FnOnce(&mut SessionRecord) -> R,
    ) -> R {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord::new(session_id, student_id));
        let out = f(record);
        record.last_activity = clock::monotonic_now();
        out
    }

    /// Snapshot without refreshing activity (diagnostic read).
    pub async fn snapshot(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Remove every record idle for at least `ttl`. Returns the number
    /// removed; sweeping a clean store removes nothing.
    pub async fn sweep_expired(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| !clock::is_expired(record.last_activity, ttl));
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "swept expired sessions");
        }
        removed
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Explicit removal when a session is known to have ended.
    pub async fn clear(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn summary(&self, session_id: &str) -> Option<SessionSummary> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|r| r.summary())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
