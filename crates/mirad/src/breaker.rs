//! Circuit breaker for the generation dependency.
//!
//! One named breaker per protected dependency, held in a registry. Callers
//! acquire a scoped permit before the call and report the outcome on it;
//! dropping a permit unreported counts as a failure so unhandled faults are
//! never lost. Rejection is a typed outcome distinct from dependency
//! failure, so callers can fall back without doing their own failure
//! accounting.
//!
//! Transitions:
//! - Closed -> Open after `failure_threshold` consecutive failures
//! - Open -> HalfOpen on the first acquire after `recovery_timeout`
//! - HalfOpen -> Closed after `success_threshold` consecutive successes
//! - HalfOpen -> Open on any failure
//! - HalfOpen admits at most `half_open_max_calls` in-flight trials

use crate::config::CircuitConfig;
use mira_common::{CircuitSnapshot, CircuitState, CircuitStats};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Tuning for one breaker. Durations are concrete so tests can probe
/// recovery with millisecond cooldowns.
#[derive(Debug, Clone)]
pub struct CircuitSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
    pub success_threshold: u32,
}

impl From<&CircuitConfig> for CircuitSettings {
    fn from(cfg: &CircuitConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold,
            recovery_timeout: Duration::from_secs(cfg.recovery_timeout_seconds),
            half_open_max_calls: cfg.half_open_max_calls,
            success_threshold: cfg.success_threshold,
        }
    }
}

/// Why an acquire was refused. Not a dependency failure.
#[derive(Debug, Error)]
pub enum CircuitRejection {
    #[error("circuit '{name}' is open")]
    Open { name: String },

    #[error("circuit '{name}' half-open trial quota exhausted")]
    TrialQuotaExhausted { name: String },
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    last_failure_at: Option<Instant>,
    stats: CircuitStats,
}

/// Fault-tolerance state machine guarding one named dependency.
pub struct CircuitBreaker {
    name: String,
    settings: CircuitSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: CircuitSettings) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_in_flight: 0,
                last_failure_at: None,
                stats: CircuitStats::default(),
            }),
        })
    }

    /// Never blocks on a poisoned lock: the inner state stays consistent
    /// because every mutation is a handful of counter writes.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask to make one protected call. The returned permit must be reported
    /// with `success()` or `failure()`; dropping it unreported records a
    /// failure.
    pub fn acquire(self: &Arc<Self>) -> Result<CircuitPermit, CircuitRejection> {
        let mut inner = self.lock();
        inner.stats.total_calls += 1;

        match inner.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .map(|t| t.elapsed() >= self.settings.recovery_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    Self::transition(&mut inner, &self.name, CircuitState::HalfOpen);
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 1;
                    Ok(self.permit(true))
                } else {
                    inner.stats.rejections += 1;
                    debug!(circuit = %self.name, "rejecting call, circuit open");
                    Err(CircuitRejection::Open {
                        name: self.name.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.settings.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Ok(self.permit(true))
                } else {
                    inner.stats.rejections += 1;
                    debug!(circuit = %self.name, "rejecting call, trial quota exhausted");
                    Err(CircuitRejection::TrialQuotaExhausted {
                        name: self.name.clone(),
                    })
                }
            }
        }
    }

    fn permit(self: &Arc<Self>, trial: bool) -> CircuitPermit {
        CircuitPermit {
            breaker: Arc::clone(self),
            trial,
            reported: false,
        }
    }

    fn transition(inner: &mut Inner, name: &str, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.stats.state_changes += 1;
        match to {
            CircuitState::Open => warn!(circuit = name, %from, %to, "circuit state change"),
            _ => info!(circuit = name, %from, %to, "circuit state change"),
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        inner.stats.successes += 1;
        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if trial => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.settings.success_threshold {
                    Self::transition(&mut inner, &self.name, CircuitState::Closed);
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 0;
                }
            }
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        inner.stats.failures += 1;
        inner.last_failure_at = Some(Instant::now());
        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    Self::transition(&mut inner, &self.name, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // A single trial failure reopens the circuit
                Self::transition(&mut inner, &self.name, CircuitState::Open);
                inner.half_open_successes = 0;
                inner.half_open_in_flight = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            stats: inner.stats,
        }
    }
}

/// Scoped permission for one protected call.
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    reported: bool,
}

impl CircuitPermit {
    pub fn success(mut self) {
        self.reported = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.on_failure(self.trial);
        }
    }
}

/// All breakers in the process, by dependency name.
pub struct CircuitRegistry {
    settings: CircuitSettings,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    pub fn new(settings: CircuitSettings) -> Self {
        Self {
            settings,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| CircuitBreaker::new(name, self.settings.clone())),
        )
    }

    pub fn snapshot(&self, name: &str) -> Option<CircuitSnapshot> {
        self.breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|b| b.snapshot())
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<CircuitSnapshot> = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|b| b.snapshot())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(recovery: Duration) -> CircuitSettings {
        CircuitSettings {
            failure_threshold: 5,
            recovery_timeout: recovery,
            half_open_max_calls: 3,
            success_threshold: 2,
        }
    }

    fn fail_times(breaker: &Arc<CircuitBreaker>, n: usize) {
        for _ in 0..n {
            breaker.acquire().unwrap().failure();
        }
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("gen", settings(Duration::from_secs(30)));
        fail_times(&breaker, 4);
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail_times(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let breaker = CircuitBreaker::new("gen", settings(Duration::from_secs(30)));
        fail_times(&breaker, 4);
        breaker.acquire().unwrap().success();
        fail_times(&breaker, 4);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_circuit_rejects_before_cooldown() {
        let breaker = CircuitBreaker::new("gen", settings(Duration::from_secs(30)));
        fail_times(&breaker, 5);
        match breaker.acquire() {
            Err(CircuitRejection::Open { name }) => assert_eq!(name, "gen"),
            other => panic!("expected open rejection, got {:?}", other.is_ok()),
        }
        assert_eq!(breaker.snapshot().stats.rejections, 1);
    }

    #[test]
    fn test_cooldown_admits_trial_and_successes_close() {
        let breaker = CircuitBreaker::new("gen", settings(Duration::from_millis(10)));
        fail_times(&breaker, 5);
        std::thread::sleep(Duration::from_millis(20));

        let trial = breaker.acquire().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        trial.success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.acquire().unwrap().success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("gen", settings(Duration::from_millis(10)));
        fail_times(&breaker, 5);
        std::thread::sleep(Duration::from_millis(20));

        let trial = breaker.acquire().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        trial.failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // And the fresh failure restarts the cooldown
        assert!(matches!(
            breaker.acquire(),
            Err(CircuitRejection::Open { .. })
        ));
    }

    #[test]
    fn test_half_open_trial_quota() {
        let breaker = CircuitBreaker::new("gen", settings(Duration::from_millis(10)));
        fail_times(&breaker, 5);
        std::thread::sleep(Duration::from_millis(20));

        let p1 = breaker.acquire().unwrap();
        let p2 = breaker.acquire().unwrap();
        let p3 = breaker.acquire().unwrap();
        assert!(matches!(
            breaker.acquire(),
            Err(CircuitRejection::TrialQuotaExhausted { .. })
        ));

        // Finishing a trial frees a slot
        p1.success();
        let p4 = breaker.acquire();
        assert!(p4.is_ok());
        drop(p2);
        drop(p3);
    }

    #[test]
    fn test_dropped_permit_counts_as_failure() {
        let breaker = CircuitBreaker::new("gen", settings(Duration::from_secs(30)));
        for _ in 0..5 {
            drop(breaker.acquire().unwrap());
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().stats.failures, 5);
    }

    #[test]
    fn test_stats_counters() {
        let breaker = CircuitBreaker::new("gen", settings(Duration::from_secs(30)));
        breaker.acquire().unwrap().success();
        fail_times(&breaker, 5);
        let _ = breaker.acquire(); // rejected

        let snap = breaker.snapshot();
        assert_eq!(snap.stats.total_calls, 7);
        assert_eq!(snap.stats.successes, 1);
        assert_eq!(snap.stats.failures, 5);
        assert_eq!(snap.stats.rejections, 1);
        assert_eq!(snap.stats.state_changes, 1);
    }

    #[test]
    fn test_registry_reuses_breaker_by_name() {
        let registry = CircuitRegistry::new(settings(Duration::from_secs(30)));
        let a = registry.get_or_create("gen");
        let b = registry.get_or_create("gen");
        assert!(Arc::ptr_eq(&a, &b));

        a.acquire().unwrap().failure();
        assert_eq!(registry.snapshot("gen").unwrap().stats.failures, 1);
        assert!(registry.snapshot("other").is_none());
    }
}
