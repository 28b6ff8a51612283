//! Configuration management for mirad.
//!
//! Loads settings from /etc/mira/config.toml or uses defaults. Every
//! detection threshold is overridable; the defaults are the values the
//! product has been tuned to. Invalid values are rejected at startup.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/mira/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/mira/config.toml";

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity window after which session state is swept
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,

    /// How often the daemon runs the expiry sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_session_ttl() -> u64 {
    7_200 // 2 hours of inactivity
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

/// Cognitive-state inference thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Change ratio above which a rewrite counts as a strategy change
    #[serde(default = "default_structural_change_ratio")]
    pub structural_change_ratio: f64,

    /// Changed-line count below which edits count as debugging
    #[serde(default = "default_debug_change_line_count")]
    pub debug_change_line_count: usize,

    /// Failed attempts within the window that mean the student is stuck
    #[serde(default = "default_stuck_failure_count")]
    pub stuck_failure_count: usize,

    /// How many recent attempts the stuck check looks at
    #[serde(default = "default_stuck_window")]
    pub stuck_window: usize,
}

fn default_structural_change_ratio() -> f64 {
    0.5
}

fn default_debug_change_line_count() -> usize {
    5
}

fn default_stuck_failure_count() -> usize {
    3
}

fn default_stuck_window() -> usize {
    5
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            structural_change_ratio: default_structural_change_ratio(),
            debug_change_line_count: default_debug_change_line_count(),
            stuck_failure_count: default_stuck_failure_count(),
            stuck_window: default_stuck_window(),
        }
    }
}

/// Risk detector thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Typing rate above which a submission looks pasted
    #[serde(default = "default_copy_paste_rate")]
    pub copy_paste_chars_per_second: f64,

    /// Minimum added characters before the copy-paste check applies
    #[serde(default = "default_copy_paste_min_chars")]
    pub copy_paste_min_chars: usize,

    /// Consecutive failures that count as frustration
    #[serde(default = "default_frustration_failure_count")]
    pub frustration_failure_count: u32,

    /// Failures must land within this window to count
    #[serde(default = "default_frustration_window")]
    pub frustration_window_seconds: u64,

    /// Attempts between hints at or below this value mean hint dependency
    #[serde(default = "default_hint_dependency_threshold")]
    pub hint_dependency_threshold: u32,

    /// Cumulative hints above which the hint flag escalates
    #[serde(default = "default_max_hints_before_high")]
    pub max_hints_before_high_severity: u32,

    /// Duplicate submissions at or above this count raise a flag
    #[serde(default = "default_duplicate_count_threshold")]
    pub duplicate_count_threshold: usize,

    /// Jaccard similarity above which two submissions are near-duplicates
    #[serde(default = "default_duplicate_similarity")]
    pub duplicate_similarity_threshold: f64,

    /// Minimum sample size before the near-duplicate fallback runs
    #[serde(default = "default_duplicate_min_sample")]
    pub duplicate_min_sample: usize,

    /// Cap on pairwise similarity comparisons per analysis
    #[serde(default = "default_duplicate_max_pairwise")]
    pub duplicate_max_pairwise: usize,

    /// Budget for one background analysis pass
    #[serde(default = "default_analysis_timeout")]
    pub analysis_timeout_seconds: u64,
}

fn default_copy_paste_rate() -> f64 {
    50.0
}

fn default_copy_paste_min_chars() -> usize {
    100
}

fn default_frustration_failure_count() -> u32 {
    5
}

fn default_frustration_window() -> u64 {
    120
}

fn default_hint_dependency_threshold() -> u32 {
    3
}

fn default_max_hints_before_high() -> u32 {
    5
}

fn default_duplicate_count_threshold() -> usize {
    2
}

fn default_duplicate_similarity() -> f64 {
    0.7
}

fn default_duplicate_min_sample() -> usize {
    5
}

fn default_duplicate_max_pairwise() -> usize {
    10
}

fn default_analysis_timeout() -> u64 {
    3
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            copy_paste_chars_per_second: default_copy_paste_rate(),
            copy_paste_min_chars: default_copy_paste_min_chars(),
            frustration_failure_count: default_frustration_failure_count(),
            frustration_window_seconds: default_frustration_window(),
            hint_dependency_threshold: default_hint_dependency_threshold(),
            max_hints_before_high_severity: default_max_hints_before_high(),
            duplicate_count_threshold: default_duplicate_count_threshold(),
            duplicate_similarity_threshold: default_duplicate_similarity(),
            duplicate_min_sample: default_duplicate_min_sample(),
            duplicate_max_pairwise: default_duplicate_max_pairwise(),
            analysis_timeout_seconds: default_analysis_timeout(),
        }
    }
}

/// Circuit breaker tuning for the generation dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_circuit_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before probing recovery
    #[serde(default = "default_circuit_recovery_timeout")]
    pub recovery_timeout_seconds: u64,

    /// Trial calls admitted while half-open
    #[serde(default = "default_circuit_half_open_max")]
    pub half_open_max_calls: u32,

    /// Consecutive half-open successes before closing
    #[serde(default = "default_circuit_success_threshold")]
    pub success_threshold: u32,
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_recovery_timeout() -> u64 {
    30
}

fn default_circuit_half_open_max() -> u32 {
    3
}

fn default_circuit_success_threshold() -> u32 {
    2
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_circuit_failure_threshold(),
            recovery_timeout_seconds: default_circuit_recovery_timeout(),
            half_open_max_calls: default_circuit_half_open_max(),
            success_threshold: default_circuit_success_threshold(),
        }
    }
}

/// Generation dependency endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Per-call timeout; a timeout counts as a failure for the breaker
    #[serde(default = "default_generation_timeout")]
    pub timeout_seconds: u64,
}

fn default_generation_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_generation_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_generation_timeout() -> u64 {
    30
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            model: default_generation_model(),
            timeout_seconds: default_generation_timeout(),
        }
    }
}

/// Durable-history adapter selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// "memory" keeps traces in-process; "none" disables persistence
    #[serde(default = "default_persistence_mode")]
    pub mode: String,
}

fn default_persistence_mode() -> String {
    "memory".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            mode: default_persistence_mode(),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub circuit: CircuitConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl EngineConfig {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                EngineConfig::default()
            })
    }

    /// Load config from specific path
    pub fn load_from_path(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        info!("Loaded config from {}", path);
        Ok(config)
    }

    /// Reject configurations the engine cannot run with. Called once at
    /// startup; a failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.session.ttl_seconds == 0 {
            bail!("session.ttl_seconds must be positive");
        }
        if self.session.sweep_interval_seconds == 0 {
            bail!("session.sweep_interval_seconds must be positive");
        }
        if !(0.0..=1.0).contains(&self.inference.structural_change_ratio)
            || self.inference.structural_change_ratio == 0.0
        {
            bail!("inference.structural_change_ratio must be in (0.0, 1.0]");
        }
        if self.inference.stuck_failure_count == 0 || self.inference.stuck_window == 0 {
            bail!("inference stuck thresholds must be positive");
        }
        if self.inference.stuck_failure_count > self.inference.stuck_window {
            bail!("inference.stuck_failure_count cannot exceed inference.stuck_window");
        }
        if self.risk.copy_paste_chars_per_second <= 0.0 {
            bail!("risk.copy_paste_chars_per_second must be positive");
        }
        if self.risk.frustration_failure_count == 0 {
            bail!("risk.frustration_failure_count must be positive");
        }
        if !(0.0..=1.0).contains(&self.risk.duplicate_similarity_threshold) {
            bail!("risk.duplicate_similarity_threshold must be in [0.0, 1.0]");
        }
        if self.risk.analysis_timeout_seconds == 0 {
            bail!("risk.analysis_timeout_seconds must be positive");
        }
        if self.circuit.failure_threshold == 0
            || self.circuit.success_threshold == 0
            || self.circuit.half_open_max_calls == 0
        {
            bail!("circuit thresholds must be positive");
        }
        if self.generation.timeout_seconds == 0 {
            bail!("generation.timeout_seconds must be positive");
        }
        if !matches!(self.persistence.mode.as_str(), "memory" | "none") {
            bail!("persistence.mode must be \"memory\" or \"none\"");
        }
        Ok(())
    }
}
