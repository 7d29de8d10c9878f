//! Pipeline configuration.
//!
//! Gates, thresholds, enabled checks, and the persona roster all live in a
//! single validated configuration object loaded from the workspace's
//! `research-kit.yaml`. Every recognized option is enumerated here; unknown
//! keys in the file are rejected at load time.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Multiple-testing correction applied to raw p-values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    /// Benjamini-Hochberg false discovery rate (default)
    Fdr,
    /// Bonferroni family-wise correction
    Bonferroni,
}

impl std::fmt::Display for Correction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fdr => write!(f, "fdr"),
            Self::Bonferroni => write!(f, "bonferroni"),
        }
    }
}

/// Statistical gates a validation must pass for a `VALIDATED` verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Minimum mean window Sharpe
    pub min_sharpe: f64,
    /// Minimum fraction of windows with Sharpe > 0
    pub min_consistency: f64,
    /// Maximum tolerated drawdown across windows (positive fraction)
    pub max_drawdown: f64,
    /// Minimum total trade count across windows
    pub min_trades: u64,
    /// Significance level applied to the adjusted p-value
    pub adjusted_alpha: f64,
    /// Correction method for the adjusted p-value
    pub correction: Correction,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_sharpe: 0.5,
            min_consistency: 0.6,
            max_drawdown: 0.35,
            min_trades: 100,
            adjusted_alpha: 0.05,
            correction: Correction::Fdr,
        }
    }
}

/// Walk-forward window plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    /// Number of non-overlapping windows
    pub window_count: usize,
    /// Span of each window in calendar years
    pub window_span_years: u32,
    /// Maximum windows dispatched concurrently
    pub max_parallel: usize,
    /// Per-window backend deadline in seconds
    pub timeout_secs: u64,
    /// Retry budget for a timed-out window
    pub max_retries: u32,
    /// Windows allowed to fail before the whole validation errors
    pub max_failed_windows: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_count: 12,
            window_span_years: 3,
            max_parallel: 4,
            timeout_secs: 900,
            max_retries: 3,
            max_failed_windows: 2,
        }
    }
}

/// Ingestion quality thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    /// Minimum specificity score (0-8) to be testable
    pub specificity_threshold: u8,
    /// Minimum trust score (0-100) to be worth testing
    pub trust_threshold: i32,
    /// Trust band [queue_threshold, trust_threshold) routed to human review
    pub queue_threshold: i32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            specificity_threshold: 4,
            trust_threshold: 50,
            queue_threshold: 45,
        }
    }
}

/// Persona analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaConfig {
    /// Roster of persona names to dispatch
    pub personas: Vec<String>,
    /// Minimum responding personas for synthesis to proceed
    pub quorum: usize,
    /// Per-persona deadline in seconds
    pub timeout_secs: u64,
    /// Maximum personas dispatched concurrently
    pub max_parallel: usize,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            personas: vec![
                "momentum-trader".to_string(),
                "risk-manager".to_string(),
                "quant-researcher".to_string(),
                "contrarian".to_string(),
                "mad-genius".to_string(),
            ],
            quorum: 3,
            timeout_secs: 120,
            max_parallel: 5,
        }
    }
}

/// Statistical validator knobs that are not gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsConfig {
    /// Bootstrap resample count for confidence intervals
    pub bootstrap_resamples: usize,
    /// Seed for bootstrap resampling (recorded with the validation)
    pub bootstrap_seed: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            bootstrap_resamples: 2000,
            bootstrap_seed: 7,
        }
    }
}

/// Proposal queue housekeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Days a deferred proposal survives before TTL purge
    pub deferred_ttl_days: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            deferred_ttl_days: 30,
        }
    }
}

/// The single pipeline configuration object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub gates: GateConfig,
    pub windows: WindowConfig,
    pub ingest: IngestConfig,
    pub personas: PersonaConfig,
    pub stats: StatsConfig,
    pub queue: QueueConfig,
    /// Verification checks to run; empty means the default set
    pub enabled_checks: Vec<String>,
}

impl PipelineConfig {
    /// Load and validate configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// A stricter preset for production catalogs: tighter gates, larger
    /// bootstrap, full persona roster required.
    pub fn conservative() -> Self {
        Self {
            gates: GateConfig {
                min_sharpe: 0.8,
                min_consistency: 0.75,
                max_drawdown: 0.25,
                min_trades: 250,
                adjusted_alpha: 0.01,
                correction: Correction::Bonferroni,
            },
            stats: StatsConfig {
                bootstrap_resamples: 5000,
                ..StatsConfig::default()
            },
            personas: PersonaConfig {
                quorum: 5,
                ..PersonaConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.gates.min_consistency < 0.0 || self.gates.min_consistency > 1.0 {
            return Err(Error::Config(format!(
                "min_consistency must be in [0, 1], got {}",
                self.gates.min_consistency
            )));
        }
        if self.gates.adjusted_alpha <= 0.0 || self.gates.adjusted_alpha >= 1.0 {
            return Err(Error::Config(format!(
                "adjusted_alpha must be in (0, 1), got {}",
                self.gates.adjusted_alpha
            )));
        }
        if self.gates.max_drawdown <= 0.0 {
            return Err(Error::Config(
                "max_drawdown must be a positive fraction".to_string(),
            ));
        }
        if self.windows.window_count == 0 {
            return Err(Error::Config("window_count must be at least 1".to_string()));
        }
        if self.windows.window_span_years == 0 {
            return Err(Error::Config(
                "window_span_years must be at least 1".to_string(),
            ));
        }
        if self.windows.max_parallel == 0 || self.personas.max_parallel == 0 {
            return Err(Error::Config("max_parallel must be at least 1".to_string()));
        }
        if self.personas.quorum == 0 || self.personas.quorum > self.personas.personas.len() {
            return Err(Error::Config(format!(
                "quorum {} is outside the roster of {} personas",
                self.personas.quorum,
                self.personas.personas.len()
            )));
        }
        if self.ingest.specificity_threshold > 8 {
            return Err(Error::Config(
                "specificity_threshold cannot exceed 8".to_string(),
            ));
        }
        if self.ingest.queue_threshold > self.ingest.trust_threshold {
            return Err(Error::Config(
                "queue_threshold must not exceed trust_threshold".to_string(),
            ));
        }
        if self.stats.bootstrap_resamples < 1000 {
            return Err(Error::Config(
                "bootstrap_resamples must be at least 1000".to_string(),
            ));
        }
        Ok(())
    }
}
