//! Error types for rkit-core.

use thiserror::Error;

/// Result type alias using rkit-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during pipeline operations.
///
/// Gate failures are deliberately *not* errors: an `INVALIDATED` verdict is
/// data recorded on the validation record. The variants here cover the
/// failure taxonomy that halts a stage or rejects a write.
#[derive(Error, Debug)]
pub enum Error {
    /// Source document cannot be turned into a testable strategy
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// A hard red flag fired during ingestion
    #[error("Hard red flag: {flags:?}")]
    HardRedFlag { flags: Vec<String> },

    /// Quality score below the testing threshold
    #[error("Below threshold: {reason}")]
    BelowThreshold { reason: String },

    /// Candidate is a duplicate of an existing strategy
    #[error("Duplicate of {existing_id} (similarity {score:.3})")]
    DuplicateStrategy { existing_id: String, score: f64 },

    /// A data requirement does not resolve against the registry
    #[error("Data unavailable: {requirement} ({detail})")]
    DataUnavailable { requirement: String, detail: String },

    /// Code generation failed
    #[error("Generation failure: {0}")]
    GenerationFailure(String),

    /// Generated code's logic fingerprint disagrees with the document
    #[error("Fingerprint mismatch: {0}")]
    FingerprintMismatch(String),

    /// Backtest backend did not answer within the deadline
    #[error("Backtest timed out after {duration_ms}ms (attempt {attempt})")]
    BacktestTimeout { duration_ms: u64, attempt: u32 },

    /// A single walk-forward window failed
    #[error("Window {window} failed: {message}")]
    WindowError { window: usize, message: String },

    /// A persona sub-agent did not answer within the deadline
    #[error("Persona '{persona}' timed out after {duration_ms}ms")]
    PersonaTimeout { persona: String, duration_ms: u64 },

    /// Optimistic-concurrency violation on a record write
    #[error("State conflict on {id}: expected {expected}, found {found}")]
    StateConflict {
        id: String,
        expected: String,
        found: String,
    },

    /// Illegal state-machine transition
    #[error("Illegal transition for {id}: {from} -> {to}")]
    IllegalTransition { id: String, from: String, to: String },

    /// Re-validation of an already-tested configuration was refused
    #[error("Validation already exists for {definition_hash} (OOS windows are one-shot)")]
    ValidationExists { definition_hash: String },

    /// Generic timeout
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// LLM provider error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// Structured output failed schema validation
    #[error("Schema validation failed for '{task}': {detail}")]
    SchemaValidation { task: String, detail: String },

    /// Record storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a state conflict error.
    pub fn state_conflict(
        id: impl Into<String>,
        expected: impl std::fmt::Display,
        found: impl std::fmt::Display,
    ) -> Self {
        Self::StateConflict {
            id: id.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Create an illegal transition error.
    pub fn illegal_transition(
        id: impl Into<String>,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::IllegalTransition {
            id: id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create a data unavailable error.
    pub fn data_unavailable(requirement: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::DataUnavailable {
            requirement: requirement.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error is recoverable by re-running the faulted stage.
    ///
    /// Recoverable errors leave the record in `ERROR` with a structured
    /// cause; the stage can be retried against the same definition hash.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BacktestTimeout { .. }
                | Self::WindowError { .. }
                | Self::PersonaTimeout { .. }
                | Self::Timeout { .. }
                | Self::LlmApi { .. }
                | Self::GenerationFailure(_)
                | Self::DataUnavailable { .. }
        )
    }
}
