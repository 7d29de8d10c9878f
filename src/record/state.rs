//! Strategy record state machine.
//!
//! A record moves strictly forward through the pipeline; the transition
//! table here is the only authority on legal moves. Terminal verdict states
//! are never left. `ERROR` is recoverable: the faulted stage may be
//! re-entered once its cause is addressed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a strategy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyState {
    Pending,
    Verifying,
    Blocked,
    ReadyToGenerate,
    Generating,
    GenFailed,
    /// Tier-3 generated code awaiting human review
    NeedsReview,
    ReadyToExecute,
    Executing,
    Analyzing,
    Validated,
    Conditional,
    Invalidated,
    Archived,
    Rejected,
    Error,
}

impl StrategyState {
    /// Directory name under `strategies/` for records in this state.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verifying => "verifying",
            Self::Blocked => "blocked",
            Self::ReadyToGenerate => "ready_to_generate",
            Self::Generating => "generating",
            Self::GenFailed => "gen_failed",
            Self::NeedsReview => "needs_review",
            Self::ReadyToExecute => "ready_to_execute",
            Self::Executing => "executing",
            Self::Analyzing => "analyzing",
            Self::Validated => "validated",
            Self::Conditional => "conditional",
            Self::Invalidated => "invalidated",
            Self::Archived => "archived",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }

    /// All states, in pipeline order. Used to enumerate store partitions.
    pub fn all() -> [Self; 16] {
        [
            Self::Pending,
            Self::Verifying,
            Self::Blocked,
            Self::ReadyToGenerate,
            Self::Generating,
            Self::GenFailed,
            Self::NeedsReview,
            Self::ReadyToExecute,
            Self::Executing,
            Self::Analyzing,
            Self::Validated,
            Self::Conditional,
            Self::Invalidated,
            Self::Archived,
            Self::Rejected,
            Self::Error,
        ]
    }

    /// Terminal states are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Validated
                | Self::Conditional
                | Self::Invalidated
                | Self::Archived
                | Self::Rejected
        )
    }

    /// Whether the transition `self -> to` is legal.
    pub fn can_transition(&self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        // Any non-terminal state may fault.
        if to == Self::Error && *self != Self::Error {
            return true;
        }
        matches!(
            (self, to),
            (Self::Pending, Self::Verifying)
                | (Self::Pending, Self::Archived)
                | (Self::Pending, Self::Rejected)
                | (Self::Verifying, Self::Blocked)
                | (Self::Verifying, Self::ReadyToGenerate)
                | (Self::Blocked, Self::Verifying)
                | (Self::ReadyToGenerate, Self::Generating)
                | (Self::Generating, Self::GenFailed)
                | (Self::Generating, Self::NeedsReview)
                | (Self::Generating, Self::ReadyToExecute)
                | (Self::GenFailed, Self::Generating)
                | (Self::NeedsReview, Self::ReadyToExecute)
                | (Self::NeedsReview, Self::Blocked)
                | (Self::ReadyToExecute, Self::Executing)
                | (Self::Executing, Self::Analyzing)
                | (Self::Analyzing, Self::Validated)
                | (Self::Analyzing, Self::Conditional)
                | (Self::Analyzing, Self::Invalidated)
                | (Self::Error, Self::Verifying)
                | (Self::Error, Self::Generating)
                | (Self::Error, Self::Executing)
                | (Self::Error, Self::Analyzing)
        )
    }
}

impl std::fmt::Display for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Verifying => "VERIFYING",
            Self::Blocked => "BLOCKED",
            Self::ReadyToGenerate => "READY_TO_GENERATE",
            Self::Generating => "GENERATING",
            Self::GenFailed => "GEN_FAILED",
            Self::NeedsReview => "NEEDS_REVIEW",
            Self::ReadyToExecute => "READY_TO_EXECUTE",
            Self::Executing => "EXECUTING",
            Self::Analyzing => "ANALYZING",
            Self::Validated => "VALIDATED",
            Self::Conditional => "CONDITIONAL",
            Self::Invalidated => "INVALIDATED",
            Self::Archived => "ARCHIVED",
            Self::Rejected => "REJECTED",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// One logged state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: StrategyState,
    pub to: StrategyState,
    pub at: DateTime<Utc>,
    pub cause: String,
}

impl Transition {
    pub fn new(from: StrategyState, to: StrategyState, cause: impl Into<String>) -> Self {
        Self {
            from,
            to,
            at: Utc::now(),
            cause: cause.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_legal() {
        use StrategyState::*;
        let path = [
            Pending,
            Verifying,
            ReadyToGenerate,
            Generating,
            ReadyToExecute,
            Executing,
            Analyzing,
            Validated,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_terminal_states_never_left() {
        use StrategyState::*;
        for terminal in [Validated, Conditional, Invalidated, Archived, Rejected] {
            for target in StrategyState::all() {
                assert!(
                    !terminal.can_transition(target),
                    "{terminal} -> {target} must be illegal"
                );
            }
        }
    }

    #[test]
    fn test_backward_transitions_forbidden() {
        use StrategyState::*;
        assert!(!Executing.can_transition(Verifying));
        assert!(!Analyzing.can_transition(Executing));
        assert!(!ReadyToExecute.can_transition(Generating));
        assert!(!Verifying.can_transition(Pending));
    }

    #[test]
    fn test_error_is_recoverable_into_stages() {
        use StrategyState::*;
        assert!(Executing.can_transition(Error));
        assert!(Error.can_transition(Executing));
        assert!(Error.can_transition(Verifying));
        assert!(!Error.can_transition(Validated));
        assert!(!Error.can_transition(Error));
    }

    #[test]
    fn test_tier3_review_gate() {
        use StrategyState::*;
        assert!(Generating.can_transition(NeedsReview));
        assert!(NeedsReview.can_transition(ReadyToExecute));
        // Review cannot be skipped backwards into generation
        assert!(!NeedsReview.can_transition(Generating));
    }

    #[test]
    fn test_dir_names_are_unique() {
        let mut names: Vec<&str> = StrategyState::all().iter().map(|s| s.dir_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), StrategyState::all().len());
    }

    #[test]
    fn test_serde_round_trip() {
        for state in StrategyState::all() {
            let yaml = serde_yaml::to_string(&state).unwrap();
            let parsed: StrategyState = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(state, parsed);
        }
    }
}
