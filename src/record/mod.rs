//! Record store: the single owner of workspace persistence.

pub mod counters;
pub mod index;
pub mod state;
pub mod store;
pub mod types;

pub use counters::IdAllocator;
pub use index::{RecordIndex, StrategyFilter};
pub use state::{StrategyState, Transition};
pub use store::RecordStore;
pub use types::{
    Confidence, DataRequirement, EdgeBlock, EdgeCategory, EdgeProvenance, IdeaId, IdeaRecord,
    IngestDecision, IngestionQuality, LearningRecord, Lineage, ProposalId, ProposalKind,
    ProposalRecord, ProposalStatus, RationaleSource, RegimeAdaptiveSpec, SizingSpec,
    SourceProvenance, StrategyDefinition, StrategyId, StrategyRecord, StrategyTier, UniverseSpec,
    ValidationId, ValidationKey, ValidationRecord, WindowOutcome, WindowStatus,
};
