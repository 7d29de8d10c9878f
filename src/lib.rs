//! # rkit-core
//!
//! Strategy discovery and validation pipeline for systematic trading
//! research: unstructured research artifacts go in, rigorously validated
//! strategies with immutable evidence and structured learnings come out.
//!
//! ## Core Components
//!
//! - **Record store**: file-addressed strategy/validation/learning records
//!   with hash-chained identity and a state machine per record
//! - **Ingestion filter**: specificity and trust scoring, red flags, and
//!   accept/queue/archive/reject routing
//! - **Code generator**: deterministic artifact emission with
//!   framework-controlled dates and a logic fingerprint gate
//! - **Walk-forward executor**: parallel non-overlapping windows, regime
//!   tagging, and bootstrap/multiple-testing statistics
//! - **Persona orchestrator**: isolated analyst sub-agents synthesized
//!   into learnings, proposals, and ideas
//!
//! ## Example
//!
//! ```rust,ignore
//! use rkit_core::{Ingestor, Pipeline, Workspace};
//!
//! let workspace = Workspace::open("~/research")?;
//! let outcome = ingestor.ingest_draft(&draft)?;
//! if let Some(id) = outcome.strategy_id {
//!     let validation = pipeline.run(id, false).await?;
//!     println!("{}", validation.outcome.verdict.label());
//! }
//! ```

pub mod backtest;
pub mod codegen;
pub mod config;
pub mod error;
pub mod hash;
pub mod ingest;
pub mod llm;
pub mod persona;
pub mod pipeline;
pub mod proposal;
pub mod record;
pub mod registry;
pub mod regime;
pub mod similarity;
pub mod stats;
pub mod verify;
pub mod workspace;

// Re-exports for convenience
pub use backtest::{
    plan_non_overlapping, plan_windows, BacktestBackend, BacktestRun, DateRange, ExecutionResult,
    ReturnSeries, SimBacktestBackend, TradeRecord, WalkForwardExecutor, WindowMetrics,
};
pub use codegen::{BacktestArtifact, CodeGenerator, LogicFingerprint, GENERATOR_VERSION};
pub use config::{
    Correction, GateConfig, IngestConfig, PersonaConfig, PipelineConfig, QueueConfig, StatsConfig,
    WindowConfig,
};
pub use error::{Error, Result};
pub use ingest::{
    ClaimedPerformance, HardFlag, IngestOutcome, Ingestor, QualityAssessment, SoftFlag,
    SourceMeta, StrategyDraft, TrustBreakdown,
};
pub use llm::{AgentTask, AnthropicClient, ClientConfig, OutputSchema, SubAgentClient};
pub use persona::{
    AnalysisContext, PersonaOrchestrator, PersonaReport, Synthesis, SynthesisStatus,
};
pub use pipeline::Pipeline;
pub use proposal::{approve_idea, lineage_would_cycle, prune_ideas, ApprovalEffect, ProposalQueue};
pub use record::{
    IdeaId, IdeaRecord, LearningRecord, ProposalId, ProposalKind, ProposalRecord, ProposalStatus,
    RecordStore, StrategyDefinition, StrategyFilter, StrategyId, StrategyRecord, StrategyState,
    StrategyTier, ValidationId, ValidationRecord,
};
pub use registry::{DataRegistry, DataTier, DatasetEntry};
pub use regime::{RegimeTag, RegimeTagger, ReferenceSeries};
pub use similarity::{MatchKind, SimilarityIndex};
pub use stats::{AggregateMetrics, GateResult, StatisticalValidator, ValidationOutcome, Verdict};
pub use verify::{VerificationEngine, VerificationReport};
pub use workspace::Workspace;
