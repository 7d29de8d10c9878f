//! Multi-persona analysis of validation results.

pub mod orchestrator;
pub mod roster;
pub mod types;

pub use orchestrator::{HarvestSummary, PersonaOrchestrator};
pub use roster::{resolve_roster, Persona};
pub use types::{
    AnalysisContext, PersonaOutcome, PersonaReport, Synthesis, SynthesisStatus,
};
