//! Types for multi-persona analysis.

use serde::{Deserialize, Serialize};

use crate::record::types::StrategyDefinition;
use crate::stats::AggregateMetrics;

/// What a persona sees: validation aggregates, regime breakdown, and the
/// definition. Nothing else — personas never see each other's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub strategy_name: String,
    pub definition: StrategyDefinition,
    pub aggregate: AggregateMetrics,
    pub verdict: String,
}

impl AnalysisContext {
    /// Render the context block shared by every persona prompt.
    pub fn prompt_block(&self) -> String {
        let mut block = String::new();
        block.push_str(&format!("Strategy: {}\n", self.strategy_name));
        block.push_str(&format!("Statistical verdict: {}\n", self.verdict));
        block.push_str(&format!(
            "Windows: {} | mean Sharpe {:.2} (95% CI {:.2}..{:.2}) | consistency {:.0}%\n",
            self.aggregate.window_count,
            self.aggregate.mean_sharpe,
            self.aggregate.sharpe_ci.0,
            self.aggregate.sharpe_ci.1,
            self.aggregate.consistency * 100.0,
        ));
        block.push_str(&format!(
            "Adjusted p-value {:.4} ({} correction, family of {}) | worst drawdown {:.0}% | {} trades\n",
            self.aggregate.p_adjusted,
            self.aggregate.correction,
            self.aggregate.family_size,
            self.aggregate.worst_drawdown * 100.0,
            self.aggregate.total_trades,
        ));
        block.push_str("Per-regime Sharpe:\n");
        for regime in &self.aggregate.per_regime {
            block.push_str(&format!(
                "  {} : {:.2} over {} windows\n",
                regime.regime, regime.mean_sharpe, regime.window_count
            ));
        }
        block.push_str(&format!(
            "Entry rules: {:?}\nExit rules: {:?}\nUniverse: {:?}\n",
            self.definition.entry, self.definition.exit, self.definition.universe.symbols
        ));
        block
    }
}

/// One persona's structured report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaReport {
    pub persona: String,
    pub assessment: String,
    pub concerns: Vec<String>,
    pub actions: Vec<String>,
    /// 0.0-1.0
    pub confidence: f64,
}

/// Outcome of one persona dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum PersonaOutcome {
    Responded { report: PersonaReport },
    /// Timed out or failed; synthesis proceeds without it
    Missing { persona: String, reason: String },
}

impl PersonaOutcome {
    pub fn report(&self) -> Option<&PersonaReport> {
        match self {
            Self::Responded { report } => Some(report),
            Self::Missing { .. } => None,
        }
    }

    pub fn persona_name(&self) -> &str {
        match self {
            Self::Responded { report } => &report.persona,
            Self::Missing { persona, .. } => persona,
        }
    }
}

/// Synthesizer status over the persona panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SynthesisStatus {
    Validated,
    Conditional,
    Invalidated,
}

impl SynthesisStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VALIDATED" => Some(Self::Validated),
            "CONDITIONAL" => Some(Self::Conditional),
            "INVALIDATED" => Some(Self::Invalidated),
            _ => None,
        }
    }
}

/// The synthesizer's combined judgment plus everything harvested from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub status: SynthesisStatus,
    pub consensus: String,
    pub disagreements: Vec<String>,
    pub actions: Vec<String>,
    /// Structured proposals: strategies worth combining
    pub proposed_combinations: Vec<String>,
    /// Structured proposals: datasets worth acquiring
    pub data_recommendations: Vec<String>,
    /// Idea sketches for the idea store
    pub new_ideas: Vec<String>,
    /// Personas that never responded
    pub missing: Vec<String>,
    /// The individual reports the synthesis drew on
    pub reports: Vec<PersonaReport>,
}
