//! Record types persisted by the store.
//!
//! Five entities make up the catalog: strategy records (mutable only via
//! state transitions), immutable validation records, append-only learnings,
//! proposals awaiting human review, and lightweight idea drafts. Identity is
//! content-addressed wherever it matters: the `definition_hash` names a
//! testable configuration and never changes once assigned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::backtest::metrics::WindowMetrics;
use crate::error::{Error, Result};
use crate::hash;
use crate::record::state::{StrategyState, Transition};
use crate::regime::RegimeTag;
use crate::stats::ValidationOutcome;

// ==================== Identifiers ====================

macro_rules! numbered_id {
    ($name:ident, $prefix:literal) => {
        /// Monotonic workspace-scoped identifier.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}-{:03}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let suffix = s
                    .strip_prefix(concat!($prefix, "-"))
                    .ok_or_else(|| Error::InvalidDocument(format!("bad id: {s}")))?;
                let n: u32 = suffix
                    .parse()
                    .map_err(|_| Error::InvalidDocument(format!("bad id: {s}")))?;
                Ok(Self(n))
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

numbered_id!(StrategyId, "STRAT");
numbered_id!(IdeaId, "IDEA");
numbered_id!(ProposalId, "PROP");

/// Identifier of one validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationId(pub Uuid);

impl ValidationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ValidationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ValidationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ==================== Strategy definition ====================

/// Generator tier of a strategy definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StrategyTier {
    /// Known archetype, deterministic template expansion
    Template,
    /// Expressible in the indicator expression language
    Assembled,
    /// Free-form code, human review required before execution
    FreeForm,
}

impl From<StrategyTier> for u8 {
    fn from(tier: StrategyTier) -> u8 {
        match tier {
            StrategyTier::Template => 1,
            StrategyTier::Assembled => 2,
            StrategyTier::FreeForm => 3,
        }
    }
}

impl TryFrom<u8> for StrategyTier {
    type Error = String;

    fn try_from(n: u8) -> std::result::Result<Self, String> {
        match n {
            1 => Ok(Self::Template),
            2 => Ok(Self::Assembled),
            3 => Ok(Self::FreeForm),
            other => Err(format!("tier must be 1-3, got {other}")),
        }
    }
}

/// Universe specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseSpec {
    /// Instrument symbols; an unordered set
    pub symbols: Vec<String>,
    /// Selection rule when the universe is dynamic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
    /// Whether membership is resolved point-in-time
    pub point_in_time: bool,
}

/// Position sizing specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingSpec {
    /// Sizing method, e.g. `equal_weight`, `volatility_target`
    pub method: String,
    pub max_leverage: f64,
    /// Per-position cap as a fraction of equity
    pub max_position_pct: f64,
}

/// One dataset the strategy needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequirement {
    /// Registry dataset id
    pub dataset: String,
    /// Fields consumed from the dataset; an unordered set
    pub fields: Vec<String>,
}

/// Parameter overrides applied when a window's regime matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAdaptiveSpec {
    /// Regime dimension the overrides key on, e.g. `volatility`
    pub dimension: String,
    /// Regime value -> parameter overrides
    pub overrides: BTreeMap<String, BTreeMap<String, f64>>,
}

/// The declarative strategy definition. This subtree, canonicalized, is
/// what `definition_hash` addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub tier: StrategyTier,
    /// Tier-1 archetype name, e.g. `momentum_rotation`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archetype: Option<String>,
    pub universe: UniverseSpec,
    /// Entry conditions; a conjunction, order has no meaning
    pub entry: Vec<String>,
    /// Exit conditions; a disjunction, order has no meaning
    pub exit: Vec<String>,
    pub sizing: SizingSpec,
    /// Position-management rules (stops, rebalance cadence)
    #[serde(default)]
    pub management: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regime_adaptive: Option<RegimeAdaptiveSpec>,
    /// Named numeric parameters referenced by the rules
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    #[serde(default)]
    pub data_requirements: Vec<DataRequirement>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    /// Free commentary; excluded from the definition hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Recursively sort every array by the canonical rendering of its elements.
/// The definition's sequences are all unordered sets, so this makes the
/// hash independent of authoring order.
fn normalize_sets(value: &mut Value) {
    match value {
        Value::Array(items) => {
            for item in items.iter_mut() {
                normalize_sets(item);
            }
            items.sort_by_key(|item| hash::canonical_json(item));
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                normalize_sets(item);
            }
        }
        _ => {}
    }
}

impl StrategyDefinition {
    /// Canonical JSON projection used for hashing: commentary stripped,
    /// unordered sets sorted.
    pub fn canonical_value(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("notes");
        }
        normalize_sets(&mut value);
        Ok(value)
    }

    /// Content-addressed hash of the canonical definition.
    pub fn definition_hash(&self) -> Result<String> {
        Ok(hash::hash_value(&self.canonical_value()?))
    }

    /// Entry and exit conditions in canonical order, for deterministic
    /// code generation.
    pub fn canonical_conditions(&self) -> (Vec<String>, Vec<String>) {
        let mut entry = self.entry.clone();
        let mut exit = self.exit.clone();
        entry.sort();
        exit.sort();
        (entry, exit)
    }
}

// ==================== Edge & provenance ====================

/// Category of the claimed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCategory {
    Structural,
    Behavioral,
    Informational,
    RiskPremium,
}

/// Why the strategy should make money, and why that persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeBlock {
    pub mechanism: String,
    pub category: EdgeCategory,
    pub why_exists: String,
    /// Who is on the other side of the trade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_persists: Option<String>,
    #[serde(default)]
    pub decay_conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_estimate: Option<String>,
}

/// Where the edge rationale came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RationaleSource {
    SourceStated,
    SourceEnhanced,
    Inferred,
    Unknown,
}

/// Confidence in the rationale classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Rationale provenance block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeProvenance {
    pub source: RationaleSource,
    pub confidence: Confidence,
    /// Documented factors the definition aligns with
    #[serde(default)]
    pub factor_alignment: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_notes: Option<String>,
}

impl EdgeProvenance {
    pub fn unknown() -> Self {
        Self {
            source: RationaleSource::Unknown,
            confidence: Confidence::Low,
            factor_alignment: Vec::new(),
            research_notes: None,
        }
    }
}

// ==================== Ingestion quality ====================

/// Routing decision of the ingestion quality filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestDecision {
    Accept,
    /// Borderline trust; parked for human review
    Queue,
    Archive,
    Reject,
}

impl std::fmt::Display for IngestDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Queue => write!(f, "queue"),
            Self::Archive => write!(f, "archive"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// Quality assessment attached at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionQuality {
    /// 0-8 presence count
    pub specificity: u8,
    /// 0-100 weighted composite
    pub trust: i32,
    pub hard_flags: Vec<String>,
    pub soft_flags: Vec<String>,
    pub decision: IngestDecision,
    /// Human-readable decision reason
    pub reason: String,
}

// ==================== Strategy record ====================

/// Source document provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProvenance {
    /// Where the source came from (path, URL, citation)
    pub source_ref: String,
    /// Representative excerpt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    /// Hash of the normalized source content; the ingestion idempotence key
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// 0-15 credibility contribution to the trust score
    pub author_credibility: u8,
}

/// Ancestry of a record within the catalog.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Lineage {
    /// Parent strategies this one derives from; must form a DAG
    #[serde(default)]
    pub parents: Vec<StrategyId>,
    /// Set when the similarity index classified this as a variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_of: Option<StrategyId>,
}

/// A strategy record: the persistent unit the pipeline advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: StrategyId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub state: StrategyState,
    #[serde(default)]
    pub lineage: Lineage,
    #[serde(default)]
    pub tags: Vec<String>,
    pub provenance: SourceProvenance,
    pub definition: StrategyDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<EdgeBlock>,
    pub edge_provenance: EdgeProvenance,
    pub quality: IngestionQuality,
    pub definition_hash: String,
    /// Full transition log, append-only
    #[serde(default)]
    pub transitions: Vec<Transition>,
    /// Structured cause when `state == ERROR`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_cause: Option<String>,
}

impl StrategyRecord {
    /// Apply a state transition, enforcing the machine and logging it.
    pub fn apply_transition(&mut self, to: StrategyState, cause: impl Into<String>) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(Error::illegal_transition(
                self.id.to_string(),
                self.state,
                to,
            ));
        }
        let cause = cause.into();
        self.transitions
            .push(Transition::new(self.state, to, cause.clone()));
        if to == StrategyState::Error {
            self.error_cause = Some(cause);
        } else {
            self.error_cause = None;
        }
        self.state = to;
        Ok(())
    }
}

// ==================== Validation record ====================

/// Status of one walk-forward window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum WindowStatus {
    Completed,
    Error { message: String },
}

/// One window's immutable result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub index: usize,
    pub start: chrono::NaiveDate,
    pub end: chrono::NaiveDate,
    pub status: WindowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<WindowMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regime: Option<RegimeTag>,
}

/// Idempotence key of a validation: re-running the same key is refused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationKey {
    pub definition_hash: String,
    pub code_hash: String,
    pub generator_version: String,
}

/// An immutable validation record. Once written, never mutated; later
/// validations append new records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub id: ValidationId,
    pub strategy_id: StrategyId,
    pub definition_hash: String,
    pub code_hash: String,
    pub generator_version: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub windows: Vec<WindowOutcome>,
    pub outcome: ValidationOutcome,
}

impl ValidationRecord {
    pub fn key(&self) -> ValidationKey {
        ValidationKey {
            definition_hash: self.definition_hash.clone(),
            code_hash: self.code_hash.clone(),
            generator_version: self.generator_version.clone(),
        }
    }
}

// ==================== Learning record ====================

/// Append-only learning linked to one or more validations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub id: Uuid,
    pub strategy_id: StrategyId,
    pub validation_ids: Vec<ValidationId>,
    pub created_at: DateTime<Utc>,
    /// Structured insights keyed by analytical dimension
    pub insights: BTreeMap<String, String>,
    /// Factor index keys for later retrieval
    #[serde(default)]
    pub factors: Vec<String>,
}

// ==================== Proposal record ====================

/// Review status of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Deferred,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Deferred => write!(f, "deferred"),
        }
    }
}

/// What a proposal asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ProposalKind {
    /// Combine existing strategies into a composite
    CompositeStrategy {
        parents: Vec<StrategyId>,
        sketch: String,
    },
    /// Variant of an existing strategy with a specific change
    EnhancementVariant { parent: StrategyId, change: String },
    /// Acquire a dataset that would unblock or improve strategies
    DataAcquisition {
        dataset: String,
        justification: String,
    },
    /// Re-scoped hypothesis for an invalidated strategy
    RefinedHypothesis {
        parent: StrategyId,
        hypothesis: String,
    },
}

impl ProposalKind {
    /// Queue partition name, for FIFO-per-type ordering.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CompositeStrategy { .. } => "composite_strategy",
            Self::EnhancementVariant { .. } => "enhancement_variant",
            Self::DataAcquisition { .. } => "data_acquisition",
            Self::RefinedHypothesis { .. } => "refined_hypothesis",
        }
    }
}

/// A proposal awaiting human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub id: ProposalId,
    pub created_at: DateTime<Utc>,
    pub status: ProposalStatus,
    pub kind: ProposalKind,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_strategy: Option<StrategyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
}

// ==================== Idea record ====================

/// A lightweight strategy draft generated during analysis. Approval turns
/// an idea into a pending strategy; otherwise it is pruned by TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaRecord {
    pub id: IdeaId,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub sketch: String,
    /// Parent strategies; must reference existing records, no cycles
    pub parents: Vec<StrategyId>,
    /// Persona that generated the idea
    pub persona: String,
}
