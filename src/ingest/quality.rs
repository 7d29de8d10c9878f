//! Ingestion quality filter.
//!
//! Scores an extracted draft on specificity (can it be tested at all?) and
//! trust (is it worth testing?), scans for red flags, and routes the draft:
//! accept, queue for review, archive, or reject. The decision is a pure
//! function of the scores, the flags, and the rationale provenance.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::config::IngestConfig;
use crate::ingest::draft::StrategyDraft;
use crate::ingest::rationale;
use crate::record::types::{EdgeProvenance, IngestDecision, IngestionQuality, RationaleSource};

/// Trust credit granted when a missing rationale is later inferred from
/// the factor catalog. Inference never gates, but it can rescue a draft
/// whose only deficiency is an unstated edge.
const INFERRED_RATIONALE_CREDIT: i32 = 25;

/// Hard red flags: any one rejects the draft outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardFlag {
    /// Claimed Sharpe above 3 outside high-frequency trading
    SharpeAbove3,
    NoLosingPeriods,
    AllMarketConditions,
    /// Author sells courses, signals, or newsletters
    AuthorSelling,
    TooManyParams,
    /// Backtest starts right after a known drawdown trough
    SuspiciousStartDate,
}

impl std::fmt::Display for HardFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SharpeAbove3 => "sharpe_above_3",
            Self::NoLosingPeriods => "no_losing_periods",
            Self::AllMarketConditions => "all_market_conditions",
            Self::AuthorSelling => "author_selling",
            Self::TooManyParams => "too_many_params",
            Self::SuspiciousStartDate => "suspicious_start_date",
        };
        write!(f, "{s}")
    }
}

/// Soft red flags: warnings that shape scrutiny but never auto-reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftFlag {
    UnknownRationale,
    NoTransactionCosts,
    NoDrawdownDiscussion,
    SingleMarket,
    SingleRegime,
    SmallSample,
    HighLeverage,
    CrowdedFactor,
    MagicNumbers,
}

impl std::fmt::Display for SoftFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownRationale => "unknown_rationale",
            Self::NoTransactionCosts => "no_transaction_costs",
            Self::NoDrawdownDiscussion => "no_drawdown_discussion",
            Self::SingleMarket => "single_market",
            Self::SingleRegime => "single_regime",
            Self::SmallSample => "small_sample",
            Self::HighLeverage => "high_leverage",
            Self::CrowdedFactor => "crowded_factor",
            Self::MagicNumbers => "magic_numbers",
        };
        write!(f, "{s}")
    }
}

static NO_LOSING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(never[a-z'\s]{0,30}losing|no\s+losing\s+(month|period|quarter|year))")
        .expect("static regex")
});

static ALL_CONDITIONS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)works\s+in\s+(all|every|any)\s+market\s+(conditions?|environments?|regimes?)")
        .expect("static regex")
});

static SELLING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(sell|sells|selling|join|subscribe|enroll|sign\s+up)[^.]{0,60}(course|newsletter|signals?|mentorship|masterclass)",
    )
    .expect("static regex")
});

/// Troughs of well-known drawdowns. A backtest that conveniently starts
/// just after one of these is cherry-picked.
fn drawdown_troughs() -> Vec<NaiveDate> {
    [
        (1987, 12, 4),
        (2002, 10, 9),
        (2009, 3, 9),
        (2011, 10, 3),
        (2018, 12, 24),
        (2020, 3, 23),
    ]
    .iter()
    .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
    .collect()
}

const TROUGH_PROXIMITY_DAYS: i64 = 45;

/// Scan a draft for hard red flags.
pub fn hard_flags(draft: &StrategyDraft) -> Vec<HardFlag> {
    let mut flags = Vec::new();

    if let Some(sharpe) = draft.claimed.sharpe {
        if sharpe > 3.0 && !draft.claimed.is_high_frequency {
            flags.push(HardFlag::SharpeAbove3);
        }
    }
    if NO_LOSING_RE.is_match(&draft.raw_text) {
        flags.push(HardFlag::NoLosingPeriods);
    }
    if ALL_CONDITIONS_RE.is_match(&draft.raw_text) {
        flags.push(HardFlag::AllMarketConditions);
    }
    if draft.source.sells_products || SELLING_RE.is_match(&draft.raw_text) {
        flags.push(HardFlag::AuthorSelling);
    }
    if draft.definition.parameters.len() > 5 {
        flags.push(HardFlag::TooManyParams);
    }
    if let Some(start) = draft.claimed.backtest_start {
        let suspicious = drawdown_troughs().iter().any(|trough| {
            let days = start.signed_duration_since(*trough).num_days();
            (0..=TROUGH_PROXIMITY_DAYS).contains(&days)
        });
        if suspicious {
            flags.push(HardFlag::SuspiciousStartDate);
        }
    }
    flags
}

/// Scan a draft for soft red flags, given the (possibly inferred) factor
/// alignment.
pub fn soft_flags(draft: &StrategyDraft, factor_alignment: &[String]) -> Vec<SoftFlag> {
    let mut flags = Vec::new();

    if draft.stated_edge.is_none() {
        flags.push(SoftFlag::UnknownRationale);
    }
    if !draft.claimed.transaction_costs_discussed {
        flags.push(SoftFlag::NoTransactionCosts);
    }
    if !draft.claimed.drawdown_discussed {
        flags.push(SoftFlag::NoDrawdownDiscussion);
    }
    if draft.definition.universe.symbols.len() == 1 && draft.definition.universe.selection.is_none()
    {
        flags.push(SoftFlag::SingleMarket);
    }
    if matches!(draft.backtest_years(), Some(years) if years < 5) {
        flags.push(SoftFlag::SingleRegime);
    }
    if matches!(draft.claimed.sample_size, Some(n) if n < 30) {
        flags.push(SoftFlag::SmallSample);
    }
    if draft.definition.sizing.max_leverage > 3.0 {
        flags.push(SoftFlag::HighLeverage);
    }
    if rationale::any_crowded(factor_alignment) {
        flags.push(SoftFlag::CrowdedFactor);
    }
    let suspicious_precision = draft
        .definition
        .parameters
        .values()
        .any(|v| (v * 100.0).fract().abs() > 1e-9);
    if suspicious_precision {
        flags.push(SoftFlag::MagicNumbers);
    }
    flags
}

/// Eight presence checks, one specificity point each.
pub fn specificity(draft: &StrategyDraft) -> (u8, Vec<&'static str>) {
    let universe_defined = !draft.definition.universe.symbols.is_empty()
        || draft.definition.universe.selection.is_some();
    let checks: [(&'static str, bool); 8] = [
        ("entry_rules", !draft.definition.entry.is_empty()),
        ("exit_rules", !draft.definition.exit.is_empty()),
        ("position_sizing", !draft.definition.sizing.method.is_empty()),
        ("universe", universe_defined),
        (
            "backtest_period",
            draft.claimed.backtest_start.is_some() && draft.claimed.backtest_end.is_some(),
        ),
        ("oos_evidence", draft.claimed.out_of_sample),
        (
            "transaction_costs",
            draft.claimed.transaction_costs_discussed,
        ),
        ("code_or_pseudocode", draft.has_code),
    ];

    let score = checks.iter().filter(|(_, present)| *present).count() as u8;
    let missing = checks
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect();
    (score, missing)
}

/// Component breakdown of the trust score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustBreakdown {
    /// 0-30
    pub economic_rationale: i32,
    /// 0-25
    pub oos_evidence: i32,
    /// 0-20
    pub implementation_realism: i32,
    /// 0-15
    pub source_credibility: i32,
    /// 0-10
    pub novelty: i32,
    /// 15 per hard flag
    pub penalty: i32,
}

impl TrustBreakdown {
    pub fn total(&self) -> i32 {
        (self.economic_rationale + self.oos_evidence + self.implementation_realism
            + self.source_credibility
            + self.novelty
            - self.penalty)
            .clamp(0, 100)
    }
}

/// Compute the trust breakdown for a draft.
pub fn trust(
    draft: &StrategyDraft,
    factor_alignment: &[String],
    hard: &[HardFlag],
) -> TrustBreakdown {
    let economic_rationale = match &draft.stated_edge {
        Some(edge) => {
            let mut score = 0;
            if !edge.mechanism.is_empty() {
                score += 15;
            }
            if !edge.why_exists.is_empty() {
                score += 7;
            }
            if edge.why_persists.is_some() {
                score += 4;
            }
            if edge.counterparty.is_some() {
                score += 4;
            }
            score
        }
        None => 0,
    };

    let oos_evidence = if draft.claimed.out_of_sample {
        25
    } else {
        match draft.backtest_years() {
            Some(years) if years >= 10 => 12,
            Some(_) => 8,
            None => 0,
        }
    };

    let mut implementation_realism = 0;
    if draft.claimed.transaction_costs_discussed {
        implementation_realism += 8;
    }
    if draft.claimed.drawdown_discussed {
        implementation_realism += 5;
    }
    if draft.definition.sizing.max_leverage <= 2.0 {
        implementation_realism += 4;
    }
    if draft.definition.sizing.max_position_pct < 1.0 {
        implementation_realism += 3;
    }

    let source_credibility = i32::from(draft.source.author_credibility.min(15));

    let novelty = if factor_alignment.is_empty() {
        8
    } else if rationale::any_crowded(factor_alignment) {
        2
    } else {
        5
    };

    TrustBreakdown {
        economic_rationale,
        oos_evidence,
        implementation_realism,
        source_credibility,
        novelty,
        penalty: 15 * hard.len() as i32,
    }
}

/// Route a draft from its scores and flags. Pure: no hidden state.
pub fn decide(
    config: &IngestConfig,
    specificity_score: u8,
    breakdown: &TrustBreakdown,
    hard: &[HardFlag],
    rationale_source: RationaleSource,
) -> (IngestDecision, String) {
    if !hard.is_empty() {
        let names: Vec<String> = hard.iter().map(|f| f.to_string()).collect();
        return (
            IngestDecision::Reject,
            format!("hard red flags: {}", names.join(", ")),
        );
    }

    if specificity_score < config.specificity_threshold {
        return (
            IngestDecision::Archive,
            format!(
                "untestable: specificity {specificity_score} < {}",
                config.specificity_threshold
            ),
        );
    }

    let trust_total = breakdown.total();
    if trust_total >= config.trust_threshold {
        return (
            IngestDecision::Accept,
            format!("trust {trust_total} meets threshold {}", config.trust_threshold),
        );
    }

    // A draft whose only trust deficiency is an unstated edge proceeds
    // once the catalog matcher places it on a documented factor.
    if breakdown.economic_rationale == 0
        && rationale_source != RationaleSource::Unknown
        && trust_total + INFERRED_RATIONALE_CREDIT >= config.trust_threshold
    {
        return (
            IngestDecision::Accept,
            format!("trust {trust_total} accepted with inferred rationale"),
        );
    }

    if trust_total >= config.queue_threshold {
        return (
            IngestDecision::Queue,
            format!(
                "trust {trust_total} in review band [{}, {})",
                config.queue_threshold, config.trust_threshold
            ),
        );
    }

    (
        IngestDecision::Archive,
        format!(
            "not worth testing: trust {trust_total} < {}",
            config.queue_threshold
        ),
    )
}

/// Full quality assessment of one draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub specificity: u8,
    pub missing_specificity: Vec<String>,
    pub breakdown: TrustBreakdown,
    pub hard: Vec<HardFlag>,
    pub soft: Vec<SoftFlag>,
    pub decision: IngestDecision,
    pub reason: String,
}

impl QualityAssessment {
    /// Project into the block persisted on the strategy record.
    pub fn to_record_quality(&self) -> IngestionQuality {
        IngestionQuality {
            specificity: self.specificity,
            trust: self.breakdown.total(),
            hard_flags: self.hard.iter().map(|f| f.to_string()).collect(),
            soft_flags: self.soft.iter().map(|f| f.to_string()).collect(),
            decision: self.decision,
            reason: self.reason.clone(),
        }
    }
}

/// Assess a draft given its (possibly inferred) rationale provenance.
pub fn assess(
    config: &IngestConfig,
    draft: &StrategyDraft,
    provenance: &EdgeProvenance,
) -> QualityAssessment {
    let hard = hard_flags(draft);
    let soft = soft_flags(draft, &provenance.factor_alignment);
    let (specificity_score, missing) = specificity(draft);
    let breakdown = trust(draft, &provenance.factor_alignment, &hard);
    let (decision, reason) = decide(
        config,
        specificity_score,
        &breakdown,
        &hard,
        provenance.source,
    );

    QualityAssessment {
        specificity: specificity_score,
        missing_specificity: missing.iter().map(|s| s.to_string()).collect(),
        breakdown,
        hard,
        soft,
        decision,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::draft::tests::momentum_draft;
    use crate::ingest::draft::{ClaimedPerformance, SourceMeta};
    use crate::ingest::rationale::infer;
    use crate::record::types::{
        EdgeProvenance, SizingSpec, StrategyDefinition, StrategyTier, UniverseSpec,
    };
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn config() -> IngestConfig {
        IngestConfig::default()
    }

    fn provenance_for(draft: &StrategyDraft) -> EdgeProvenance {
        match &draft.stated_edge {
            Some(_) => EdgeProvenance {
                source: crate::record::types::RationaleSource::SourceStated,
                confidence: crate::record::types::Confidence::High,
                factor_alignment: infer(&draft.name, &draft.definition)
                    .provenance
                    .factor_alignment,
                research_notes: None,
            },
            None => infer(&draft.name, &draft.definition).provenance,
        }
    }

    /// Scenario: academic momentum paper with decades of OOS replication.
    #[test]
    fn test_accept_academic_momentum() {
        let draft = momentum_draft();
        let assessment = assess(&config(), &draft, &provenance_for(&draft));

        assert_eq!(assessment.specificity, 8);
        assert!(assessment.hard.is_empty());
        assert!(
            (80..=95).contains(&assessment.breakdown.total()),
            "trust was {}",
            assessment.breakdown.total()
        );
        assert_eq!(assessment.decision, IngestDecision::Accept);
    }

    /// Scenario: Sharpe 4.2, "never had a losing month", author sells a
    /// course. Three hard flags, rejected.
    #[test]
    fn test_hard_reject_course_seller() {
        let mut draft = momentum_draft();
        draft.name = "AI super strategy".to_string();
        draft.claimed.sharpe = Some(4.2);
        draft.raw_text = "My AI system has never had a losing month. \
                          Join my course for the full signals."
            .to_string();
        let assessment = assess(&config(), &draft, &provenance_for(&draft));

        assert_eq!(assessment.decision, IngestDecision::Reject);
        assert!(assessment.hard.contains(&HardFlag::SharpeAbove3));
        assert!(assessment.hard.contains(&HardFlag::NoLosingPeriods));
        assert!(assessment.hard.contains(&HardFlag::AuthorSelling));
    }

    /// Scenario: long-form prose about "buying quality", nothing testable.
    #[test]
    fn test_archive_vague_prose() {
        let draft = StrategyDraft {
            name: "buy quality companies".to_string(),
            source: SourceMeta {
                source_ref: "inbox/quality-essay.md".to_string(),
                author: None,
                author_credibility: 6,
                sells_products: false,
            },
            raw_text: "Great companies compound. Buy quality and hold.".to_string(),
            definition: StrategyDefinition {
                tier: StrategyTier::FreeForm,
                archetype: None,
                universe: UniverseSpec {
                    symbols: Vec::new(),
                    selection: None,
                    point_in_time: false,
                },
                entry: Vec::new(),
                exit: Vec::new(),
                sizing: SizingSpec {
                    method: String::new(),
                    max_leverage: 1.0,
                    max_position_pct: 1.0,
                },
                management: Vec::new(),
                regime_adaptive: None,
                parameters: BTreeMap::new(),
                data_requirements: Vec::new(),
                assumptions: Vec::new(),
                risks: Vec::new(),
                notes: None,
            },
            stated_edge: None,
            claimed: ClaimedPerformance::default(),
            has_code: false,
            excerpt: None,
        };
        let assessment = assess(&config(), &draft, &provenance_for(&draft));

        assert!(assessment.specificity <= 2);
        assert_eq!(assessment.decision, IngestDecision::Archive);
        assert!(assessment.reason.contains("untestable"));
    }

    /// Scenario: golden cross with no stated rationale. Inference places it
    /// on trend following; soft flags attach; it proceeds despite low trust.
    #[test]
    fn test_accept_with_warnings_golden_cross() {
        let draft = StrategyDraft {
            name: "golden cross".to_string(),
            source: SourceMeta {
                source_ref: "inbox/golden-cross-post.md".to_string(),
                author: Some("trading blog".to_string()),
                author_credibility: 12,
                sells_products: false,
            },
            raw_text: "Buy when the 50-day SMA crosses above the 200-day SMA."
                .to_string(),
            definition: StrategyDefinition {
                tier: StrategyTier::Assembled,
                archetype: None,
                universe: UniverseSpec {
                    symbols: vec!["SPY".into()],
                    selection: None,
                    point_in_time: true,
                },
                entry: vec!["cross_above(sma(close, fast), sma(close, slow))".to_string()],
                exit: vec!["cross_below(sma(close, fast), sma(close, slow))".to_string()],
                sizing: SizingSpec {
                    method: "full_notional".to_string(),
                    max_leverage: 1.0,
                    max_position_pct: 1.0,
                },
                management: Vec::new(),
                regime_adaptive: None,
                parameters: BTreeMap::from([
                    ("fast".to_string(), 50.0),
                    ("slow".to_string(), 200.0),
                ]),
                data_requirements: Vec::new(),
                assumptions: Vec::new(),
                risks: Vec::new(),
                notes: None,
            },
            stated_edge: None,
            claimed: ClaimedPerformance {
                backtest_start: chrono::NaiveDate::from_ymd_opt(1995, 1, 1),
                backtest_end: chrono::NaiveDate::from_ymd_opt(2020, 1, 1),
                drawdown_discussed: true,
                sample_size: Some(180),
                ..ClaimedPerformance::default()
            },
            has_code: false,
            excerpt: None,
        };

        let inferred = infer(&draft.name, &draft.definition);
        assert_eq!(
            inferred.provenance.source,
            crate::record::types::RationaleSource::Inferred
        );

        let assessment = assess(&config(), &draft, &inferred.provenance);
        assert!(
            (28..=46).contains(&assessment.breakdown.total()),
            "trust was {}",
            assessment.breakdown.total()
        );
        assert_eq!(assessment.decision, IngestDecision::Accept);
        assert!(assessment.reason.contains("inferred rationale"));
        assert!(assessment.soft.contains(&SoftFlag::UnknownRationale));
        assert!(assessment.soft.contains(&SoftFlag::CrowdedFactor));
        assert!(assessment.soft.contains(&SoftFlag::NoTransactionCosts));
    }

    #[test]
    fn test_too_many_params_is_hard() {
        let mut draft = momentum_draft();
        for i in 0..6 {
            draft
                .definition
                .parameters
                .insert(format!("p{i}"), i as f64);
        }
        assert!(hard_flags(&draft).contains(&HardFlag::TooManyParams));
    }

    #[test]
    fn test_suspicious_start_date() {
        let mut draft = momentum_draft();
        draft.claimed.backtest_start = chrono::NaiveDate::from_ymd_opt(2009, 3, 16);
        assert!(hard_flags(&draft).contains(&HardFlag::SuspiciousStartDate));

        draft.claimed.backtest_start = chrono::NaiveDate::from_ymd_opt(2008, 6, 1);
        assert!(!hard_flags(&draft).contains(&HardFlag::SuspiciousStartDate));
    }

    #[test]
    fn test_hft_sharpe_exemption() {
        let mut draft = momentum_draft();
        draft.claimed.sharpe = Some(4.5);
        draft.claimed.is_high_frequency = true;
        assert!(!hard_flags(&draft).contains(&HardFlag::SharpeAbove3));
        draft.claimed.is_high_frequency = false;
        assert!(hard_flags(&draft).contains(&HardFlag::SharpeAbove3));
    }

    #[test]
    fn test_magic_numbers_flag() {
        let mut draft = momentum_draft();
        draft
            .definition
            .parameters
            .insert("threshold".to_string(), 1.6180);
        let flags = soft_flags(&draft, &[]);
        assert!(flags.contains(&SoftFlag::MagicNumbers));
    }

    #[test]
    fn test_decision_is_pure() {
        let draft = momentum_draft();
        let provenance = provenance_for(&draft);
        let a = assess(&config(), &draft, &provenance);
        let b = assess(&config(), &draft, &provenance);
        assert_eq!(a, b);
    }

    #[test]
    fn test_queue_band() {
        let config = IngestConfig::default();
        let breakdown = TrustBreakdown {
            economic_rationale: 15,
            oos_evidence: 12,
            implementation_realism: 8,
            source_credibility: 10,
            novelty: 2,
            penalty: 0,
        };
        assert_eq!(breakdown.total(), 47);
        let (decision, _) = decide(
            &config,
            6,
            &breakdown,
            &[],
            crate::record::types::RationaleSource::SourceStated,
        );
        assert_eq!(decision, IngestDecision::Queue);
    }
}
