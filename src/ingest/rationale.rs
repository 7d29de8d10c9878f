//! Edge rationale inference.
//!
//! When a source never says why its strategy should work, the definition is
//! matched against a fixed catalog of documented factors and structural
//! edges. The result feeds trust calibration and the record's provenance
//! block; it never gates progression through the pipeline.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::llm::{AgentTask, FieldSpec, FieldType, OutputSchema, SubAgentClient};
use crate::record::types::{
    Confidence, EdgeBlock, EdgeCategory, EdgeProvenance, RationaleSource, StrategyDefinition,
};

/// One documented factor or structural edge.
#[derive(Debug, Clone)]
pub struct FactorEntry {
    pub name: &'static str,
    pub category: EdgeCategory,
    /// Keywords matched against the definition's rule text
    pub keywords: &'static [&'static str],
    /// Widely harvested factors lower the novelty component of trust
    pub crowded: bool,
    pub mechanism: &'static str,
}

/// The fixed factor catalog.
pub fn factor_catalog() -> &'static [FactorEntry] {
    use EdgeCategory::*;
    const CATALOG: &[FactorEntry] = &[
        FactorEntry {
            name: "momentum",
            category: Behavioral,
            keywords: &["momentum", "roc", "rank", "winner", "12-1", "relative strength"],
            crowded: true,
            mechanism: "underreaction to firm-specific news sustains drift",
        },
        FactorEntry {
            name: "value",
            category: RiskPremium,
            keywords: &["value", "book", "earnings yield", "pe", "cheap", "multiple"],
            crowded: true,
            mechanism: "compensation for distress risk and slow mean reversion of multiples",
        },
        FactorEntry {
            name: "quality",
            category: Behavioral,
            keywords: &["quality", "profitability", "margin", "roe", "accrual"],
            crowded: true,
            mechanism: "investors underprice durable profitability",
        },
        FactorEntry {
            name: "low_volatility",
            category: Structural,
            keywords: &["low vol", "low_volatility", "beta", "min vol", "std"],
            crowded: true,
            mechanism: "leverage constraints push demand toward high-beta names",
        },
        FactorEntry {
            name: "carry",
            category: RiskPremium,
            keywords: &["carry", "roll", "contango", "backwardation", "yield differential"],
            crowded: false,
            mechanism: "harvesting the spread between spot and forward pricing",
        },
        FactorEntry {
            name: "trend_following",
            category: Behavioral,
            keywords: &["trend", "sma", "ema", "cross_above", "cross_below", "golden", "moving average"],
            crowded: true,
            mechanism: "herding and slow information diffusion extend price trends",
        },
        FactorEntry {
            name: "mean_reversion",
            category: Behavioral,
            keywords: &["reversion", "oversold", "rsi", "zscore", "snapback", "overreaction"],
            crowded: false,
            mechanism: "liquidity providers are paid for absorbing overreaction",
        },
        FactorEntry {
            name: "post_earnings_drift",
            category: Informational,
            keywords: &["earnings", "announcement", "surprise", "drift", "pead"],
            crowded: false,
            mechanism: "delayed incorporation of earnings surprises",
        },
        FactorEntry {
            name: "index_rebalancing",
            category: Structural,
            keywords: &["rebalance", "index add", "deletion", "inclusion", "reconstitution"],
            crowded: false,
            mechanism: "forced flows from benchmarked investors around index changes",
        },
        FactorEntry {
            name: "calendar_effects",
            category: Behavioral,
            keywords: &["seasonal", "january", "turn of month", "day of week", "calendar"],
            crowded: true,
            mechanism: "recurring flow patterns tied to the calendar",
        },
        FactorEntry {
            name: "volatility_risk_premium",
            category: RiskPremium,
            keywords: &["vix", "implied", "variance", "option", "premium", "straddle"],
            crowded: false,
            mechanism: "implied volatility systematically exceeds realized",
        },
        FactorEntry {
            name: "dividend_capture",
            category: Structural,
            keywords: &["dividend", "ex-date", "ex_date", "distribution", "payout"],
            crowded: false,
            mechanism: "price adjustment around ex-dates is incomplete after taxes",
        },
    ];
    CATALOG
}

/// Whether any of the aligned factors is crowded.
pub fn any_crowded(factors: &[String]) -> bool {
    factor_catalog()
        .iter()
        .any(|f| f.crowded && factors.iter().any(|name| name == f.name))
}

/// Result of rationale inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredRationale {
    pub provenance: EdgeProvenance,
    /// Synthesized edge block when a factor matched
    pub edge: Option<EdgeBlock>,
}

fn rule_corpus(name: &str, definition: &StrategyDefinition) -> String {
    let mut corpus = String::new();
    corpus.push_str(&name.to_ascii_lowercase());
    corpus.push(' ');
    if let Some(archetype) = &definition.archetype {
        corpus.push_str(archetype);
        corpus.push(' ');
    }
    for rule in definition
        .entry
        .iter()
        .chain(&definition.exit)
        .chain(&definition.management)
        .chain(&definition.assumptions)
    {
        corpus.push_str(&rule.to_ascii_lowercase());
        corpus.push(' ');
    }
    corpus
}

/// Deterministic catalog matcher.
///
/// Matching rule structure against keywords is structure-only evidence, so
/// the confidence is always `low`; only the sub-agent path, which reads
/// the whole definition, may grade higher.
pub fn infer(name: &str, definition: &StrategyDefinition) -> InferredRationale {
    let corpus = rule_corpus(name, definition);

    let mut scored: Vec<(&FactorEntry, usize)> = factor_catalog()
        .iter()
        .map(|entry| {
            let hits = entry
                .keywords
                .iter()
                .filter(|kw| corpus.contains(&kw.to_ascii_lowercase()))
                .count();
            (entry, hits)
        })
        .filter(|(_, hits)| *hits > 0)
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.name.cmp(b.0.name)));

    let Some(&(best, best_hits)) = scored.first() else {
        return InferredRationale {
            provenance: EdgeProvenance::unknown(),
            edge: None,
        };
    };

    let alignment: Vec<String> = scored.iter().map(|(f, _)| f.name.to_string()).collect();
    debug!(factor = best.name, hits = best_hits, "rationale inferred from catalog");

    InferredRationale {
        provenance: EdgeProvenance {
            source: RationaleSource::Inferred,
            confidence: Confidence::Low,
            factor_alignment: alignment,
            research_notes: Some(format!(
                "matched documented factor '{}' from rule structure",
                best.name
            )),
        },
        edge: Some(EdgeBlock {
            mechanism: best.mechanism.to_string(),
            category: best.category,
            why_exists: best.mechanism.to_string(),
            counterparty: None,
            why_persists: None,
            decay_conditions: vec!["crowding of the documented factor".to_string()],
            capacity_estimate: None,
        }),
    }
}

fn inference_schema() -> OutputSchema {
    OutputSchema::new(
        "rationale_inference",
        vec![
            FieldSpec::required(
                "factor",
                FieldType::String,
                "documented factor the strategy most plausibly harvests",
            ),
            FieldSpec::required(
                "category",
                FieldType::Enum(vec!["structural", "behavioral", "informational", "risk_premium"]),
                "edge category",
            ),
            FieldSpec::required("mechanism", FieldType::String, "why the edge exists"),
            FieldSpec::required(
                "confidence",
                FieldType::Enum(vec!["high", "medium", "low"]),
                "confidence in the classification",
            ),
            FieldSpec::optional("notes", FieldType::String, "supporting reasoning"),
        ],
    )
}

/// Sub-agent inference: asks an isolated agent to classify the edge, then
/// falls back to the deterministic catalog matcher on any failure.
pub async fn infer_with_agent(
    client: &dyn SubAgentClient,
    name: &str,
    definition: &StrategyDefinition,
) -> Result<InferredRationale> {
    let schema = inference_schema();
    let task = AgentTask::new(
        "rationale-inference",
        "You classify trading strategies against documented factors and \
         structural edges. Be conservative: if nothing fits, say so.",
        format!(
            "Strategy name: {name}\nEntry rules: {:?}\nExit rules: {:?}\n\
             Universe: {:?}\n\nWhich documented factor does this most \
             plausibly harvest?",
            definition.entry, definition.exit, definition.universe.symbols,
        ),
    );

    let payload = match client.dispatch(&task, &schema).await {
        Ok(payload) => payload,
        Err(e) => {
            debug!(error = %e, "agent inference failed, using catalog matcher");
            return Ok(infer(name, definition));
        }
    };

    let factor = payload["factor"].as_str().unwrap_or("unknown").to_string();
    let category = match payload["category"].as_str() {
        Some("structural") => EdgeCategory::Structural,
        Some("informational") => EdgeCategory::Informational,
        Some("risk_premium") => EdgeCategory::RiskPremium,
        _ => EdgeCategory::Behavioral,
    };
    let confidence = match payload["confidence"].as_str() {
        Some("high") => Confidence::High,
        Some("medium") => Confidence::Medium,
        _ => Confidence::Low,
    };
    let mechanism = payload["mechanism"].as_str().unwrap_or_default().to_string();

    Ok(InferredRationale {
        provenance: EdgeProvenance {
            source: RationaleSource::Inferred,
            confidence,
            factor_alignment: vec![factor],
            research_notes: payload["notes"].as_str().map(str::to_string),
        },
        edge: Some(EdgeBlock {
            mechanism: mechanism.clone(),
            category,
            why_exists: mechanism,
            counterparty: None,
            why_persists: None,
            decay_conditions: Vec::new(),
            capacity_estimate: None,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::types::tests::sample_definition;
    use crate::record::types::{SizingSpec, StrategyTier, UniverseSpec};
    use std::collections::BTreeMap;

    fn golden_cross() -> StrategyDefinition {
        StrategyDefinition {
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
            parameters: BTreeMap::from([("fast".to_string(), 50.0), ("slow".to_string(), 200.0)]),
            data_requirements: Vec::new(),
            assumptions: Vec::new(),
            risks: Vec::new(),
            notes: None,
        }
    }

    #[test]
    fn test_golden_cross_infers_trend_following_low_confidence() {
        let result = infer("golden cross", &golden_cross());
        assert_eq!(result.provenance.source, RationaleSource::Inferred);
        assert_eq!(result.provenance.confidence, Confidence::Low);
        assert!(result
            .provenance
            .factor_alignment
            .contains(&"trend_following".to_string()));
        assert!(result.edge.is_some());
    }

    #[test]
    fn test_momentum_definition_matches_momentum() {
        let result = infer("cross-sectional momentum", &sample_definition());
        assert_eq!(result.provenance.source, RationaleSource::Inferred);
        assert_eq!(
            result.provenance.factor_alignment.first().map(String::as_str),
            Some("momentum")
        );
    }

    #[test]
    fn test_unmatchable_definition_stays_unknown() {
        let mut definition = golden_cross();
        definition.entry = vec!["lunar phase is waxing".to_string()];
        definition.exit = vec!["lunar phase is waning".to_string()];
        let result = infer("moon cycles", &definition);
        assert_eq!(result.provenance.source, RationaleSource::Unknown);
        assert_eq!(result.provenance.confidence, Confidence::Low);
        assert!(result.edge.is_none());
    }

    #[test]
    fn test_crowded_factor_lookup() {
        assert!(any_crowded(&["momentum".to_string()]));
        assert!(!any_crowded(&["post_earnings_drift".to_string()]));
        assert!(!any_crowded(&[]));
    }

    #[test]
    fn test_catalog_names_are_unique() {
        let mut names: Vec<&str> = factor_catalog().iter().map(|f| f.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), factor_catalog().len());
    }
}
