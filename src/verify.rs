//! Static verification of strategy documents.
//!
//! Deterministic checks run against the declarative definition before any
//! code is generated. Each check yields pass or fail-with-reason; one
//! enabled failure blocks the record. Checks are document-level: bugs can
//! still appear in generated code, which is why the generator's logic
//! fingerprint is cross-checked separately before execution.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::record::types::StrategyDefinition;
use crate::registry::DataRegistry;

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum CheckResult {
    Pass,
    Fail { reason: String },
}

impl CheckResult {
    fn fail(reason: impl Into<String>) -> Self {
        Self::Fail {
            reason: reason.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Everything a check may look at.
pub struct CheckContext<'a> {
    pub definition: &'a StrategyDefinition,
    /// Full history window the validation will request
    pub history_start: NaiveDate,
    pub history_end: NaiveDate,
    pub registry: &'a DataRegistry,
}

impl CheckContext<'_> {
    /// All rule text, lowercased, for pattern scanning.
    fn rule_text(&self) -> String {
        self.definition
            .entry
            .iter()
            .chain(&self.definition.exit)
            .chain(&self.definition.management)
            .map(|r| r.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A static verification check.
pub trait VerificationCheck: Send + Sync {
    /// Stable name used in `enabled_checks` configuration.
    fn name(&self) -> &'static str;

    /// What the check guards against.
    fn description(&self) -> &'static str;

    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult;
}

// ==================== The default check set ====================

/// Every referenced datum must be observable strictly before the decision
/// time: no tomorrow's data, no same-bar closes in intrabar logic, no
/// macro releases before their announcement time.
pub struct LookAheadCheck;

static FUTURE_REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(tomorrow|next_day|next_bar|next_open|future\s*\(|\blookahead\b)")
        .expect("static regex")
});

impl VerificationCheck for LookAheadCheck {
    fn name(&self) -> &'static str {
        "look_ahead"
    }

    fn description(&self) -> &'static str {
        "references to data not observable at decision time"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        let text = ctx.rule_text();
        if let Some(m) = FUTURE_REFERENCE_RE.find(&text) {
            return CheckResult::fail(format!(
                "rule references future data: '{}'",
                m.as_str().trim()
            ));
        }

        // Same-bar close in intrabar decisions: execution declared
        // intraday while rules key off the close of the same bar.
        let intraday = ctx
            .definition
            .management
            .iter()
            .any(|m| m.to_ascii_lowercase().contains("intraday"));
        if intraday && text.contains("close") {
            return CheckResult::fail(
                "intraday execution cannot observe the same bar's close".to_string(),
            );
        }

        // Macro releases used without an announcement lag.
        if text.contains("macro") && !text.contains("lag") {
            return CheckResult::fail(
                "macro series referenced without an announcement lag".to_string(),
            );
        }
        CheckResult::Pass
    }
}

/// Universe membership must be point-in-time, not today's constituents.
pub struct SurvivorshipCheck;

impl VerificationCheck for SurvivorshipCheck {
    fn name(&self) -> &'static str {
        "survivorship"
    }

    fn description(&self) -> &'static str {
        "universe resolved from current constituents instead of point-in-time membership"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        if ctx.definition.universe.point_in_time {
            CheckResult::Pass
        } else {
            CheckResult::fail("universe is not resolved point-in-time".to_string())
        }
    }
}

/// Sizing must be declared, bounded, and within the declared leverage.
pub struct PositionSizingCheck;

impl VerificationCheck for PositionSizingCheck {
    fn name(&self) -> &'static str {
        "position_sizing"
    }

    fn description(&self) -> &'static str {
        "undeclared sizing method or unbounded position size"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        let sizing = &ctx.definition.sizing;
        if sizing.method.trim().is_empty() {
            return CheckResult::fail("no sizing method declared".to_string());
        }
        if sizing.max_leverage <= 0.0 || !sizing.max_leverage.is_finite() {
            return CheckResult::fail(format!("max_leverage {} is not usable", sizing.max_leverage));
        }
        if sizing.max_position_pct <= 0.0 || sizing.max_position_pct > 1.0 {
            return CheckResult::fail(format!(
                "max_position_pct {} leaves positions unbounded",
                sizing.max_position_pct
            ));
        }
        // A full book of max-size positions must fit the declared leverage.
        let implied = sizing.max_position_pct * (1.0 / sizing.max_position_pct).floor();
        if implied > sizing.max_leverage + 1e-9 {
            return CheckResult::fail(format!(
                "implied gross exposure {implied:.2} exceeds max_leverage {}",
                sizing.max_leverage
            ));
        }
        CheckResult::Pass
    }
}

/// Every data requirement must resolve in the registry across the window.
pub struct DataAvailabilityCheck;

impl VerificationCheck for DataAvailabilityCheck {
    fn name(&self) -> &'static str {
        "data_availability"
    }

    fn description(&self) -> &'static str {
        "data requirements that the registry cannot satisfy"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        for requirement in &ctx.definition.data_requirements {
            if let Err(e) =
                ctx.registry
                    .resolve(requirement, ctx.history_start, ctx.history_end)
            {
                return CheckResult::fail(e.to_string());
            }
        }
        CheckResult::Pass
    }
}

/// Declared parameters must sit inside plausible bounds.
pub struct ParameterSanityCheck;

impl VerificationCheck for ParameterSanityCheck {
    fn name(&self) -> &'static str {
        "parameter_sanity"
    }

    fn description(&self) -> &'static str {
        "parameters outside plausible bounds"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        for (name, value) in &ctx.definition.parameters {
            if !value.is_finite() {
                return CheckResult::fail(format!("parameter '{name}' is not finite"));
            }
            let lower = name.to_ascii_lowercase();
            let looks_like_window = ["lookback", "window", "period", "span", "fast", "slow"]
                .iter()
                .any(|kw| lower.contains(kw));
            if looks_like_window && *value < 1.0 {
                return CheckResult::fail(format!(
                    "parameter '{name}' = {value} but lookbacks must be at least 1"
                ));
            }
            if value.abs() > 1e6 {
                return CheckResult::fail(format!(
                    "parameter '{name}' = {value} is implausibly large"
                ));
            }
        }
        CheckResult::Pass
    }
}

/// No literal dates or over-fitted constants in the rules themselves.
pub struct HardcodedValueCheck;

static LITERAL_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(19|20)\d{2}-\d{2}-\d{2}\b|\b(19|20)\d{2}-\d{2}\b").expect("static regex")
});

static PRECISE_CONSTANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d{4,}").expect("static regex"));

impl VerificationCheck for HardcodedValueCheck {
    fn name(&self) -> &'static str {
        "hardcoded_values"
    }

    fn description(&self) -> &'static str {
        "literal dates or suspiciously precise constants in rules"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> CheckResult {
        let text = ctx.rule_text();
        if let Some(m) = LITERAL_DATE_RE.find(&text) {
            return CheckResult::fail(format!("literal date '{}' in rules", m.as_str()));
        }
        if let Some(m) = PRECISE_CONSTANT_RE.find(&text) {
            return CheckResult::fail(format!(
                "constant '{}' has suspiciously high precision",
                m.as_str()
            ));
        }
        CheckResult::Pass
    }
}

// ==================== The engine ====================

/// One check's outcome within a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub name: String,
    pub result: CheckResult,
}

/// Result of running the enabled checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub outcomes: Vec<CheckOutcome>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_pass())
    }

    /// Reasons for every failed check.
    pub fn failures(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.result {
                CheckResult::Fail { reason } => Some(format!("{}: {reason}", o.name)),
                CheckResult::Pass => None,
            })
            .collect()
    }
}

/// Runs the configured check set against a document.
pub struct VerificationEngine {
    checks: Vec<Box<dyn VerificationCheck>>,
}

impl VerificationEngine {
    /// Engine with the default check set.
    pub fn new() -> Self {
        Self {
            checks: vec![
                Box::new(LookAheadCheck),
                Box::new(SurvivorshipCheck),
                Box::new(PositionSizingCheck),
                Box::new(DataAvailabilityCheck),
                Box::new(ParameterSanityCheck),
                Box::new(HardcodedValueCheck),
            ],
        }
    }

    /// Restrict to an explicit list of enabled checks. An empty list means
    /// the full default set.
    pub fn with_enabled(mut self, enabled: &[String]) -> Self {
        if !enabled.is_empty() {
            self.checks.retain(|c| enabled.iter().any(|e| e == c.name()));
        }
        self
    }

    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every enabled check.
    pub fn run(&self, ctx: &CheckContext<'_>) -> VerificationReport {
        let outcomes = self
            .checks
            .iter()
            .map(|check| {
                let result = check.run(ctx);
                if let CheckResult::Fail { reason } = &result {
                    debug!(check = check.name(), reason = %reason, "verification failure");
                }
                CheckOutcome {
                    name: check.name().to_string(),
                    result,
                }
            })
            .collect();
        VerificationReport { outcomes }
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::types::tests::sample_definition;
    use crate::registry::tests::sample_registry;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ctx<'a>(
        definition: &'a StrategyDefinition,
        registry: &'a DataRegistry,
    ) -> CheckContext<'a> {
        CheckContext {
            definition,
            history_start: date(2000, 1, 1),
            history_end: date(2020, 1, 1),
            registry,
        }
    }

    #[test]
    fn test_clean_definition_passes_all_checks() {
        let definition = sample_definition();
        let registry = sample_registry();
        let report = VerificationEngine::new().run(&ctx(&definition, &registry));
        assert!(report.passed(), "failures: {:?}", report.failures());
    }

    #[test]
    fn test_look_ahead_future_reference() {
        let mut definition = sample_definition();
        definition
            .entry
            .push("close > next_day(open)".to_string());
        let registry = sample_registry();
        let report = VerificationEngine::new().run(&ctx(&definition, &registry));
        assert!(!report.passed());
        assert!(report.failures()[0].starts_with("look_ahead"));
    }

    #[test]
    fn test_look_ahead_same_bar_close_intraday() {
        let mut definition = sample_definition();
        definition
            .management
            .push("execute intraday at 15:45".to_string());
        let registry = sample_registry();
        let report = VerificationEngine::new().run(&ctx(&definition, &registry));
        assert!(report
            .failures()
            .iter()
            .any(|f| f.contains("same bar's close")));
    }

    #[test]
    fn test_survivorship_requires_point_in_time() {
        let mut definition = sample_definition();
        definition.universe.point_in_time = false;
        let registry = sample_registry();
        let report = VerificationEngine::new().run(&ctx(&definition, &registry));
        assert!(report.failures().iter().any(|f| f.starts_with("survivorship")));
    }

    #[test]
    fn test_sizing_unbounded_position() {
        let mut definition = sample_definition();
        definition.sizing.max_position_pct = 0.0;
        let registry = sample_registry();
        let report = VerificationEngine::new().run(&ctx(&definition, &registry));
        assert!(report
            .failures()
            .iter()
            .any(|f| f.starts_with("position_sizing")));
    }

    #[test]
    fn test_data_availability_unknown_dataset() {
        let mut definition = sample_definition();
        definition.data_requirements[0].dataset = "credit-card-panel".to_string();
        let registry = sample_registry();
        let report = VerificationEngine::new().run(&ctx(&definition, &registry));
        assert!(report
            .failures()
            .iter()
            .any(|f| f.starts_with("data_availability")));
    }

    #[test]
    fn test_parameter_sanity_rejects_zero_lookback() {
        let mut definition = sample_definition();
        definition.parameters.insert("lookback".to_string(), 0.0);
        let registry = sample_registry();
        let report = VerificationEngine::new().run(&ctx(&definition, &registry));
        assert!(report
            .failures()
            .iter()
            .any(|f| f.starts_with("parameter_sanity")));
    }

    #[test]
    fn test_hardcoded_date_in_rule() {
        let mut definition = sample_definition();
        definition
            .entry
            .push("date > 2009-03-09".to_string());
        let registry = sample_registry();
        let report = VerificationEngine::new().run(&ctx(&definition, &registry));
        assert!(report
            .failures()
            .iter()
            .any(|f| f.starts_with("hardcoded_values")));
    }

    #[test]
    fn test_precise_constant_in_rule() {
        let mut definition = sample_definition();
        definition.exit.push("rsi(close, 14) > 71.3462".to_string());
        let registry = sample_registry();
        let report = VerificationEngine::new().run(&ctx(&definition, &registry));
        assert!(report
            .failures()
            .iter()
            .any(|f| f.contains("high precision")));
    }

    #[test]
    fn test_enabled_subset_skips_disabled_checks() {
        let mut definition = sample_definition();
        definition.universe.point_in_time = false;
        let registry = sample_registry();
        let engine =
            VerificationEngine::new().with_enabled(&["position_sizing".to_string()]);
        let report = engine.run(&ctx(&definition, &registry));
        // Survivorship would fail, but only sizing is enabled
        assert!(report.passed());
        assert_eq!(engine.check_names(), vec!["position_sizing"]);
    }
}
