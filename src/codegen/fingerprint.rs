//! Logic fingerprints of generated artifacts.
//!
//! The generator marks every compiled rule and indicator invocation in its
//! output; the fingerprint is re-extracted from the emitted code text and
//! cross-checked against the source document before execution. A mismatch
//! means the generator emitted something the document never asked for.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::codegen::dsl;
use crate::error::{Error, Result};
use crate::record::types::StrategyDefinition;

static INDICATOR_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"self\.ind\.([a-z_]+)\(").expect("static regex"));

static RULE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*# rule: (.+)$").expect("static regex"));

static UNIVERSE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^UNIVERSE = \[(.*)\]"#).expect("static regex"));

static QUOTED_SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("static regex"));

/// Indicators, conditions, and universe references of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicFingerprint {
    pub indicators: BTreeSet<String>,
    pub conditions: BTreeSet<String>,
    pub universe: BTreeSet<String>,
}

impl LogicFingerprint {
    /// Extract the fingerprint from generated code text.
    pub fn extract(code: &str) -> Self {
        let indicators = INDICATOR_CALL_RE
            .captures_iter(code)
            .map(|c| c[1].to_string())
            .collect();
        let conditions = RULE_MARKER_RE
            .captures_iter(code)
            .map(|c| c[1].trim().to_string())
            .collect();
        let universe = UNIVERSE_LINE_RE
            .captures(code)
            .map(|line| {
                QUOTED_SYMBOL_RE
                    .captures_iter(&line[1])
                    .map(|c| c[1].to_string())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            indicators,
            conditions,
            universe,
        }
    }

    /// Fingerprint the source document implies.
    ///
    /// Rules that parse in the expression language contribute their exact
    /// indicator set; free-text rules fall back to a token scan against
    /// the closed function list.
    pub fn expected(definition: &StrategyDefinition) -> Self {
        let (entry, exit) = definition.canonical_conditions();
        let mut indicators = BTreeSet::new();
        let mut conditions = BTreeSet::new();

        for rule in entry.iter().chain(exit.iter()) {
            conditions.insert(rule.trim().to_string());
            match dsl::parse(rule).and_then(|expr| dsl::validate(&expr, &definition.parameters)) {
                Ok(used) => indicators.extend(used),
                Err(_) => {
                    let lower = rule.to_ascii_lowercase();
                    for (name, _) in dsl::FUNCTIONS {
                        if lower.contains(&format!("{name}(")) {
                            indicators.insert((*name).to_string());
                        }
                    }
                }
            }
        }

        let universe = definition
            .universe
            .symbols
            .iter()
            .map(|s| s.to_ascii_uppercase())
            .collect();

        Self {
            indicators,
            conditions,
            universe,
        }
    }
}

/// Pre-execution gate: the artifact's fingerprint must match the document.
pub fn cross_check(definition: &StrategyDefinition, code: &str) -> Result<LogicFingerprint> {
    let expected = LogicFingerprint::expected(definition);
    let actual = LogicFingerprint::extract(code);

    let mut mismatches = Vec::new();
    for missing in expected.conditions.difference(&actual.conditions) {
        mismatches.push(format!("document rule not in code: '{missing}'"));
    }
    for extra in actual.conditions.difference(&expected.conditions) {
        mismatches.push(format!("code rule not in document: '{extra}'"));
    }
    for missing in expected.indicators.difference(&actual.indicators) {
        mismatches.push(format!("indicator '{missing}' missing from code"));
    }
    for missing in expected.universe.difference(&actual.universe) {
        mismatches.push(format!("symbol '{missing}' missing from code universe"));
    }
    for extra in actual.universe.difference(&expected.universe) {
        mismatches.push(format!("symbol '{extra}' in code but not in document"));
    }

    if mismatches.is_empty() {
        Ok(actual)
    } else {
        Err(Error::FingerprintMismatch(mismatches.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::types::tests::sample_definition;

    const SAMPLE_CODE: &str = r#"
UNIVERSE = ["AGG", "EFA", "SPY"]

class Strategy(Algorithm):
    def entry_signal(self):
        # rule: roc(close, lookback) > 0
        c0 = (self.ind.roc(self.series("close"), self.params["lookback"]) > 0)
        # rule: rank(roc(close, lookback)) <= top_n
        c1 = (self.ind.rank(self.ind.roc(self.series("close"), self.params["lookback"])) <= self.params["top_n"])
        return c0 and c1

    def exit_signal(self):
        # rule: rank(roc(close, lookback)) > top_n
        e0 = (self.ind.rank(self.ind.roc(self.series("close"), self.params["lookback"])) > self.params["top_n"])
        return e0
"#;

    #[test]
    fn test_extract_from_code() {
        let fingerprint = LogicFingerprint::extract(SAMPLE_CODE);
        assert!(fingerprint.indicators.contains("roc"));
        assert!(fingerprint.indicators.contains("rank"));
        assert_eq!(fingerprint.conditions.len(), 3);
        assert_eq!(fingerprint.universe.len(), 3);
        assert!(fingerprint.universe.contains("SPY"));
    }

    #[test]
    fn test_cross_check_passes_for_faithful_code() {
        let definition = sample_definition();
        assert!(cross_check(&definition, SAMPLE_CODE).is_ok());
    }

    #[test]
    fn test_cross_check_catches_dropped_rule() {
        let definition = sample_definition();
        let truncated = SAMPLE_CODE.replace("# rule: rank(roc(close, lookback)) > top_n\n", "");
        let err = cross_check(&definition, &truncated).unwrap_err();
        assert!(matches!(err, Error::FingerprintMismatch(_)));
        assert!(err.to_string().contains("not in code"));
    }

    #[test]
    fn test_cross_check_catches_universe_drift() {
        let definition = sample_definition();
        let drifted = SAMPLE_CODE.replace(r#""SPY""#, r#""QQQ""#);
        let err = cross_check(&definition, &drifted).unwrap_err();
        assert!(err.to_string().contains("SPY"));
        assert!(err.to_string().contains("QQQ"));
    }

    #[test]
    fn test_cross_check_catches_invented_condition() {
        let definition = sample_definition();
        let padded = format!(
            "{SAMPLE_CODE}\n    # rule: rsi(close, 14) < 30\n    extra = self.ind.rsi(self.series(\"close\"), 14)\n"
        );
        let err = cross_check(&definition, &padded).unwrap_err();
        assert!(err.to_string().contains("not in document"));
    }
}
