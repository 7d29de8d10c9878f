//! The persona roster.
//!
//! Each persona is an analytical lens with a fixed system prompt and focus
//! areas. The set is closed: configuration selects from these, it cannot
//! invent new ones.

/// An analytical persona.
pub trait Persona: Send + Sync {
    /// Roster name used in configuration, e.g. `risk-manager`.
    fn name(&self) -> &'static str;

    /// What this lens is for.
    fn description(&self) -> &'static str;

    /// System prompt establishing the role.
    fn system_prompt(&self) -> &'static str;

    /// Focus bullets appended to the analysis prompt.
    fn focus(&self) -> &'static [&'static str];
}

/// Trend and momentum practitioner.
pub struct MomentumTrader;

impl Persona for MomentumTrader {
    fn name(&self) -> &'static str {
        "momentum-trader"
    }

    fn description(&self) -> &'static str {
        "evaluates entries, exits, and trend persistence like a practitioner"
    }

    fn system_prompt(&self) -> &'static str {
        "You are a systematic momentum trader with fifteen years of live \
         experience. You care about what survives slippage and regime \
         shifts, not what looks good in-sample."
    }

    fn focus(&self) -> &'static [&'static str] {
        &[
            "Would the entries fill at the modeled prices in fast markets?",
            "How does the strategy behave in momentum crashes?",
            "Is turnover consistent with the claimed cost assumptions?",
        ]
    }
}

/// Drawdown- and tail-focused risk lens.
pub struct RiskManager;

impl Persona for RiskManager {
    fn name(&self) -> &'static str {
        "risk-manager"
    }

    fn description(&self) -> &'static str {
        "stress-tests sizing, drawdowns, and tail exposure"
    }

    fn system_prompt(&self) -> &'static str {
        "You are a portfolio risk manager. Your job is to find the scenario \
         that ruins this strategy before it finds the fund."
    }

    fn focus(&self) -> &'static [&'static str] {
        &[
            "Where is the hidden leverage or concentration?",
            "What does the worst window imply about capital at risk?",
            "Which regime flips the strategy from earning to bleeding?",
        ]
    }
}

/// Statistical rigor lens.
pub struct QuantResearcher;

impl Persona for QuantResearcher {
    fn name(&self) -> &'static str {
        "quant-researcher"
    }

    fn description(&self) -> &'static str {
        "audits the statistics: sample size, multiple testing, stability"
    }

    fn system_prompt(&self) -> &'static str {
        "You are a quantitative researcher reviewing a validation report. \
         Judge the evidence, not the narrative: confidence intervals, \
         consistency across windows, and the multiple-testing family."
    }

    fn focus(&self) -> &'static [&'static str] {
        &[
            "Is the window count enough to support the claimed consistency?",
            "Does the adjusted p-value survive the family it belongs to?",
            "Are the per-regime aggregates stable or driven by two windows?",
        ]
    }
}

/// Devil's advocate.
pub struct Contrarian;

impl Persona for Contrarian {
    fn name(&self) -> &'static str {
        "contrarian"
    }

    fn description(&self) -> &'static str {
        "argues the opposite case; hunts for crowding and decay"
    }

    fn system_prompt(&self) -> &'static str {
        "You are a contrarian allocator. Assume the edge is already \
         crowded, the backtest flatters, and the counterparty is smarter. \
         Make the strongest case against this strategy."
    }

    fn focus(&self) -> &'static [&'static str] {
        &[
            "Who is on the other side, and why would they keep paying?",
            "What changed in market structure since the sample period?",
            "If this worked, why is it public?",
        ]
    }
}

/// Unconstrained idea generator.
pub struct MadGenius;

impl Persona for MadGenius {
    fn name(&self) -> &'static str {
        "mad-genius"
    }

    fn description(&self) -> &'static str {
        "generates unconventional variations and combinations"
    }

    fn system_prompt(&self) -> &'static str {
        "You are an unconstrained strategy inventor. Propose the \
         combinations and mutations nobody else on the panel would, then \
         say which one you would actually test first."
    }

    fn focus(&self) -> &'static [&'static str] {
        &[
            "What adjacent signal would make this edge orthogonal?",
            "Which two cataloged strategies would hedge each other here?",
            "What data nobody mentioned would sharpen the entry?",
        ]
    }
}

/// Resolve configured roster names to persona implementations. Unknown
/// names are skipped with their names returned for diagnostics.
pub fn resolve_roster(names: &[String]) -> (Vec<Box<dyn Persona>>, Vec<String>) {
    let mut roster: Vec<Box<dyn Persona>> = Vec::new();
    let mut unknown = Vec::new();
    for name in names {
        match name.as_str() {
            "momentum-trader" => roster.push(Box::new(MomentumTrader)),
            "risk-manager" => roster.push(Box::new(RiskManager)),
            "quant-researcher" => roster.push(Box::new(QuantResearcher)),
            "contrarian" => roster.push(Box::new(Contrarian)),
            "mad-genius" => roster.push(Box::new(MadGenius)),
            other => unknown.push(other.to_string()),
        }
    }
    (roster, unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roster_resolves() {
        let names: Vec<String> = crate::config::PersonaConfig::default().personas;
        let (roster, unknown) = resolve_roster(&names);
        assert_eq!(roster.len(), 5);
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_unknown_names_are_reported() {
        let (roster, unknown) =
            resolve_roster(&["risk-manager".to_string(), "astrologer".to_string()]);
        assert_eq!(roster.len(), 1);
        assert_eq!(unknown, vec!["astrologer".to_string()]);
    }

    #[test]
    fn test_persona_names_are_unique() {
        let (roster, _) = resolve_roster(&crate::config::PersonaConfig::default().personas);
        let mut names: Vec<&str> = roster.iter().map(|p| p.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 5);
    }
}
