//! Deterministic backtest code generation.
//!
//! A pure function of `(definition, generator_version)`: the same
//! definition hash always yields byte-identical code. The emitted artifact
//! consumes a time range supplied by the walk-forward executor — generated
//! code never contains a start or end date, and any literal date in the
//! output is treated as a generation bug.

pub mod archetype;
pub mod dsl;
pub mod fingerprint;

pub use archetype::Archetype;
pub use fingerprint::{cross_check, LogicFingerprint};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::LazyLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::hash::sha256_hex;
use crate::llm::{AgentTask, FieldSpec, FieldType, OutputSchema, SubAgentClient};
use crate::record::types::{StrategyDefinition, StrategyTier};

/// Version stamped into every artifact. Bumping it changes every
/// validation key, so bump only when emission actually changes.
pub const GENERATOR_VERSION: &str = "1.2.0";

static LITERAL_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(19|20)\d{2}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])\b").expect("static regex")
});

/// A generated backtest artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestArtifact {
    pub file_name: String,
    pub code: String,
    /// Content hash of `code`, recorded with every validation
    pub code_hash: String,
    pub generator_version: String,
    pub fingerprint: LogicFingerprint,
    /// Tier-3 output may not execute until a reviewer approves it
    pub needs_review: bool,
}

/// The deterministic code generator.
#[derive(Debug, Clone, Default)]
pub struct CodeGenerator;

impl CodeGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate the artifact for a tier-1 or tier-2 definition.
    ///
    /// Tier-3 definitions have no deterministic expansion; use
    /// [`CodeGenerator::generate_free_form`].
    pub fn generate(&self, definition: &StrategyDefinition) -> Result<BacktestArtifact> {
        let archetype = match definition.tier {
            StrategyTier::Template => {
                let name = definition.archetype.as_deref().ok_or_else(|| {
                    Error::GenerationFailure("tier-1 definition without an archetype".to_string())
                })?;
                Some(Archetype::from_name(name).ok_or_else(|| {
                    Error::GenerationFailure(format!("unknown archetype '{name}'"))
                })?)
            }
            StrategyTier::Assembled => None,
            StrategyTier::FreeForm => {
                return Err(Error::GenerationFailure(
                    "tier-3 definitions require sub-agent generation and human review"
                        .to_string(),
                ))
            }
        };

        let code = render(definition, archetype)?;
        self.finalize(definition, code, false)
    }

    /// Tier-3 path: ask a sub-agent for free-form code. The artifact is
    /// flagged `needs_review`; the state machine blocks execution until a
    /// human approves it.
    pub async fn generate_free_form(
        &self,
        client: &dyn SubAgentClient,
        definition: &StrategyDefinition,
    ) -> Result<BacktestArtifact> {
        let schema = OutputSchema::new(
            "free_form_generation",
            vec![
                FieldSpec::required("code", FieldType::String, "complete backtest algorithm"),
                FieldSpec::required("language", FieldType::Enum(vec!["python"]), "language"),
                FieldSpec::optional("notes", FieldType::String, "implementation caveats"),
            ],
        );
        let task = AgentTask::new(
            "codegen:free-form",
            "You write backtest algorithms against the harness API \
             (Algorithm base class, self.ind indicators, self.series). \
             Never set start or end dates: the harness injects them.",
            format!(
                "Write a complete algorithm for this strategy definition:\n\n{}",
                serde_yaml::to_string(definition)?
            ),
        )
        .with_max_tokens(8192);

        let payload = client.dispatch(&task, &schema).await?;
        let code = payload["code"]
            .as_str()
            .ok_or_else(|| Error::GenerationFailure("agent returned no code".to_string()))?
            .to_string();

        self.finalize(definition, code, true)
    }

    fn finalize(
        &self,
        definition: &StrategyDefinition,
        code: String,
        needs_review: bool,
    ) -> Result<BacktestArtifact> {
        // No-dates contract: any emitted literal date is a generation bug.
        if let Some(m) = LITERAL_DATE_RE.find(&code) {
            return Err(Error::GenerationFailure(format!(
                "generated code contains literal date '{}'",
                m.as_str()
            )));
        }

        let code_hash = sha256_hex(code.as_bytes());
        let fingerprint = if needs_review {
            // Free-form code is fingerprinted for the record but the
            // cross-check gate is the reviewer's job.
            LogicFingerprint::extract(&code)
        } else {
            fingerprint::cross_check(definition, &code)?
        };

        info!(
            tier = u8::from(definition.tier),
            code_hash = crate::hash::short(&code_hash),
            needs_review,
            "artifact generated"
        );
        Ok(BacktestArtifact {
            file_name: "algorithm.py".to_string(),
            code,
            code_hash,
            generator_version: GENERATOR_VERSION.to_string(),
            fingerprint,
            needs_review,
        })
    }
}

fn format_param(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Render the algorithm source for a tier-1 or tier-2 definition.
fn render(definition: &StrategyDefinition, archetype: Option<Archetype>) -> Result<String> {
    let definition_hash = definition.definition_hash()?;
    let (entry_rules, exit_rules) = definition.canonical_conditions();

    let compile = |rules: &[String]| -> Result<Vec<(String, String)>> {
        rules
            .iter()
            .map(|rule| {
                let expr = dsl::parse(rule)?;
                dsl::validate(&expr, &definition.parameters)?;
                Ok((rule.clone(), dsl::emit(&expr, &definition.parameters)))
            })
            .collect()
    };
    let entries = compile(&entry_rules)?;
    let exits = compile(&exit_rules)?;
    if entries.is_empty() || exits.is_empty() {
        return Err(Error::GenerationFailure(
            "definition needs at least one entry and one exit rule".to_string(),
        ));
    }

    let mut universe: Vec<String> = definition
        .universe
        .symbols
        .iter()
        .map(|s| s.to_ascii_uppercase())
        .collect();
    universe.sort();

    let mut code = String::new();
    let _ = writeln!(code, "# Generated backtest algorithm. Do not edit.");
    let _ = writeln!(code, "# generator: rkit-core v{GENERATOR_VERSION}");
    let _ = writeln!(code, "# definition: {definition_hash}");
    let _ = writeln!(
        code,
        "# The walk-forward harness injects the date range; this file never sets dates."
    );
    let _ = writeln!(code);
    let _ = writeln!(code, "from harness import Algorithm");
    let _ = writeln!(code);
    let _ = writeln!(code);

    let symbols = universe
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(code, "UNIVERSE = [{symbols}]");
    let _ = writeln!(code);
    let _ = writeln!(code, "PARAMS = {{");
    for (name, value) in &definition.parameters {
        let _ = writeln!(code, "    \"{name}\": {},", format_param(*value));
    }
    let _ = writeln!(code, "}}");
    let _ = writeln!(code);
    let _ = writeln!(code);

    let schedule = archetype.map(|a| a.schedule()).unwrap_or("daily");
    let _ = writeln!(code, "class Strategy(Algorithm):");
    let _ = writeln!(code, "    def initialize(self):");
    let _ = writeln!(code, "        self.params = dict(PARAMS)");
    let _ = writeln!(code, "        for symbol in UNIVERSE:");
    let _ = writeln!(code, "            self.add_equity(symbol)");
    let _ = writeln!(
        code,
        "        self.set_sizing(\"{}\", max_leverage={}, max_position_pct={})",
        definition.sizing.method,
        format_param(definition.sizing.max_leverage),
        definition.sizing.max_position_pct,
    );
    let _ = writeln!(code, "        self.schedule_rebalance(\"{schedule}\")");
    let _ = writeln!(code);

    let emit_signal = |code: &mut String, name: &str, compiled: &[(String, String)], joiner: &str| {
        let _ = writeln!(code, "    def {name}(self, symbol=None):");
        for (i, (rule, emitted)) in compiled.iter().enumerate() {
            let _ = writeln!(code, "        # rule: {rule}");
            let _ = writeln!(code, "        c{i} = {emitted}");
        }
        let clause = (0..compiled.len())
            .map(|i| format!("c{i}"))
            .collect::<Vec<_>>()
            .join(joiner);
        let _ = writeln!(code, "        return {clause}");
        let _ = writeln!(code);
    };

    // Entries are a conjunction, exits a disjunction.
    emit_signal(&mut code, "entry_signal", &entries, " and ");
    emit_signal(&mut code, "exit_signal", &exits, " or ");

    let _ = writeln!(code, "    def position_size(self, symbol):");
    let _ = writeln!(
        code,
        "        return min(self.params.get(\"max_position_pct\", {pct}), {pct})",
        pct = definition.sizing.max_position_pct,
    );
    let _ = writeln!(code);

    match archetype {
        Some(a) => code.push_str(a.scaffold()),
        None => {
            let _ = writeln!(code, "    def on_rebalance(self):");
            let _ = writeln!(code, "        for symbol in self.universe():");
            let _ = writeln!(
                code,
                "            if self.entry_signal(symbol) and not self.holds(symbol):"
            );
            let _ = writeln!(
                code,
                "                self.set_target_weight(symbol, self.position_size(symbol))"
            );
            let _ = writeln!(
                code,
                "            elif self.exit_signal(symbol) and self.holds(symbol):"
            );
            let _ = writeln!(code, "                self.liquidate(symbol)");
        }
    }

    Ok(code)
}
