//! Parallel persona dispatch and synthesis.
//!
//! Each configured persona runs as an isolated sub-agent over the same
//! analysis context. Outputs are collected with a per-persona deadline; a
//! missing persona is recorded, not fatal, as long as a quorum responds.
//! The synthesizer receives the reports in persona-name order, so the
//! synthesis cannot depend on response arrival order.

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use crate::config::PersonaConfig;
use crate::error::{Error, Result};
use crate::llm::{AgentTask, FieldSpec, FieldType, OutputSchema, SubAgentClient};
use crate::persona::roster::{resolve_roster, Persona};
use crate::persona::types::{
    AnalysisContext, PersonaOutcome, PersonaReport, Synthesis, SynthesisStatus,
};
use crate::record::store::RecordStore;
use crate::record::types::{
    IdeaId, IdeaRecord, LearningRecord, ProposalId, ProposalKind, ProposalRecord, ProposalStatus,
    StrategyId, ValidationId,
};

fn report_schema() -> OutputSchema {
    OutputSchema::new(
        "persona_report",
        vec![
            FieldSpec::required("assessment", FieldType::String, "overall judgment"),
            FieldSpec::required("concerns", FieldType::StringList, "specific concerns"),
            FieldSpec::required("actions", FieldType::StringList, "recommended actions"),
            FieldSpec::required("confidence", FieldType::Range(0.0, 1.0), "certainty"),
        ],
    )
}

fn synthesis_schema() -> OutputSchema {
    OutputSchema::new(
        "synthesis",
        vec![
            FieldSpec::required(
                "status",
                FieldType::Enum(vec!["VALIDATED", "CONDITIONAL", "INVALIDATED"]),
                "combined judgment over the panel",
            ),
            FieldSpec::required("consensus", FieldType::String, "where the panel agrees"),
            FieldSpec::required(
                "disagreements",
                FieldType::StringList,
                "where the panel splits",
            ),
            FieldSpec::required("actions", FieldType::StringList, "combined action list"),
            FieldSpec::optional(
                "proposed_combinations",
                FieldType::StringList,
                "strategies worth combining with this one",
            ),
            FieldSpec::optional(
                "data_recommendations",
                FieldType::StringList,
                "datasets worth acquiring",
            ),
            FieldSpec::optional(
                "new_ideas",
                FieldType::StringList,
                "derivative strategy sketches",
            ),
        ],
    )
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value[key]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Records created from one synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSummary {
    pub learning_id: uuid::Uuid,
    pub proposal_ids: Vec<ProposalId>,
    pub idea_ids: Vec<IdeaId>,
}

/// Dispatches the persona panel and synthesizes its outputs.
pub struct PersonaOrchestrator {
    client: Arc<dyn SubAgentClient>,
    config: PersonaConfig,
}

impl PersonaOrchestrator {
    pub fn new(client: Arc<dyn SubAgentClient>, config: PersonaConfig) -> Self {
        Self { client, config }
    }

    /// Run the full panel and synthesize.
    pub async fn analyze(&self, context: &AnalysisContext) -> Result<Synthesis> {
        let (roster, unknown) = resolve_roster(&self.config.personas);
        for name in &unknown {
            warn!(persona = %name, "unknown persona in configuration, skipping");
        }
        if roster.is_empty() {
            return Err(Error::Config("persona roster is empty".to_string()));
        }

        let outcomes = self.dispatch_panel(&roster, context).await;

        let responded = outcomes.iter().filter(|o| o.report().is_some()).count();
        if responded < self.config.quorum {
            return Err(Error::Internal(format!(
                "persona quorum not met: {responded} of {} responded, need {}",
                roster.len(),
                self.config.quorum
            )));
        }

        // Order-independence: reports and missing lists are sorted by
        // persona name before the synthesizer sees them.
        let mut reports: Vec<PersonaReport> = outcomes
            .iter()
            .filter_map(|o| o.report().cloned())
            .collect();
        reports.sort_by(|a, b| a.persona.cmp(&b.persona));
        let mut missing: Vec<String> = outcomes
            .iter()
            .filter(|o| o.report().is_none())
            .map(|o| o.persona_name().to_string())
            .collect();
        missing.sort();

        self.synthesize(context, reports, missing).await
    }

    async fn dispatch_panel(
        &self,
        roster: &[Box<dyn Persona>],
        context: &AnalysisContext,
    ) -> Vec<PersonaOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let deadline = Duration::from_secs(self.config.timeout_secs);
        let schema = report_schema();

        let futures = roster.iter().map(|persona| {
            let semaphore = Arc::clone(&semaphore);
            let schema = &schema;
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return PersonaOutcome::Missing {
                            persona: persona.name().to_string(),
                            reason: "orchestrator shut down".to_string(),
                        }
                    }
                };

                let mut prompt = context.prompt_block();
                prompt.push_str("\nFocus on:\n");
                for bullet in persona.focus() {
                    prompt.push_str(&format!("- {bullet}\n"));
                }
                let task = AgentTask::new(
                    format!("persona:{}", persona.name()),
                    persona.system_prompt(),
                    prompt,
                );

                match timeout(deadline, self.client.dispatch(&task, schema)).await {
                    Ok(Ok(payload)) => PersonaOutcome::Responded {
                        report: PersonaReport {
                            persona: persona.name().to_string(),
                            assessment: payload["assessment"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string(),
                            concerns: string_list(&payload, "concerns"),
                            actions: string_list(&payload, "actions"),
                            confidence: payload["confidence"].as_f64().unwrap_or(0.0),
                        },
                    },
                    Ok(Err(e)) => {
                        warn!(persona = persona.name(), error = %e, "persona failed");
                        PersonaOutcome::Missing {
                            persona: persona.name().to_string(),
                            reason: e.to_string(),
                        }
                    }
                    Err(_) => {
                        let e = Error::PersonaTimeout {
                            persona: persona.name().to_string(),
                            duration_ms: deadline.as_millis() as u64,
                        };
                        warn!(persona = persona.name(), "{e}");
                        PersonaOutcome::Missing {
                            persona: persona.name().to_string(),
                            reason: e.to_string(),
                        }
                    }
                }
            }
        });

        join_all(futures).await
    }

    async fn synthesize(
        &self,
        context: &AnalysisContext,
        reports: Vec<PersonaReport>,
        missing: Vec<String>,
    ) -> Result<Synthesis> {
        let mut prompt = context.prompt_block();
        prompt.push_str("\nPanel reports, in persona-name order:\n");
        for report in &reports {
            prompt.push_str(&serde_json::to_string_pretty(report)?);
            prompt.push('\n');
        }
        if !missing.is_empty() {
            prompt.push_str(&format!(
                "\nPersonas with status missing (no response): {}\n",
                missing.join(", ")
            ));
        }

        let task = AgentTask::new(
            "persona:synthesizer",
            "You synthesize a panel of analyst reports into one judgment. \
             Weigh the evidence; you are not bound by any single persona's \
             view. Treat the reports as an unordered set.",
            prompt,
        )
        .with_max_tokens(4096);

        let payload = self.client.dispatch(&task, &synthesis_schema()).await?;
        let status = payload["status"]
            .as_str()
            .and_then(SynthesisStatus::parse)
            .ok_or_else(|| Error::SchemaValidation {
                task: "persona:synthesizer".to_string(),
                detail: "unparseable status".to_string(),
            })?;

        info!(
            status = ?status,
            reports = reports.len(),
            missing = missing.len(),
            "synthesis complete"
        );
        Ok(Synthesis {
            status,
            consensus: payload["consensus"].as_str().unwrap_or_default().to_string(),
            disagreements: string_list(&payload, "disagreements"),
            actions: string_list(&payload, "actions"),
            proposed_combinations: string_list(&payload, "proposed_combinations"),
            data_recommendations: string_list(&payload, "data_recommendations"),
            new_ideas: string_list(&payload, "new_ideas"),
            missing,
            reports,
        })
    }

    /// Turn a synthesis into learnings, proposals, and ideas.
    pub fn harvest(
        &self,
        store: &RecordStore,
        strategy_id: StrategyId,
        validation_id: ValidationId,
        factors: &[String],
        synthesis: &Synthesis,
    ) -> Result<HarvestSummary> {
        let mut insights = std::collections::BTreeMap::new();
        for report in &synthesis.reports {
            insights.insert(report.persona.clone(), report.assessment.clone());
        }
        insights.insert("synthesis".to_string(), synthesis.consensus.clone());
        insights.insert(
            "panel_status".to_string(),
            format!("{:?}", synthesis.status),
        );

        let learning = LearningRecord {
            id: uuid::Uuid::new_v4(),
            strategy_id,
            validation_ids: vec![validation_id],
            created_at: chrono::Utc::now(),
            insights,
            factors: factors.to_vec(),
        };
        store.append_learning(&learning)?;

        let mut proposal_ids = Vec::new();
        for sketch in &synthesis.proposed_combinations {
            let proposal = ProposalRecord {
                id: store.next_proposal_id()?,
                created_at: chrono::Utc::now(),
                status: ProposalStatus::Pending,
                kind: ProposalKind::CompositeStrategy {
                    parents: vec![strategy_id],
                    sketch: sketch.clone(),
                },
                rationale: synthesis.consensus.clone(),
                source_strategy: Some(strategy_id),
                reviewed_at: None,
                review_note: None,
            };
            store.create_proposal(&proposal)?;
            proposal_ids.push(proposal.id);
        }
        for dataset in &synthesis.data_recommendations {
            let proposal = ProposalRecord {
                id: store.next_proposal_id()?,
                created_at: chrono::Utc::now(),
                status: ProposalStatus::Pending,
                kind: ProposalKind::DataAcquisition {
                    dataset: dataset.clone(),
                    justification: format!("recommended by analysis of {strategy_id}"),
                },
                rationale: synthesis.consensus.clone(),
                source_strategy: Some(strategy_id),
                reviewed_at: None,
                review_note: None,
            };
            store.create_proposal(&proposal)?;
            proposal_ids.push(proposal.id);
        }

        let mut idea_ids = Vec::new();
        for sketch in &synthesis.new_ideas {
            let title: String = sketch.chars().take(60).collect();
            let idea = IdeaRecord {
                id: store.next_idea_id()?,
                created_at: chrono::Utc::now(),
                title,
                sketch: sketch.clone(),
                parents: vec![strategy_id],
                persona: "synthesizer".to_string(),
            };
            store.create_idea(&idea)?;
            idea_ids.push(idea.id);
        }

        Ok(HarvestSummary {
            learning_id: learning.id,
            proposal_ids,
            idea_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Correction;
    use crate::llm::UsageTotals;
    use crate::record::types::tests::sample_definition;
    use crate::stats::AggregateMetrics;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Mock provider: canned reports, recorded prompts, optional failures.
    struct MockClient {
        fail: HashSet<String>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl MockClient {
        fn new() -> Self {
            Self {
                fail: HashSet::new(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing(names: &[&str]) -> Self {
            Self {
                fail: names.iter().map(|s| s.to_string()).collect(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn synthesizer_prompts(&self) -> Vec<String> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .filter(|(name, _)| name == "persona:synthesizer")
                .map(|(_, prompt)| prompt.clone())
                .collect()
        }
    }

    #[async_trait]
    impl SubAgentClient for MockClient {
        async fn dispatch(
            &self,
            task: &AgentTask,
            _schema: &OutputSchema,
        ) -> crate::error::Result<Value> {
            self.prompts
                .lock()
                .unwrap()
                .push((task.name.clone(), task.prompt.clone()));
            if self.fail.contains(&task.name) {
                return Err(Error::llm_api("mock", "simulated outage"));
            }
            if task.name == "persona:synthesizer" {
                return Ok(json!({
                    "status": "CONDITIONAL",
                    "consensus": "edge is real but regime-dependent",
                    "disagreements": ["contrarian doubts persistence"],
                    "actions": ["retest with volatility filter"],
                    "proposed_combinations": ["pair with a low-vol sleeve"],
                    "data_recommendations": ["point-in-time index membership"],
                    "new_ideas": ["momentum gated by implied volatility below 25"],
                }));
            }
            Ok(json!({
                "assessment": format!("assessment from {}", task.name),
                "concerns": ["capacity"],
                "actions": ["monitor turnover"],
                "confidence": 0.7,
            }))
        }

        fn provider_name(&self) -> &str {
            "mock"
        }

        fn usage(&self) -> UsageTotals {
            UsageTotals::default()
        }
    }

    fn context() -> AnalysisContext {
        AnalysisContext {
            strategy_name: "dual momentum".to_string(),
            definition: sample_definition(),
            aggregate: AggregateMetrics {
                window_count: 12,
                mean_sharpe: 0.9,
                sharpe_ci: (0.5, 1.3),
                consistency: 0.83,
                worst_drawdown: 0.22,
                total_trades: 600,
                p_value: 0.002,
                p_adjusted: 0.004,
                family_size: 2,
                correction: Correction::Fdr,
                effect_size: 1.1,
                per_regime: Vec::new(),
                bootstrap_seed: 7,
            },
            verdict: "VALIDATED".to_string(),
        }
    }

    fn orchestrator(client: MockClient) -> (PersonaOrchestrator, Arc<MockClient>) {
        let client = Arc::new(client);
        (
            PersonaOrchestrator::new(
                Arc::clone(&client) as Arc<dyn SubAgentClient>,
                crate::config::PersonaConfig::default(),
            ),
            client,
        )
    }

    #[tokio::test]
    async fn test_full_panel_synthesis() {
        let (orchestrator, _client) = orchestrator(MockClient::new());
        let synthesis = orchestrator.analyze(&context()).await.unwrap();

        assert_eq!(synthesis.status, SynthesisStatus::Conditional);
        assert_eq!(synthesis.reports.len(), 5);
        assert!(synthesis.missing.is_empty());
        // Reports arrive sorted by persona name
        let names: Vec<&str> = synthesis.reports.iter().map(|r| r.persona.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn test_missing_personas_tolerated_at_quorum() {
        let (orchestrator, _client) = orchestrator(MockClient::failing(&[
            "persona:contrarian",
            "persona:mad-genius",
        ]));
        let synthesis = orchestrator.analyze(&context()).await.unwrap();

        assert_eq!(synthesis.reports.len(), 3);
        assert_eq!(
            synthesis.missing,
            vec!["contrarian".to_string(), "mad-genius".to_string()]
        );
    }

    #[tokio::test]
    async fn test_below_quorum_fails() {
        let (orchestrator, _client) = orchestrator(MockClient::failing(&[
            "persona:contrarian",
            "persona:mad-genius",
            "persona:risk-manager",
        ]));
        let err = orchestrator.analyze(&context()).await.unwrap_err();
        assert!(err.to_string().contains("quorum"));
    }

    #[tokio::test]
    async fn test_synthesizer_input_is_order_independent() {
        // Two rosters with opposite configuration order must hand the
        // synthesizer byte-identical prompts.
        let client_a = Arc::new(MockClient::new());
        let mut config_a = crate::config::PersonaConfig::default();
        config_a.personas.sort();
        let orch_a = PersonaOrchestrator::new(
            Arc::clone(&client_a) as Arc<dyn SubAgentClient>,
            config_a,
        );
        orch_a.analyze(&context()).await.unwrap();

        let client_b = Arc::new(MockClient::new());
        let mut config_b = crate::config::PersonaConfig::default();
        config_b.personas.sort();
        config_b.personas.reverse();
        let orch_b = PersonaOrchestrator::new(
            Arc::clone(&client_b) as Arc<dyn SubAgentClient>,
            config_b,
        );
        orch_b.analyze(&context()).await.unwrap();

        assert_eq!(
            client_a.synthesizer_prompts(),
            client_b.synthesizer_prompts()
        );
    }

    #[tokio::test]
    async fn test_harvest_creates_records() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let (orchestrator, _client) = orchestrator(MockClient::new());
        let synthesis = orchestrator.analyze(&context()).await.unwrap();

        let summary = orchestrator
            .harvest(
                &store,
                StrategyId(1),
                ValidationId::new(),
                &["momentum".to_string()],
                &synthesis,
            )
            .unwrap();

        assert_eq!(summary.proposal_ids.len(), 2);
        assert_eq!(summary.idea_ids.len(), 1);
        assert_eq!(store.list_learnings(Some(StrategyId(1))).unwrap().len(), 1);
        assert_eq!(store.list_proposals().unwrap().len(), 2);
        assert_eq!(store.list_ideas().unwrap().len(), 1);
    }
}
