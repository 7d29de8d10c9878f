//! The staged pipeline driver.
//!
//! Carries one record at a time through Verify, Generate, Execute, Tag,
//! and Validate; different records may occupy different stages
//! concurrently because every move goes through the store's
//! compare-and-swap. Failure at a gate halts forward motion with the
//! reason on the record.

use chrono::{Datelike, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backtest::backend::BacktestBackend;
use crate::backtest::executor::WalkForwardExecutor;
use crate::backtest::windows::plan_non_overlapping;
use crate::codegen::{BacktestArtifact, CodeGenerator, GENERATOR_VERSION};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::llm::SubAgentClient;
use crate::persona::{AnalysisContext, HarvestSummary, PersonaOrchestrator, Synthesis};
use crate::record::state::StrategyState;
use crate::record::store::RecordStore;
use crate::record::types::{
    StrategyDefinition, StrategyId, StrategyTier, ValidationId, ValidationKey, ValidationRecord,
};
use crate::registry::DataRegistry;
use crate::regime::RegimeTagger;
use crate::stats::{StatisticalValidator, Verdict};
use crate::verify::{CheckContext, VerificationEngine, VerificationReport};

/// Drives records through the stage machine.
pub struct Pipeline {
    store: Arc<RecordStore>,
    config: PipelineConfig,
    registry: DataRegistry,
    generator: CodeGenerator,
    backend: Arc<dyn BacktestBackend>,
    tagger: Arc<RegimeTagger>,
    /// Windows count back from this year; defaults to the current year
    anchor_year: i32,
}

impl Pipeline {
    pub fn new(
        store: Arc<RecordStore>,
        config: PipelineConfig,
        registry: DataRegistry,
        backend: Arc<dyn BacktestBackend>,
        tagger: Arc<RegimeTagger>,
    ) -> Self {
        Self {
            store,
            config,
            registry,
            generator: CodeGenerator::new(),
            backend,
            tagger,
            anchor_year: Utc::now().year(),
        }
    }

    /// Pin the window anchor, for reproducible studies.
    pub fn with_anchor_year(mut self, year: i32) -> Self {
        self.anchor_year = year;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn history_bounds(&self) -> Result<(chrono::NaiveDate, chrono::NaiveDate)> {
        let windows = plan_non_overlapping(
            self.anchor_year,
            self.config.windows.window_count,
            self.config.windows.window_span_years,
        )?;
        let start = windows.first().map(|w| w.start);
        let end = windows.last().map(|w| w.end);
        match (start, end) {
            (Some(start), Some(end)) => Ok((start, end)),
            _ => Err(Error::Config("empty window plan".to_string())),
        }
    }

    // ==================== Verify ====================

    /// Run the static checks. Pass moves the record to READY_TO_GENERATE;
    /// any failure blocks it with the reasons recorded.
    pub fn verify(&self, id: StrategyId) -> Result<VerificationReport> {
        let record = self.store.get_strategy(id)?;
        let from = record.state;
        if !matches!(
            from,
            StrategyState::Pending | StrategyState::Blocked | StrategyState::Error
        ) {
            return Err(Error::state_conflict(id.to_string(), StrategyState::Pending, from));
        }
        self.store
            .update_state(id, from, StrategyState::Verifying, "verification started")?;

        let (history_start, history_end) = self.history_bounds()?;
        let engine = VerificationEngine::new().with_enabled(&self.config.enabled_checks);
        let report = engine.run(&CheckContext {
            definition: &record.definition,
            history_start,
            history_end,
            registry: &self.registry,
        });

        if report.passed() {
            self.store.update_state(
                id,
                StrategyState::Verifying,
                StrategyState::ReadyToGenerate,
                "all checks passed",
            )?;
        } else {
            let reason = report.failures().join("; ");
            self.store.update_state(
                id,
                StrategyState::Verifying,
                StrategyState::Blocked,
                reason,
            )?;
        }
        Ok(report)
    }

    // ==================== Generate ====================

    fn artifact_dir(&self, id: StrategyId) -> PathBuf {
        self.store.root().join("artifacts").join(id.to_string())
    }

    fn persist_artifact(&self, id: StrategyId, artifact: &BacktestArtifact) -> Result<()> {
        let dir = self.artifact_dir(id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("artifact.yaml"), serde_yaml::to_string(artifact)?)?;
        std::fs::write(dir.join(&artifact.file_name), &artifact.code)?;
        Ok(())
    }

    fn load_artifact(&self, id: StrategyId) -> Result<BacktestArtifact> {
        let path = self.artifact_dir(id).join("artifact.yaml");
        if !path.exists() {
            return Err(Error::storage(format!("no generated artifact for {id}")));
        }
        Ok(serde_yaml::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Strip authoring noise before the one retry the generator gets.
    fn sanitize(definition: &StrategyDefinition) -> StrategyDefinition {
        let mut sanitized = definition.clone();
        let clean = |rules: &mut Vec<String>| {
            rules.iter_mut().for_each(|r| *r = r.trim().to_string());
            rules.retain(|r| !r.is_empty());
        };
        clean(&mut sanitized.entry);
        clean(&mut sanitized.exit);
        clean(&mut sanitized.management);
        sanitized
    }

    /// Generate the artifact for a tier-1/2 record.
    pub fn generate(&self, id: StrategyId) -> Result<BacktestArtifact> {
        let record = self.store.get_strategy(id)?;
        let from = record.state;
        if !matches!(from, StrategyState::ReadyToGenerate | StrategyState::Error) {
            return Err(Error::state_conflict(
                id.to_string(),
                StrategyState::ReadyToGenerate,
                from,
            ));
        }
        self.store
            .update_state(id, from, StrategyState::Generating, "generation started")?;

        let artifact = match self.generator.generate(&record.definition) {
            Ok(artifact) => artifact,
            Err(first_err) => {
                // One retry against a sanitized definition, then ERROR.
                warn!(id = %id, error = %first_err, "generation failed, retrying sanitized");
                self.store.update_state(
                    id,
                    StrategyState::Generating,
                    StrategyState::GenFailed,
                    first_err.to_string(),
                )?;
                self.store.update_state(
                    id,
                    StrategyState::GenFailed,
                    StrategyState::Generating,
                    "retry with sanitized input",
                )?;
                match self.generator.generate(&Self::sanitize(&record.definition)) {
                    Ok(artifact) => artifact,
                    Err(second_err) => {
                        self.store.update_state(
                            id,
                            StrategyState::Generating,
                            StrategyState::Error,
                            second_err.to_string(),
                        )?;
                        return Err(second_err);
                    }
                }
            }
        };

        self.persist_artifact(id, &artifact)?;
        let next = if artifact.needs_review {
            StrategyState::NeedsReview
        } else {
            StrategyState::ReadyToExecute
        };
        self.store.update_state(
            id,
            StrategyState::Generating,
            next,
            format!("artifact {}", crate::hash::short(&artifact.code_hash)),
        )?;
        Ok(artifact)
    }

    /// Tier-3 path: sub-agent generation, always parked for human review.
    pub async fn generate_free_form(
        &self,
        client: &dyn SubAgentClient,
        id: StrategyId,
    ) -> Result<BacktestArtifact> {
        let record = self.store.get_strategy(id)?;
        if record.definition.tier != StrategyTier::FreeForm {
            return Err(Error::GenerationFailure(format!(
                "{id} is not a tier-3 definition"
            )));
        }
        let from = record.state;
        self.store
            .update_state(id, from, StrategyState::Generating, "tier-3 generation started")?;

        let artifact = match self
            .generator
            .generate_free_form(client, &record.definition)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                self.store.update_state(
                    id,
                    StrategyState::Generating,
                    StrategyState::Error,
                    e.to_string(),
                )?;
                return Err(e);
            }
        };

        self.persist_artifact(id, &artifact)?;
        self.store.update_state(
            id,
            StrategyState::Generating,
            StrategyState::NeedsReview,
            "tier-3 output awaiting human review",
        )?;
        Ok(artifact)
    }

    /// Reviewer approval of tier-3 output unlocks execution.
    pub fn approve_generated(&self, id: StrategyId, reviewer_note: &str) -> Result<()> {
        self.store.update_state(
            id,
            StrategyState::NeedsReview,
            StrategyState::ReadyToExecute,
            format!("review approved: {reviewer_note}"),
        )?;
        Ok(())
    }

    // ==================== Execute + validate ====================

    /// Run the walk-forward windows and write the immutable validation.
    ///
    /// Out-of-sample windows are one-shot per definition: a validation
    /// with the same `(definition_hash, code_hash, generator_version)` is
    /// refused unless `force` is set, and force still appends a fresh
    /// record.
    pub async fn validate(&self, id: StrategyId, force: bool) -> Result<ValidationRecord> {
        let record = self.store.get_strategy(id)?;
        let from = record.state;
        if !matches!(from, StrategyState::ReadyToExecute | StrategyState::Error) {
            return Err(Error::state_conflict(
                id.to_string(),
                StrategyState::ReadyToExecute,
                from,
            ));
        }
        let artifact = self.load_artifact(id)?;

        let key = ValidationKey {
            definition_hash: record.definition_hash.clone(),
            code_hash: artifact.code_hash.clone(),
            generator_version: artifact.generator_version.clone(),
        };
        if !force && self.store.has_validation(&key)? {
            return Err(Error::ValidationExists {
                definition_hash: record.definition_hash.clone(),
            });
        }

        self.store
            .update_state(id, from, StrategyState::Executing, "walk-forward started")?;
        let started_at = Utc::now();

        let windows = plan_non_overlapping(
            self.anchor_year,
            self.config.windows.window_count,
            self.config.windows.window_span_years,
        )?;
        let executor = WalkForwardExecutor::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.tagger),
            self.config.windows.clone(),
        );

        let execution = match executor
            .execute(&artifact, &windows, self.config.stats.bootstrap_seed)
            .await
        {
            Ok(execution) => execution,
            Err(e) => {
                self.store.update_state(
                    id,
                    StrategyState::Executing,
                    StrategyState::Error,
                    e.to_string(),
                )?;
                return Err(e);
            }
        };

        self.store.update_state(
            id,
            StrategyState::Executing,
            StrategyState::Analyzing,
            format!(
                "{} windows complete, {} failed",
                execution.windows.len(),
                execution.failed_windows()
            ),
        )?;

        // The multiple-testing family is every validation in this
        // definition's lineage.
        let family_hashes = self.store.lineage_definition_hashes(id)?;
        let family_p = self.store.index().family_p_values(&family_hashes)?;

        let validator =
            StatisticalValidator::new(self.config.gates.clone(), self.config.stats.clone());
        let outcome = validator.evaluate(&execution.samples, &family_p);

        let validation = ValidationRecord {
            id: ValidationId::new(),
            strategy_id: id,
            definition_hash: record.definition_hash.clone(),
            code_hash: artifact.code_hash.clone(),
            generator_version: GENERATOR_VERSION.to_string(),
            started_at,
            completed_at: Utc::now(),
            windows: execution.windows,
            outcome,
        };
        self.store
            .append_validation(&validation, &artifact.file_name, &artifact.code, force)?;

        let (to, cause) = match &validation.outcome.verdict {
            Verdict::Validated => (StrategyState::Validated, "all gates passed".to_string()),
            Verdict::Conditional { regimes } => (
                StrategyState::Conditional,
                format!("passes in: {}", regimes.join(", ")),
            ),
            other => (
                StrategyState::Invalidated,
                format!("gates failed ({})", other.label()),
            ),
        };
        self.store
            .update_state(id, StrategyState::Analyzing, to, cause)?;

        info!(
            id = %id,
            verdict = validation.outcome.verdict.label(),
            mean_sharpe = validation.outcome.aggregate.mean_sharpe,
            "validation complete"
        );
        Ok(validation)
    }

    /// Verify, generate, and validate in one pass.
    pub async fn run(&self, id: StrategyId, force: bool) -> Result<ValidationRecord> {
        let report = self.verify(id)?;
        if !report.passed() {
            return Err(Error::InvalidDocument(format!(
                "verification blocked {id}: {}",
                report.failures().join("; ")
            )));
        }
        self.generate(id)?;
        self.validate(id, force).await
    }

    // ==================== Analyze ====================

    /// Dispatch the persona panel over the latest validation and harvest
    /// learnings, proposals, and ideas from the synthesis.
    pub async fn analyze(
        &self,
        client: Arc<dyn SubAgentClient>,
        id: StrategyId,
    ) -> Result<(Synthesis, HarvestSummary)> {
        let record = self.store.get_strategy(id)?;
        let validation = self
            .store
            .list_validations(id)?
            .into_iter()
            .last()
            .ok_or_else(|| Error::storage(format!("{id} has no validation record")))?;

        let context = AnalysisContext {
            strategy_name: record.name.clone(),
            definition: record.definition.clone(),
            aggregate: validation.outcome.aggregate.clone(),
            verdict: validation.outcome.verdict.label().to_string(),
        };
        let orchestrator = PersonaOrchestrator::new(client, self.config.personas.clone());
        let synthesis = orchestrator.analyze(&context).await?;
        let harvest = orchestrator.harvest(
            &self.store,
            id,
            validation.id,
            &record.tags,
            &synthesis,
        )?;
        Ok((synthesis, harvest))
    }
}
