//! Ingestion pipeline: draft in, routed record out.
//!
//! Idempotent by source-content hash, duplicate-guarded by the similarity
//! index. Rejected and archived drafts still produce records in their
//! terminal partitions so the audit trail survives; queued drafts wait in
//! the workspace queue until a human accepts them.

pub mod draft;
pub mod quality;
pub mod rationale;

pub use draft::{ClaimedPerformance, SourceMeta, StrategyDraft};
pub use quality::{HardFlag, QualityAssessment, SoftFlag, TrustBreakdown};
pub use rationale::{factor_catalog, FactorEntry, InferredRationale};

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::llm::SubAgentClient;
use crate::record::state::StrategyState;
use crate::record::store::RecordStore;
use crate::record::types::{
    Confidence, EdgeProvenance, IngestDecision, Lineage, RationaleSource, SourceProvenance,
    StrategyId, StrategyRecord,
};
use crate::similarity::{MatchKind, SimilarityIndex};

/// What happened to one draft.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub decision: IngestDecision,
    /// Created record, when one was created
    pub strategy_id: Option<StrategyId>,
    pub assessment: QualityAssessment,
    pub match_kind: MatchKind,
    /// Set when the same source content was ingested before
    pub already_ingested_as: Option<StrategyId>,
}

impl IngestOutcome {
    pub fn is_noop(&self) -> bool {
        self.already_ingested_as.is_some()
    }
}

/// The ingestion front door.
pub struct Ingestor<'a> {
    store: &'a RecordStore,
    similarity: &'a SimilarityIndex,
    config: &'a PipelineConfig,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        store: &'a RecordStore,
        similarity: &'a SimilarityIndex,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            store,
            similarity,
            config,
        }
    }

    /// Resolve rationale provenance for a draft without a sub-agent.
    fn provenance(&self, draft: &StrategyDraft) -> (EdgeProvenance, Option<crate::record::types::EdgeBlock>) {
        match &draft.stated_edge {
            Some(edge) => {
                // Factor alignment is still computed for novelty scoring.
                let alignment = rationale::infer(&draft.name, &draft.definition)
                    .provenance
                    .factor_alignment;
                (
                    EdgeProvenance {
                        source: RationaleSource::SourceStated,
                        confidence: Confidence::High,
                        factor_alignment: alignment,
                        research_notes: None,
                    },
                    Some(edge.clone()),
                )
            }
            None => {
                let inferred = rationale::infer(&draft.name, &draft.definition);
                (inferred.provenance, inferred.edge)
            }
        }
    }

    /// Ingest one draft with deterministic rationale inference.
    pub fn ingest_draft(&self, draft: &StrategyDraft) -> Result<IngestOutcome> {
        let (provenance, edge) = self.provenance(draft);
        self.ingest_with_provenance(draft, provenance, edge)
    }

    /// Ingest one draft, asking a sub-agent to classify the edge when the
    /// source never states one.
    pub async fn ingest_draft_with_agent(
        &self,
        client: &dyn SubAgentClient,
        draft: &StrategyDraft,
    ) -> Result<IngestOutcome> {
        let (provenance, edge) = match &draft.stated_edge {
            Some(_) => self.provenance(draft),
            None => {
                let inferred =
                    rationale::infer_with_agent(client, &draft.name, &draft.definition).await?;
                (inferred.provenance, inferred.edge)
            }
        };
        self.ingest_with_provenance(draft, provenance, edge)
    }

    fn ingest_with_provenance(
        &self,
        draft: &StrategyDraft,
        provenance: EdgeProvenance,
        edge: Option<crate::record::types::EdgeBlock>,
    ) -> Result<IngestOutcome> {
        let source_hash = draft.source_hash()?;

        // Idempotence: re-ingesting the same source is a no-op.
        if let Some(existing) = self.store.index().strategy_by_source_hash(&source_hash)? {
            info!(source = %draft.source.source_ref, existing = %existing, "source already ingested");
            let assessment = quality::assess(&self.config.ingest, draft, &provenance);
            return Ok(IngestOutcome {
                decision: assessment.decision,
                strategy_id: None,
                assessment,
                match_kind: MatchKind::New,
                already_ingested_as: Some(existing),
            });
        }

        let assessment = quality::assess(&self.config.ingest, draft, &provenance);
        let match_kind = self.similarity.classify(&draft.definition)?;

        // Duplicates block ingestion before any record is written.
        if let MatchKind::Duplicate { matched, score } = match_kind {
            return Err(Error::DuplicateStrategy {
                existing_id: matched.to_string(),
                score,
            });
        }

        let outcome = match assessment.decision {
            IngestDecision::Accept => {
                let id = self.create_record(
                    draft,
                    &provenance,
                    edge,
                    &assessment,
                    &source_hash,
                    &match_kind,
                )?;
                self.similarity.insert(id, &draft.definition)?;
                IngestOutcome {
                    decision: IngestDecision::Accept,
                    strategy_id: Some(id),
                    assessment,
                    match_kind,
                    already_ingested_as: None,
                }
            }
            IngestDecision::Queue => {
                self.write_queue_entry(draft, &source_hash)?;
                IngestOutcome {
                    decision: IngestDecision::Queue,
                    strategy_id: None,
                    assessment,
                    match_kind,
                    already_ingested_as: None,
                }
            }
            terminal @ (IngestDecision::Archive | IngestDecision::Reject) => {
                let target = if terminal == IngestDecision::Archive {
                    StrategyState::Archived
                } else {
                    StrategyState::Rejected
                };
                let id = self.create_record(
                    draft,
                    &provenance,
                    edge,
                    &assessment,
                    &source_hash,
                    &match_kind,
                )?;
                self.store
                    .update_state(id, StrategyState::Pending, target, assessment.reason.as_str())?;
                IngestOutcome {
                    decision: terminal,
                    strategy_id: Some(id),
                    assessment,
                    match_kind,
                    already_ingested_as: None,
                }
            }
        };

        info!(
            source = %draft.source.source_ref,
            decision = %outcome.decision,
            id = ?outcome.strategy_id,
            "draft ingested"
        );
        Ok(outcome)
    }

    fn create_record(
        &self,
        draft: &StrategyDraft,
        provenance: &EdgeProvenance,
        edge: Option<crate::record::types::EdgeBlock>,
        assessment: &QualityAssessment,
        source_hash: &str,
        match_kind: &MatchKind,
    ) -> Result<StrategyId> {
        let id = self.store.next_strategy_id()?;
        let definition_hash = draft.definition.definition_hash()?;

        let (lineage, mut tags) = match match_kind {
            MatchKind::Variant { matched, .. } => (
                Lineage {
                    parents: vec![*matched],
                    variant_of: Some(*matched),
                },
                vec!["variant".to_string()],
            ),
            _ => (Lineage::default(), Vec::new()),
        };
        tags.extend(provenance.factor_alignment.iter().cloned());
        tags.dedup();

        let record = StrategyRecord {
            id,
            name: draft.name.clone(),
            created_at: Utc::now(),
            state: StrategyState::Pending,
            lineage,
            tags,
            provenance: SourceProvenance {
                source_ref: draft.source.source_ref.clone(),
                excerpt: draft.excerpt.clone(),
                content_hash: source_hash.to_string(),
                author: draft.source.author.clone(),
                author_credibility: draft.source.author_credibility,
            },
            definition: draft.definition.clone(),
            edge,
            edge_provenance: provenance.clone(),
            quality: assessment.to_record_quality(),
            definition_hash,
            transitions: Vec::new(),
            error_cause: None,
        };
        self.store.create_strategy(&record)?;
        Ok(id)
    }

    fn queue_path(&self, source_hash: &str) -> PathBuf {
        self.store.queue_dir().join(format!("{source_hash}.yaml"))
    }

    fn write_queue_entry(&self, draft: &StrategyDraft, source_hash: &str) -> Result<()> {
        let path = self.queue_path(source_hash);
        std::fs::write(&path, serde_yaml::to_string(draft)?)?;
        info!(path = %path.display(), "draft queued for review");
        Ok(())
    }

    /// Accept a queued draft: creates the pending record and removes the
    /// queue entry.
    pub fn approve_queued(&self, source_hash: &str) -> Result<IngestOutcome> {
        let path = self.queue_path(source_hash);
        if !path.exists() {
            return Err(Error::storage(format!(
                "no queued draft with hash {source_hash}"
            )));
        }
        let draft = StrategyDraft::from_yaml_file(&path)?;
        let (provenance, edge) = self.provenance(&draft);
        let assessment = quality::assess(&self.config.ingest, &draft, &provenance);
        let match_kind = self.similarity.classify(&draft.definition)?;

        let id = self.create_record(
            &draft,
            &provenance,
            edge,
            &assessment,
            source_hash,
            &match_kind,
        )?;
        self.similarity.insert(id, &draft.definition)?;
        std::fs::remove_file(&path)?;

        Ok(IngestOutcome {
            decision: IngestDecision::Accept,
            strategy_id: Some(id),
            assessment,
            match_kind,
            already_ingested_as: None,
        })
    }

    /// Ingest a draft file, or every `*.yaml` draft in a directory.
    pub fn ingest_path(&self, path: impl AsRef<Path>) -> Result<Vec<(PathBuf, IngestOutcome)>> {
        let path = path.as_ref();
        let files: Vec<PathBuf> = if path.is_dir() {
            let pattern = path.join("*.yaml");
            let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
                .map_err(|e| Error::storage(e.to_string()))?
                .filter_map(|entry| entry.ok())
                .collect();
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut outcomes = Vec::new();
        for file in files {
            let draft = match StrategyDraft::from_yaml_file(&file) {
                Ok(draft) => draft,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "skipping unreadable draft");
                    continue;
                }
            };
            match self.ingest_draft(&draft) {
                Ok(outcome) => outcomes.push((file, outcome)),
                Err(e @ Error::DuplicateStrategy { .. }) => {
                    warn!(file = %file.display(), "{e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::draft::tests::momentum_draft;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: RecordStore,
        similarity: SimilarityIndex,
        config: PipelineConfig,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        Fixture {
            _dir: dir,
            store,
            similarity: SimilarityIndex::new(),
            config: PipelineConfig::default(),
        }
    }

    #[test]
    fn test_accept_creates_pending_record() {
        let f = fixture();
        let ingestor = Ingestor::new(&f.store, &f.similarity, &f.config);
        let outcome = ingestor.ingest_draft(&momentum_draft()).unwrap();

        assert_eq!(outcome.decision, IngestDecision::Accept);
        let id = outcome.strategy_id.unwrap();
        let record = f.store.get_strategy(id).unwrap();
        assert_eq!(record.state, StrategyState::Pending);
        assert_eq!(record.quality.specificity, 8);
        assert!(record.edge.is_some());
    }

    #[test]
    fn test_ingestion_is_idempotent() {
        let f = fixture();
        let ingestor = Ingestor::new(&f.store, &f.similarity, &f.config);
        let first = ingestor.ingest_draft(&momentum_draft()).unwrap();
        let second = ingestor.ingest_draft(&momentum_draft()).unwrap();

        assert!(first.strategy_id.is_some());
        assert!(second.is_noop());
        assert_eq!(second.already_ingested_as, first.strategy_id);
        // Exactly one record exists
        assert_eq!(
            f.store
                .query(&crate::record::index::StrategyFilter::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_duplicate_definition_blocks_ingestion() {
        let f = fixture();
        let ingestor = Ingestor::new(&f.store, &f.similarity, &f.config);
        ingestor.ingest_draft(&momentum_draft()).unwrap();

        // Different source text, structurally identical definition
        let mut copycat = momentum_draft();
        copycat.raw_text = "I rediscovered momentum on my own.".to_string();
        copycat.source.source_ref = "inbox/copycat.md".to_string();

        let err = ingestor.ingest_draft(&copycat).unwrap_err();
        assert!(matches!(err, Error::DuplicateStrategy { .. }));
    }

    #[test]
    fn test_variant_attaches_lineage() {
        let f = fixture();
        let ingestor = Ingestor::new(&f.store, &f.similarity, &f.config);
        let parent = ingestor
            .ingest_draft(&momentum_draft())
            .unwrap()
            .strategy_id
            .unwrap();

        let mut variant = momentum_draft();
        variant.raw_text = "Monthly momentum with a shorter lookback.".to_string();
        variant
            .definition
            .parameters
            .insert("lookback".to_string(), 126.0);

        let outcome = ingestor.ingest_draft(&variant).unwrap();
        let id = outcome.strategy_id.unwrap();
        let record = f.store.get_strategy(id).unwrap();
        assert_eq!(record.lineage.variant_of, Some(parent));
        assert!(record.tags.contains(&"variant".to_string()));
    }

    #[test]
    fn test_reject_lands_in_rejected_partition() {
        let f = fixture();
        let ingestor = Ingestor::new(&f.store, &f.similarity, &f.config);

        let mut scam = momentum_draft();
        scam.raw_text = "Never had a losing month. Join my course today!".to_string();
        scam.claimed.sharpe = Some(4.2);

        let outcome = ingestor.ingest_draft(&scam).unwrap();
        assert_eq!(outcome.decision, IngestDecision::Reject);
        let record = f.store.get_strategy(outcome.strategy_id.unwrap()).unwrap();
        assert_eq!(record.state, StrategyState::Rejected);
        assert_eq!(record.quality.hard_flags.len(), 3);
    }

    #[test]
    fn test_queue_then_approve() {
        let f = fixture();
        let ingestor = Ingestor::new(&f.store, &f.similarity, &f.config);

        // Push trust into the review band: partial edge, thin evidence.
        // economic 22 + oos 12 + realism 7 + credibility 4 + novelty 2 = 47
        let mut draft = momentum_draft();
        draft.claimed.out_of_sample = false;
        draft.claimed.transaction_costs_discussed = false;
        draft.claimed.drawdown_discussed = false;
        draft.source.author_credibility = 4;
        if let Some(edge) = draft.stated_edge.as_mut() {
            edge.why_persists = None;
            edge.counterparty = None;
        }

        let outcome = ingestor.ingest_draft(&draft).unwrap();
        assert_eq!(outcome.decision, IngestDecision::Queue);
        assert!(outcome.strategy_id.is_none());

        let source_hash = draft.source_hash().unwrap();
        let approved = ingestor.approve_queued(&source_hash).unwrap();
        let record = f.store.get_strategy(approved.strategy_id.unwrap()).unwrap();
        assert_eq!(record.state, StrategyState::Pending);
        assert!(ingestor.approve_queued(&source_hash).is_err());
    }
}
