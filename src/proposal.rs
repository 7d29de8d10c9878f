//! Proposal queue and idea approval.
//!
//! Proposals wait in a FIFO per type; human review is the only way out of
//! `pending`. Approval creates the implied record. Ideas become pending
//! strategies on approval, with a lineage cycle check at the boundary, and
//! are otherwise pruned by TTL.

use chrono::{Duration, Utc};
use tracing::info;

use crate::error::{Error, Result};
use crate::ingest::{Ingestor, StrategyDraft};
use crate::record::store::RecordStore;
use crate::record::types::{
    IdeaId, IdeaRecord, ProposalId, ProposalKind, ProposalRecord, ProposalStatus, StrategyId,
};

/// What approving a proposal created.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalEffect {
    /// Strategy-shaped proposals become idea drafts awaiting a full
    /// definition
    IdeaCreated(IdeaId),
    /// Data proposals surface the dataset to acquire
    DataRequested(String),
}

/// Human-review operations over the proposal queue.
pub struct ProposalQueue<'a> {
    store: &'a RecordStore,
}

impl<'a> ProposalQueue<'a> {
    pub fn new(store: &'a RecordStore) -> Self {
        Self { store }
    }

    /// Pending proposals in FIFO order, optionally filtered by type.
    pub fn pending(&self, type_name: Option<&str>) -> Result<Vec<ProposalRecord>> {
        let mut proposals: Vec<ProposalRecord> = self
            .store
            .list_proposals()?
            .into_iter()
            .filter(|p| p.status == ProposalStatus::Pending)
            .filter(|p| type_name.map_or(true, |t| p.kind.type_name() == t))
            .collect();
        proposals.sort_by_key(|p| p.id);
        Ok(proposals)
    }

    fn transition(
        &self,
        id: ProposalId,
        to: ProposalStatus,
        note: Option<String>,
    ) -> Result<ProposalRecord> {
        let mut proposal = self.store.get_proposal(id)?;
        if proposal.status != ProposalStatus::Pending {
            return Err(Error::state_conflict(
                id.to_string(),
                ProposalStatus::Pending,
                proposal.status,
            ));
        }
        proposal.status = to;
        proposal.reviewed_at = Some(Utc::now());
        proposal.review_note = note;
        self.store.save_proposal(&proposal)?;
        Ok(proposal)
    }

    /// Approve a pending proposal and create the implied record.
    pub fn approve(&self, id: ProposalId, note: Option<String>) -> Result<ApprovalEffect> {
        let proposal = self.transition(id, ProposalStatus::Approved, note)?;

        let effect = match &proposal.kind {
            ProposalKind::DataAcquisition { dataset, .. } => {
                ApprovalEffect::DataRequested(dataset.clone())
            }
            ProposalKind::CompositeStrategy { parents, sketch } => {
                let idea = self.idea_from_proposal(&proposal, parents.clone(), sketch)?;
                ApprovalEffect::IdeaCreated(idea)
            }
            ProposalKind::EnhancementVariant { parent, change } => {
                let idea = self.idea_from_proposal(&proposal, vec![*parent], change)?;
                ApprovalEffect::IdeaCreated(idea)
            }
            ProposalKind::RefinedHypothesis { parent, hypothesis } => {
                let idea = self.idea_from_proposal(&proposal, vec![*parent], hypothesis)?;
                ApprovalEffect::IdeaCreated(idea)
            }
        };
        info!(proposal = %proposal.id, "proposal approved");
        Ok(effect)
    }

    fn idea_from_proposal(
        &self,
        proposal: &ProposalRecord,
        parents: Vec<StrategyId>,
        sketch: &str,
    ) -> Result<IdeaId> {
        for parent in &parents {
            // Lineage invariant: parents must exist
            self.store.get_strategy(*parent)?;
        }
        let idea = IdeaRecord {
            id: self.store.next_idea_id()?,
            created_at: Utc::now(),
            title: sketch.chars().take(60).collect(),
            sketch: sketch.to_string(),
            parents,
            persona: format!("proposal:{}", proposal.id),
        };
        self.store.create_idea(&idea)?;
        Ok(idea.id)
    }

    /// Reject with a recorded reason.
    pub fn reject(&self, id: ProposalId, reason: String) -> Result<()> {
        self.transition(id, ProposalStatus::Rejected, Some(reason))?;
        Ok(())
    }

    /// Defer, keeping the proposal in the queue until the TTL purge.
    pub fn defer(&self, id: ProposalId, note: Option<String>) -> Result<()> {
        self.transition(id, ProposalStatus::Deferred, note)?;
        Ok(())
    }

    /// Remove deferred proposals older than the TTL. Approved and rejected
    /// proposals are permanent.
    pub fn purge_expired(&self, ttl_days: i64) -> Result<Vec<ProposalId>> {
        let cutoff = Utc::now() - Duration::days(ttl_days);
        let mut purged = Vec::new();
        for proposal in self.store.list_proposals()? {
            if proposal.status == ProposalStatus::Deferred {
                let deferred_at = proposal.reviewed_at.unwrap_or(proposal.created_at);
                if deferred_at < cutoff {
                    self.store.delete_proposal(proposal.id)?;
                    purged.push(proposal.id);
                }
            }
        }
        Ok(purged)
    }
}

/// Whether attaching `parents` to `child` would put a cycle in the
/// lineage graph. A back edge exists when `child` is already an ancestor
/// of any proposed parent.
pub fn lineage_would_cycle(
    store: &RecordStore,
    child: StrategyId,
    parents: &[StrategyId],
) -> Result<bool> {
    for parent in parents {
        if *parent == child {
            return Ok(true);
        }
        let ancestors = store.resolve_lineage(*parent)?;
        if ancestors.iter().any(|a| a.id == child) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Approve an idea: the reviewer supplies the fleshed-out draft, and the
/// idea's lineage carries over to the new pending strategy. The idea is
/// destroyed on success.
pub fn approve_idea(
    store: &RecordStore,
    ingestor: &Ingestor<'_>,
    idea_id: IdeaId,
    draft: &StrategyDraft,
) -> Result<StrategyId> {
    let idea = store.get_idea(idea_id)?;
    for parent in &idea.parents {
        store.get_strategy(*parent)?;
    }

    let outcome = ingestor.ingest_draft(draft)?;
    let strategy_id = outcome.strategy_id.ok_or_else(|| {
        Error::InvalidDocument(format!(
            "idea draft was not accepted: {}",
            outcome.assessment.reason
        ))
    })?;

    if lineage_would_cycle(store, strategy_id, &idea.parents)? {
        return Err(Error::InvalidDocument(format!(
            "approving {idea_id} would put a cycle in the lineage graph"
        )));
    }

    let mut record = store.get_strategy(strategy_id)?;
    for parent in &idea.parents {
        if !record.lineage.parents.contains(parent) {
            record.lineage.parents.push(*parent);
        }
    }
    store.save_strategy(&record)?;
    store.delete_idea(idea_id)?;
    info!(idea = %idea_id, strategy = %strategy_id, "idea promoted to pending strategy");
    Ok(strategy_id)
}

/// Prune ideas older than the TTL.
pub fn prune_ideas(store: &RecordStore, ttl_days: i64) -> Result<Vec<IdeaId>> {
    let cutoff = Utc::now() - Duration::days(ttl_days);
    let mut pruned = Vec::new();
    for idea in store.list_ideas()? {
        if idea.created_at < cutoff {
            store.delete_idea(idea.id)?;
            pruned.push(idea.id);
        }
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::ingest::draft::tests::momentum_draft;
    use crate::similarity::SimilarityIndex;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn proposal(store: &RecordStore, kind: ProposalKind) -> ProposalRecord {
        let record = ProposalRecord {
            id: store.next_proposal_id().unwrap(),
            created_at: Utc::now(),
            status: ProposalStatus::Pending,
            kind,
            rationale: "panel recommendation".to_string(),
            source_strategy: None,
            reviewed_at: None,
            review_note: None,
        };
        store.create_proposal(&record).unwrap();
        record
    }

    #[test]
    fn test_fifo_per_type() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let queue = ProposalQueue::new(&store);

        let a = proposal(
            &store,
            ProposalKind::DataAcquisition {
                dataset: "short-interest".to_string(),
                justification: "three blocked strategies".to_string(),
            },
        );
        let _b = proposal(
            &store,
            ProposalKind::RefinedHypothesis {
                parent: StrategyId(1),
                hypothesis: "restrict to high-vol regimes".to_string(),
            },
        );
        let c = proposal(
            &store,
            ProposalKind::DataAcquisition {
                dataset: "index-membership".to_string(),
                justification: "survivorship checks".to_string(),
            },
        );

        let data = queue.pending(Some("data_acquisition")).unwrap();
        assert_eq!(
            data.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![a.id, c.id]
        );
        assert_eq!(queue.pending(None).unwrap().len(), 3);
    }

    #[test]
    fn test_approve_data_acquisition() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let queue = ProposalQueue::new(&store);
        let p = proposal(
            &store,
            ProposalKind::DataAcquisition {
                dataset: "short-interest".to_string(),
                justification: "needed".to_string(),
            },
        );

        let effect = queue.approve(p.id, Some("makes sense".to_string())).unwrap();
        assert_eq!(
            effect,
            ApprovalEffect::DataRequested("short-interest".to_string())
        );
        let reviewed = store.get_proposal(p.id).unwrap();
        assert_eq!(reviewed.status, ProposalStatus::Approved);
        assert!(reviewed.reviewed_at.is_some());

        // Only pending proposals can be reviewed again
        assert!(queue.reject(p.id, "changed my mind".to_string()).is_err());
    }

    #[test]
    fn test_purge_expired_deferred_only() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let queue = ProposalQueue::new(&store);

        let deferred = proposal(
            &store,
            ProposalKind::DataAcquisition {
                dataset: "old-request".to_string(),
                justification: "stale".to_string(),
            },
        );
        queue.defer(deferred.id, None).unwrap();
        // Backdate the review stamp past the TTL
        let mut record = store.get_proposal(deferred.id).unwrap();
        record.reviewed_at = Some(Utc::now() - Duration::days(40));
        store.save_proposal(&record).unwrap();

        let kept = proposal(
            &store,
            ProposalKind::DataAcquisition {
                dataset: "fresh-request".to_string(),
                justification: "new".to_string(),
            },
        );

        let purged = queue.purge_expired(30).unwrap();
        assert_eq!(purged, vec![deferred.id]);
        assert!(store.get_proposal(deferred.id).is_err());
        assert!(store.get_proposal(kept.id).is_ok());
    }

    #[test]
    fn test_idea_approval_creates_pending_strategy() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let similarity = SimilarityIndex::new();
        let config = PipelineConfig::default();
        let ingestor = Ingestor::new(&store, &similarity, &config);

        let parent = ingestor
            .ingest_draft(&momentum_draft())
            .unwrap()
            .strategy_id
            .unwrap();

        let idea = IdeaRecord {
            id: store.next_idea_id().unwrap(),
            created_at: Utc::now(),
            title: "vol-gated momentum".to_string(),
            sketch: "only rotate when implied volatility is below 25".to_string(),
            parents: vec![parent],
            persona: "mad-genius".to_string(),
        };
        store.create_idea(&idea).unwrap();

        let mut draft = momentum_draft();
        draft.raw_text = "Momentum rotation gated by the volatility regime.".to_string();
        draft.name = "vol-gated momentum".to_string();
        draft
            .definition
            .entry
            .push("std(close, vol_window) < vol_cap".to_string());
        draft
            .definition
            .parameters
            .insert("vol_window".to_string(), 20.0);
        draft
            .definition
            .parameters
            .insert("vol_cap".to_string(), 25.0);

        let strategy_id = approve_idea(&store, &ingestor, idea.id, &draft).unwrap();
        let record = store.get_strategy(strategy_id).unwrap();
        assert!(record.lineage.parents.contains(&parent));
        assert!(store.get_idea(idea.id).is_err());
    }

    #[test]
    fn test_cycle_detection() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let similarity = SimilarityIndex::new();
        let config = PipelineConfig::default();
        let ingestor = Ingestor::new(&store, &similarity, &config);

        let a = ingestor
            .ingest_draft(&momentum_draft())
            .unwrap()
            .strategy_id
            .unwrap();

        // Self-parentage is the smallest back edge
        assert!(lineage_would_cycle(&store, a, &[a]).unwrap());
        assert!(!lineage_would_cycle(&store, StrategyId(99), &[a]).unwrap());
    }
}
