//! File-addressed record store.
//!
//! The workspace directory is the source of truth: one YAML file per
//! record, partitioned by state for strategies, write-once directories for
//! validations. All writes go through this store; state transitions use
//! compare-and-swap on the current state so concurrent workers cannot
//! clobber each other.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::counters::IdAllocator;
use crate::record::index::{RecordIndex, StrategyFilter};
use crate::record::state::StrategyState;
use crate::record::types::{
    IdeaId, IdeaRecord, LearningRecord, ProposalId, ProposalRecord, StrategyId, StrategyRecord,
    ValidationKey, ValidationRecord, WindowOutcome,
};
use crate::stats::ValidationOutcome;

/// Workspace subdirectories.
pub mod layout {
    pub const STRATEGIES: &str = "strategies";
    pub const VALIDATIONS: &str = "validations";
    pub const LEARNINGS: &str = "learnings";
    pub const IDEAS: &str = "ideas";
    pub const PROPOSALS: &str = "proposals";
    pub const QUEUE: &str = "queue";
    pub const STATE: &str = "state";
    pub const LOGS: &str = "logs";
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Identity portion of a validation record, stored as `metadata.yaml`.
#[derive(Debug, Serialize, Deserialize)]
struct ValidationMetadata {
    id: crate::record::types::ValidationId,
    strategy_id: StrategyId,
    definition_hash: String,
    code_hash: String,
    generator_version: String,
    started_at: chrono::DateTime<Utc>,
    completed_at: chrono::DateTime<Utc>,
}

/// The record store. Owns all persistence in a workspace.
pub struct RecordStore {
    root: PathBuf,
    index: RecordIndex,
    allocator: IdAllocator,
    /// Serializes read-modify-write cycles on record files
    write_lock: Mutex<()>,
}

impl RecordStore {
    /// Open a workspace, scaffolding directories and rebuilding the index.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [
            layout::VALIDATIONS,
            layout::LEARNINGS,
            layout::IDEAS,
            layout::PROPOSALS,
            layout::QUEUE,
            layout::STATE,
            layout::LOGS,
        ] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        for state in StrategyState::all() {
            std::fs::create_dir_all(root.join(layout::STRATEGIES).join(state.dir_name()))?;
        }

        let allocator = IdAllocator::open(root.join(layout::STATE).join("counters.journal"))?;
        let index = RecordIndex::open(root.join(layout::STATE).join("index.sqlite"))?;

        let store = Self {
            root,
            index,
            allocator,
            write_lock: Mutex::new(()),
        };
        store.rebuild_index()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &RecordIndex {
        &self.index
    }

    /// Path of the queue directory for pre-record drafts.
    pub fn queue_dir(&self) -> PathBuf {
        self.root.join(layout::QUEUE)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|e| Error::Internal(format!("store lock poisoned: {e}")))
    }

    fn strategy_path(&self, id: StrategyId, state: StrategyState) -> PathBuf {
        self.root
            .join(layout::STRATEGIES)
            .join(state.dir_name())
            .join(format!("{id}.yaml"))
    }

    fn rebuild_index(&self) -> Result<()> {
        self.index.clear()?;
        let pattern = self
            .root
            .join(layout::STRATEGIES)
            .join("*")
            .join("STRAT-*.yaml");
        for entry in glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::storage(e.to_string()))?
        {
            let path = entry.map_err(|e| Error::storage(e.to_string()))?;
            match self.read_strategy_file(&path) {
                Ok(record) => self.index.upsert_strategy(&record)?,
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }

        let pattern = self
            .root
            .join(layout::VALIDATIONS)
            .join("*")
            .join("*")
            .join("metadata.yaml");
        for entry in glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::storage(e.to_string()))?
        {
            let path = entry.map_err(|e| Error::storage(e.to_string()))?;
            let dir = path
                .parent()
                .ok_or_else(|| Error::storage("validation metadata without parent".to_string()))?;
            match self.read_validation_dir(dir) {
                Ok(record) => self.index.insert_validation(&record)?,
                Err(e) => warn!(path = %dir.display(), error = %e, "skipping unreadable validation"),
            }
        }
        Ok(())
    }

    fn read_strategy_file(&self, path: &Path) -> Result<StrategyRecord> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    // ==================== Strategies ====================

    /// Allocate the next strategy id.
    pub fn next_strategy_id(&self) -> Result<StrategyId> {
        self.allocator.next_strategy()
    }

    pub fn next_idea_id(&self) -> Result<IdeaId> {
        self.allocator.next_idea()
    }

    pub fn next_proposal_id(&self) -> Result<ProposalId> {
        self.allocator.next_proposal()
    }

    /// Persist a newly created strategy record.
    pub fn create_strategy(&self, record: &StrategyRecord) -> Result<()> {
        let _guard = self.lock()?;
        let path = self.strategy_path(record.id, record.state);
        if path.exists() {
            return Err(Error::storage(format!("{} already exists", record.id)));
        }
        write_atomic(&path, serde_yaml::to_string(record)?.as_bytes())?;
        self.index.upsert_strategy(record)?;
        info!(id = %record.id, state = %record.state, "strategy record created");
        Ok(())
    }

    /// Load a strategy record by id.
    pub fn get_strategy(&self, id: StrategyId) -> Result<StrategyRecord> {
        if let Some(state) = self.index.strategy_state(id)? {
            let path = self.strategy_path(id, state);
            if path.exists() {
                return self.read_strategy_file(&path);
            }
        }
        // Index may lag the filesystem; fall back to a partition scan.
        for state in StrategyState::all() {
            let path = self.strategy_path(id, state);
            if path.exists() {
                return self.read_strategy_file(&path);
            }
        }
        Err(Error::storage(format!("{id} not found")))
    }

    /// Transition a record, failing if its current state is not `from`.
    ///
    /// The file moves between state partitions as part of the same write.
    pub fn update_state(
        &self,
        id: StrategyId,
        from: StrategyState,
        to: StrategyState,
        cause: impl Into<String>,
    ) -> Result<StrategyRecord> {
        let _guard = self.lock()?;
        let mut record = self.get_strategy(id)?;
        if record.state != from {
            return Err(Error::state_conflict(id.to_string(), from, record.state));
        }
        let old_path = self.strategy_path(id, record.state);
        record.apply_transition(to, cause)?;

        let new_path = self.strategy_path(id, record.state);
        write_atomic(&new_path, serde_yaml::to_string(&record)?.as_bytes())?;
        if old_path != new_path {
            std::fs::remove_file(&old_path)?;
        }
        self.index.upsert_strategy(&record)?;
        debug!(id = %id, from = %from, to = %to, "state transition");
        Ok(record)
    }

    /// Rewrite a record in place without changing state.
    ///
    /// Used by stages that enrich a record (rationale, quality annotations)
    /// before or between transitions.
    pub fn save_strategy(&self, record: &StrategyRecord) -> Result<()> {
        let _guard = self.lock()?;
        let current = self.get_strategy(record.id)?;
        if current.state != record.state {
            return Err(Error::state_conflict(
                record.id.to_string(),
                record.state,
                current.state,
            ));
        }
        let path = self.strategy_path(record.id, record.state);
        write_atomic(&path, serde_yaml::to_string(record)?.as_bytes())?;
        self.index.upsert_strategy(record)?;
        Ok(())
    }

    /// Query strategy ids through the index.
    pub fn query(&self, filter: &StrategyFilter) -> Result<Vec<StrategyId>> {
        self.index.query(filter)
    }

    /// Transitive ancestors of a record, nearest first. Cycle-safe.
    pub fn resolve_lineage(&self, id: StrategyId) -> Result<Vec<StrategyRecord>> {
        let mut seen: HashSet<StrategyId> = HashSet::from([id]);
        let mut frontier = vec![id];
        let mut ancestors = Vec::new();

        while let Some(current) = frontier.pop() {
            let record = self.get_strategy(current)?;
            for parent in &record.lineage.parents {
                if seen.insert(*parent) {
                    ancestors.push(self.get_strategy(*parent)?);
                    frontier.push(*parent);
                }
            }
        }
        Ok(ancestors)
    }

    /// Definition hashes of a record and its whole lineage.
    pub fn lineage_definition_hashes(&self, id: StrategyId) -> Result<Vec<String>> {
        let mut hashes = vec![self.get_strategy(id)?.definition_hash];
        for ancestor in self.resolve_lineage(id)? {
            hashes.push(ancestor.definition_hash);
        }
        hashes.dedup();
        Ok(hashes)
    }

    // ==================== Validations ====================

    fn validation_dir(&self, strategy_id: StrategyId, record: &ValidationRecord) -> PathBuf {
        let stamp = record
            .started_at
            .format("%Y-%m-%dT%H-%M-%S%.3fZ")
            .to_string();
        self.root
            .join(layout::VALIDATIONS)
            .join(strategy_id.to_string())
            .join(stamp)
    }

    /// Append an immutable validation record.
    ///
    /// Refused when a validation with the same `(definition_hash,
    /// code_hash, generator_version)` already exists, unless `force` is
    /// set. Forcing still appends a new record; nothing is overwritten.
    pub fn append_validation(
        &self,
        record: &ValidationRecord,
        code_file_name: &str,
        code: &str,
        force: bool,
    ) -> Result<PathBuf> {
        let _guard = self.lock()?;
        if !force && self.index.validation_key_exists(&record.key())? {
            return Err(Error::ValidationExists {
                definition_hash: record.definition_hash.clone(),
            });
        }

        let dir = self.validation_dir(record.strategy_id, record);
        if dir.exists() {
            return Err(Error::storage(format!(
                "validation directory {} already exists",
                dir.display()
            )));
        }
        std::fs::create_dir_all(&dir)?;

        let metadata = ValidationMetadata {
            id: record.id,
            strategy_id: record.strategy_id,
            definition_hash: record.definition_hash.clone(),
            code_hash: record.code_hash.clone(),
            generator_version: record.generator_version.clone(),
            started_at: record.started_at,
            completed_at: record.completed_at,
        };
        write_atomic(
            &dir.join("metadata.yaml"),
            serde_yaml::to_string(&metadata)?.as_bytes(),
        )?;
        write_atomic(
            &dir.join("windows.yaml"),
            serde_yaml::to_string(&record.windows)?.as_bytes(),
        )?;
        write_atomic(
            &dir.join("aggregate.yaml"),
            serde_yaml::to_string(&record.outcome)?.as_bytes(),
        )?;
        std::fs::write(dir.join(code_file_name), code)?;

        self.index.insert_validation(record)?;
        info!(
            strategy = %record.strategy_id,
            verdict = record.outcome.verdict.label(),
            "validation record written"
        );
        Ok(dir)
    }

    fn read_validation_dir(&self, dir: &Path) -> Result<ValidationRecord> {
        let metadata: ValidationMetadata =
            serde_yaml::from_str(&std::fs::read_to_string(dir.join("metadata.yaml"))?)?;
        let windows: Vec<WindowOutcome> =
            serde_yaml::from_str(&std::fs::read_to_string(dir.join("windows.yaml"))?)?;
        let outcome: ValidationOutcome =
            serde_yaml::from_str(&std::fs::read_to_string(dir.join("aggregate.yaml"))?)?;
        Ok(ValidationRecord {
            id: metadata.id,
            strategy_id: metadata.strategy_id,
            definition_hash: metadata.definition_hash,
            code_hash: metadata.code_hash,
            generator_version: metadata.generator_version,
            started_at: metadata.started_at,
            completed_at: metadata.completed_at,
            windows,
            outcome,
        })
    }

    /// All validation records for one strategy, oldest first.
    pub fn list_validations(&self, strategy_id: StrategyId) -> Result<Vec<ValidationRecord>> {
        let base = self.root.join(layout::VALIDATIONS).join(strategy_id.to_string());
        if !base.exists() {
            return Ok(Vec::new());
        }
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(&base)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        dirs.iter().map(|dir| self.read_validation_dir(dir)).collect()
    }

    /// Whether a validation with this key already exists.
    pub fn has_validation(&self, key: &ValidationKey) -> Result<bool> {
        self.index.validation_key_exists(key)
    }

    // ==================== Learnings ====================

    /// Append a learning record. Learnings are append-only.
    pub fn append_learning(&self, record: &LearningRecord) -> Result<()> {
        let path = self
            .root
            .join(layout::LEARNINGS)
            .join(format!("{}.yaml", record.id));
        if path.exists() {
            return Err(Error::storage(format!(
                "learning {} already exists",
                record.id
            )));
        }
        write_atomic(&path, serde_yaml::to_string(record)?.as_bytes())
    }

    /// All learnings, optionally filtered by strategy.
    pub fn list_learnings(&self, strategy_id: Option<StrategyId>) -> Result<Vec<LearningRecord>> {
        let pattern = self.root.join(layout::LEARNINGS).join("*.yaml");
        let mut learnings = Vec::new();
        for entry in glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::storage(e.to_string()))?
        {
            let path = entry.map_err(|e| Error::storage(e.to_string()))?;
            let record: LearningRecord =
                serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;
            if strategy_id.map_or(true, |id| record.strategy_id == id) {
                learnings.push(record);
            }
        }
        learnings.sort_by_key(|l| l.created_at);
        Ok(learnings)
    }

    // ==================== Ideas ====================

    fn idea_path(&self, id: IdeaId) -> PathBuf {
        self.root.join(layout::IDEAS).join(format!("{id}.yaml"))
    }

    pub fn create_idea(&self, record: &IdeaRecord) -> Result<()> {
        let path = self.idea_path(record.id);
        if path.exists() {
            return Err(Error::storage(format!("{} already exists", record.id)));
        }
        write_atomic(&path, serde_yaml::to_string(record)?.as_bytes())
    }

    pub fn get_idea(&self, id: IdeaId) -> Result<IdeaRecord> {
        let path = self.idea_path(id);
        if !path.exists() {
            return Err(Error::storage(format!("{id} not found")));
        }
        Ok(serde_yaml::from_str(&std::fs::read_to_string(&path)?)?)
    }

    pub fn list_ideas(&self) -> Result<Vec<IdeaRecord>> {
        let pattern = self.root.join(layout::IDEAS).join("IDEA-*.yaml");
        let mut ideas = Vec::new();
        for entry in glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::storage(e.to_string()))?
        {
            let path = entry.map_err(|e| Error::storage(e.to_string()))?;
            ideas.push(serde_yaml::from_str(&std::fs::read_to_string(&path)?)?);
        }
        ideas.sort_by_key(|i: &IdeaRecord| i.id);
        Ok(ideas)
    }

    /// Remove an idea after approval or TTL prune.
    pub fn delete_idea(&self, id: IdeaId) -> Result<()> {
        let path = self.idea_path(id);
        if !path.exists() {
            return Err(Error::storage(format!("{id} not found")));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    // ==================== Proposals ====================

    fn proposal_path(&self, id: ProposalId) -> PathBuf {
        self.root.join(layout::PROPOSALS).join(format!("{id}.yaml"))
    }

    pub fn create_proposal(&self, record: &ProposalRecord) -> Result<()> {
        let path = self.proposal_path(record.id);
        if path.exists() {
            return Err(Error::storage(format!("{} already exists", record.id)));
        }
        write_atomic(&path, serde_yaml::to_string(record)?.as_bytes())
    }

    pub fn get_proposal(&self, id: ProposalId) -> Result<ProposalRecord> {
        let path = self.proposal_path(id);
        if !path.exists() {
            return Err(Error::storage(format!("{id} not found")));
        }
        Ok(serde_yaml::from_str(&std::fs::read_to_string(&path)?)?)
    }

    pub fn list_proposals(&self) -> Result<Vec<ProposalRecord>> {
        let pattern = self.root.join(layout::PROPOSALS).join("PROP-*.yaml");
        let mut proposals = Vec::new();
        for entry in glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::storage(e.to_string()))?
        {
            let path = entry.map_err(|e| Error::storage(e.to_string()))?;
            proposals.push(serde_yaml::from_str(&std::fs::read_to_string(&path)?)?);
        }
        proposals.sort_by_key(|p: &ProposalRecord| p.id);
        Ok(proposals)
    }

    /// Persist a proposal after a review transition.
    pub fn save_proposal(&self, record: &ProposalRecord) -> Result<()> {
        let path = self.proposal_path(record.id);
        if !path.exists() {
            return Err(Error::storage(format!("{} not found", record.id)));
        }
        write_atomic(&path, serde_yaml::to_string(record)?.as_bytes())
    }

    pub fn delete_proposal(&self, id: ProposalId) -> Result<()> {
        let path = self.proposal_path(id);
        if !path.exists() {
            return Err(Error::storage(format!("{id} not found")));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }
}
