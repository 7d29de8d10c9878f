//! Monotonic id allocation with an on-disk journal.
//!
//! A single-writer allocator backs the `STRAT`/`IDEA`/`PROP` counters.
//! Every allocation appends one line to the journal before the id is
//! handed out, so a crash can skip numbers but never reuse one. Replaying
//! the journal on open recovers the high-water marks.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::record::types::{IdeaId, ProposalId, StrategyId};

/// Journal-backed id allocator.
pub struct IdAllocator {
    path: PathBuf,
    state: Mutex<HashMap<String, u32>>,
}

impl IdAllocator {
    /// Open the allocator, replaying an existing journal.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut high_water: HashMap<String, u32> = HashMap::new();

        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            for (line_no, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let (prefix, n) = line.split_once(' ').ok_or_else(|| {
                    Error::storage(format!(
                        "corrupt counter journal at line {}: {line:?}",
                        line_no + 1
                    ))
                })?;
                let n: u32 = n.parse().map_err(|_| {
                    Error::storage(format!(
                        "corrupt counter journal at line {}: {line:?}",
                        line_no + 1
                    ))
                })?;
                let entry = high_water.entry(prefix.to_string()).or_insert(0);
                *entry = (*entry).max(n);
            }
        } else if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self {
            path,
            state: Mutex::new(high_water),
        })
    }

    fn allocate(&self, prefix: &str) -> Result<u32> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| Error::Internal(format!("allocator lock poisoned: {e}")))?;
        let next = state.get(prefix).copied().unwrap_or(0) + 1;

        // Journal first: the id only exists once it is durable.
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{prefix} {next}")?;
        file.sync_data()?;

        state.insert(prefix.to_string(), next);
        Ok(next)
    }

    pub fn next_strategy(&self) -> Result<StrategyId> {
        Ok(StrategyId(self.allocate(StrategyId::prefix())?))
    }

    pub fn next_idea(&self) -> Result<IdeaId> {
        Ok(IdeaId(self.allocate(IdeaId::prefix())?))
    }

    pub fn next_proposal(&self) -> Result<ProposalId> {
        Ok(ProposalId(self.allocate(ProposalId::prefix())?))
    }
}
