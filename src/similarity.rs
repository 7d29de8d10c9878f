//! Duplicate and variant detection across the strategy catalog.
//!
//! A candidate definition is compared against every cataloged definition
//! through a structural fingerprint: normalized token sets for universe,
//! entry, exit, and sizing. The score is a weighted Jaccard overlap, which
//! is symmetric, 1.0 exactly for structurally identical definitions, and
//! insensitive to the ordering of unordered sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::record::types::{StrategyDefinition, StrategyId};

/// Score at or above which a candidate is a duplicate.
pub const DUPLICATE_THRESHOLD: f64 = 0.95;
/// Score at or above which a candidate is a variant.
pub const VARIANT_THRESHOLD: f64 = 0.70;

/// Component weights of the similarity score.
///
/// Entry logic carries the most signal; sizing the least. The weights sum
/// to 1 so the score stays in [0, 1].
const W_UNIVERSE: f64 = 0.25;
const W_ENTRY: f64 = 0.30;
const W_EXIT: f64 = 0.25;
const W_SIZING: f64 = 0.20;

/// Classification of a candidate against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MatchKind {
    Duplicate { matched: StrategyId, score: f64 },
    Variant { matched: StrategyId, score: f64 },
    New,
}

/// Structural fingerprint of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    universe: BTreeSet<String>,
    entry: BTreeSet<String>,
    exit: BTreeSet<String>,
    sizing: BTreeSet<String>,
}

/// Lowercase alphanumeric tokens plus comparison operators; numbers are
/// kept so `sma(50)` and `sma(200)` do not collapse together.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == '.' {
            current.push(ch.to_ascii_lowercase());
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            if matches!(ch, '>' | '<' | '=') {
                tokens.push(ch.to_string());
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens.into_iter()
}

impl Fingerprint {
    /// Build the fingerprint of a definition.
    pub fn of(definition: &StrategyDefinition) -> Self {
        let mut universe: BTreeSet<String> = definition
            .universe
            .symbols
            .iter()
            .map(|s| s.to_ascii_lowercase())
            .collect();
        if let Some(selection) = &definition.universe.selection {
            universe.extend(tokenize(selection));
        }

        // Parameter values are substituted into the rule tokens so that a
        // re-named parameter with the same value still matches.
        let substitute = |rule: &str| -> BTreeSet<String> {
            tokenize(rule)
                .map(|token| {
                    match definition.parameters.get(&token) {
                        Some(value) => format!("{value}"),
                        None => token,
                    }
                })
                .collect()
        };

        let mut entry = BTreeSet::new();
        for rule in &definition.entry {
            entry.extend(substitute(rule));
        }
        let mut exit = BTreeSet::new();
        for rule in &definition.exit {
            exit.extend(substitute(rule));
        }

        let mut sizing: BTreeSet<String> = tokenize(&definition.sizing.method).collect();
        sizing.insert(format!("lev:{}", definition.sizing.max_leverage));

        Self {
            universe,
            entry,
            exit,
            sizing,
        }
    }

    /// Weighted Jaccard similarity in [0, 1].
    pub fn similarity(&self, other: &Self) -> f64 {
        W_UNIVERSE * jaccard(&self.universe, &other.universe)
            + W_ENTRY * jaccard(&self.entry, &other.entry)
            + W_EXIT * jaccard(&self.exit, &other.exit)
            + W_SIZING * jaccard(&self.sizing, &other.sizing)
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// In-memory similarity index over the catalog.
///
/// Append-only: entries are added as strategies are cataloged and never
/// rewritten. Readers always see the last committed set.
pub struct SimilarityIndex {
    entries: Mutex<Vec<(StrategyId, Fingerprint)>>,
}

impl SimilarityIndex {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Build from existing catalog entries.
    pub fn from_entries(entries: Vec<(StrategyId, Fingerprint)>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Register a cataloged definition.
    pub fn insert(&self, id: StrategyId, definition: &StrategyDefinition) -> Result<()> {
        let fingerprint = Fingerprint::of(definition);
        self.entries
            .lock()
            .map_err(|e| Error::Internal(format!("similarity lock poisoned: {e}")))?
            .push((id, fingerprint));
        Ok(())
    }

    /// Classify a candidate against everything cataloged so far.
    pub fn classify(&self, definition: &StrategyDefinition) -> Result<MatchKind> {
        let candidate = Fingerprint::of(definition);
        let entries = self
            .entries
            .lock()
            .map_err(|e| Error::Internal(format!("similarity lock poisoned: {e}")))?;

        let mut best: Option<(StrategyId, f64)> = None;
        for (id, fingerprint) in entries.iter() {
            let score = candidate.similarity(fingerprint);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((*id, score));
            }
        }

        Ok(match best {
            Some((matched, score)) if score >= DUPLICATE_THRESHOLD => {
                MatchKind::Duplicate { matched, score }
            }
            Some((matched, score)) if score >= VARIANT_THRESHOLD => {
                MatchKind::Variant { matched, score }
            }
            _ => MatchKind::New,
        })
    }
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new()
    }
}
