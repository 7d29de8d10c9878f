//! SQLite query index over the record files.
//!
//! The YAML files under the workspace are the source of truth; the index
//! is derived state rebuilt on open and kept current by the store. Queries
//! (`list`, duplicate lookups, validation-key refusal) never scan the
//! filesystem.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::record::state::StrategyState;
use crate::record::types::{StrategyId, StrategyRecord, ValidationKey, ValidationRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS strategies (
    id            TEXT PRIMARY KEY,
    numeric_id    INTEGER NOT NULL,
    name          TEXT NOT NULL,
    state         TEXT NOT NULL,
    definition_hash TEXT NOT NULL,
    source_hash   TEXT NOT NULL,
    specificity   INTEGER NOT NULL,
    trust         INTEGER NOT NULL,
    decision      TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    tags          TEXT NOT NULL,
    parents       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_strategies_state ON strategies(state);
CREATE INDEX IF NOT EXISTS idx_strategies_source ON strategies(source_hash);
CREATE INDEX IF NOT EXISTS idx_strategies_defhash ON strategies(definition_hash);

CREATE TABLE IF NOT EXISTS validations (
    id            TEXT PRIMARY KEY,
    strategy_id   TEXT NOT NULL,
    definition_hash TEXT NOT NULL,
    code_hash     TEXT NOT NULL,
    generator_version TEXT NOT NULL,
    verdict       TEXT NOT NULL,
    mean_sharpe   REAL NOT NULL,
    p_value       REAL NOT NULL,
    p_adjusted    REAL NOT NULL,
    completed_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_validations_strategy ON validations(strategy_id);
CREATE INDEX IF NOT EXISTS idx_validations_key
    ON validations(definition_hash, code_hash, generator_version);
";

/// Filter for strategy queries. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct StrategyFilter {
    pub state: Option<StrategyState>,
    pub tag: Option<String>,
    pub min_trust: Option<i32>,
    pub parent: Option<StrategyId>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// Rebuildable index over the record files.
pub struct RecordIndex {
    conn: Arc<Mutex<Connection>>,
}

impl RecordIndex {
    /// Open or create the index database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::storage(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory index, for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("index lock poisoned: {e}")))?;
        f(&conn).map_err(|e| Error::storage(e.to_string()))
    }

    /// Drop all rows before a rebuild from files.
    pub fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM strategies", [])?;
            conn.execute("DELETE FROM validations", [])?;
            Ok(())
        })
    }

    /// Insert or replace one strategy row.
    pub fn upsert_strategy(&self, record: &StrategyRecord) -> Result<()> {
        let tags = serde_json::to_string(&record.tags)?;
        let parents = serde_json::to_string(
            &record
                .lineage
                .parents
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>(),
        )?;
        let state = serde_json::to_string(&record.state)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO strategies (
                    id, numeric_id, name, state, definition_hash, source_hash,
                    specificity, trust, decision, created_at, tags, parents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id.to_string(),
                    record.id.0,
                    record.name,
                    state.trim_matches('"'),
                    record.definition_hash,
                    record.provenance.content_hash,
                    record.quality.specificity,
                    record.quality.trust,
                    record.quality.decision.to_string(),
                    record.created_at.to_rfc3339(),
                    tags,
                    parents,
                ],
            )?;
            Ok(())
        })
    }

    /// Insert one validation row.
    pub fn insert_validation(&self, record: &ValidationRecord) -> Result<()> {
        let verdict = record.outcome.verdict.label();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO validations (
                    id, strategy_id, definition_hash, code_hash, generator_version,
                    verdict, mean_sharpe, p_value, p_adjusted, completed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id.to_string(),
                    record.strategy_id.to_string(),
                    record.definition_hash,
                    record.code_hash,
                    record.generator_version,
                    verdict,
                    record.outcome.aggregate.mean_sharpe,
                    record.outcome.aggregate.p_value,
                    record.outcome.aggregate.p_adjusted,
                    record.completed_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Strategy id previously ingested from this source content, if any.
    pub fn strategy_by_source_hash(&self, source_hash: &str) -> Result<Option<StrategyId>> {
        let id: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM strategies WHERE source_hash = ?1 LIMIT 1",
                params![source_hash],
                |row| row.get(0),
            )
            .optional()
        })?;
        id.map(|s| s.parse()).transpose()
    }

    /// Current indexed state of a strategy.
    pub fn strategy_state(&self, id: StrategyId) -> Result<Option<StrategyState>> {
        let state: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT state FROM strategies WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
        })?;
        state
            .map(|s| serde_json::from_str(&format!("\"{s}\"")).map_err(Error::from))
            .transpose()
    }

    /// Whether a validation with this idempotence key already exists.
    pub fn validation_key_exists(&self, key: &ValidationKey) -> Result<bool> {
        let count: i64 = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM validations
                 WHERE definition_hash = ?1 AND code_hash = ?2 AND generator_version = ?3",
                params![key.definition_hash, key.code_hash, key.generator_version],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    /// Raw p-values of validations against any of the given definition
    /// hashes, oldest first. This is the multiple-testing family.
    pub fn family_p_values(&self, definition_hashes: &[String]) -> Result<Vec<f64>> {
        if definition_hashes.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = definition_hashes
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT p_value FROM validations WHERE definition_hash IN ({placeholders})
             ORDER BY completed_at ASC"
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(definition_hashes.iter()),
                |row| row.get::<_, f64>(0),
            )?;
            rows.collect()
        })
    }

    /// Ids matching a filter, ordered by numeric id.
    pub fn query(&self, filter: &StrategyFilter) -> Result<Vec<StrategyId>> {
        let mut sql = String::from("SELECT id, tags, parents FROM strategies WHERE 1=1");
        let mut args: Vec<String> = Vec::new();

        if let Some(state) = filter.state {
            let state_str = serde_json::to_string(&state)?;
            args.push(state_str.trim_matches('"').to_string());
            sql.push_str(&format!(" AND state = ?{}", args.len()));
        }
        if let Some(min_trust) = filter.min_trust {
            args.push(min_trust.to_string());
            sql.push_str(&format!(" AND trust >= ?{}", args.len()));
        }
        if let Some(after) = filter.created_after {
            args.push(after.to_rfc3339());
            sql.push_str(&format!(" AND created_at >= ?{}", args.len()));
        }
        if let Some(before) = filter.created_before {
            args.push(before.to_rfc3339());
            sql.push_str(&format!(" AND created_at <= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY numeric_id ASC");

        let rows: Vec<(String, String, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect()
        })?;

        // Tag and parent filters go through the JSON columns.
        let mut ids = Vec::new();
        for (id, tags_json, parents_json) in rows {
            if let Some(tag) = &filter.tag {
                let tags: Vec<String> = serde_json::from_str(&tags_json)?;
                if !tags.contains(tag) {
                    continue;
                }
            }
            if let Some(parent) = filter.parent {
                let parents: Vec<String> = serde_json::from_str(&parents_json)?;
                if !parents.contains(&parent.to_string()) {
                    continue;
                }
            }
            ids.push(id.parse()?);
        }
        Ok(ids)
    }

    /// Count of strategies per state, for the status view.
    pub fn state_counts(&self) -> Result<Vec<(String, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT state, COUNT(*) FROM strategies GROUP BY state ORDER BY state",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::types::tests::sample_definition;
    use crate::record::types::*;

    fn record(id: u32, state: StrategyState, trust: i32) -> StrategyRecord {
        let definition = sample_definition();
        let definition_hash = definition.definition_hash().unwrap();
        StrategyRecord {
            id: StrategyId(id),
            name: format!("strategy {id}"),
            created_at: Utc::now(),
            state,
            lineage: Lineage::default(),
            tags: vec!["momentum".to_string()],
            provenance: SourceProvenance {
                source_ref: format!("inbox/{id}.md"),
                excerpt: None,
                content_hash: format!("src-{id}"),
                author: None,
                author_credibility: 5,
            },
            definition,
            edge: None,
            edge_provenance: EdgeProvenance::unknown(),
            quality: IngestionQuality {
                specificity: 6,
                trust,
                hard_flags: Vec::new(),
                soft_flags: Vec::new(),
                decision: IngestDecision::Accept,
                reason: "accepted".to_string(),
            },
            definition_hash,
            transitions: Vec::new(),
            error_cause: None,
        }
    }

    #[test]
    fn test_upsert_and_query_by_state() {
        let index = RecordIndex::in_memory().unwrap();
        index
            .upsert_strategy(&record(1, StrategyState::Pending, 60))
            .unwrap();
        index
            .upsert_strategy(&record(2, StrategyState::Validated, 80))
            .unwrap();

        let pending = index
            .query(&StrategyFilter {
                state: Some(StrategyState::Pending),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(pending, vec![StrategyId(1)]);
    }

    #[test]
    fn test_query_orders_by_numeric_id() {
        let index = RecordIndex::in_memory().unwrap();
        for id in [10, 2, 7] {
            index
                .upsert_strategy(&record(id, StrategyState::Pending, 60))
                .unwrap();
        }
        let ids = index.query(&StrategyFilter::default()).unwrap();
        assert_eq!(ids, vec![StrategyId(2), StrategyId(7), StrategyId(10)]);
    }

    #[test]
    fn test_source_hash_lookup() {
        let index = RecordIndex::in_memory().unwrap();
        index
            .upsert_strategy(&record(3, StrategyState::Pending, 60))
            .unwrap();
        assert_eq!(
            index.strategy_by_source_hash("src-3").unwrap(),
            Some(StrategyId(3))
        );
        assert_eq!(index.strategy_by_source_hash("missing").unwrap(), None);
    }

    #[test]
    fn test_min_trust_filter() {
        let index = RecordIndex::in_memory().unwrap();
        index
            .upsert_strategy(&record(1, StrategyState::Pending, 40))
            .unwrap();
        index
            .upsert_strategy(&record(2, StrategyState::Pending, 90))
            .unwrap();
        let ids = index
            .query(&StrategyFilter {
                min_trust: Some(70),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids, vec![StrategyId(2)]);
    }

    #[test]
    fn test_state_round_trips_through_index() {
        let index = RecordIndex::in_memory().unwrap();
        index
            .upsert_strategy(&record(4, StrategyState::ReadyToGenerate, 60))
            .unwrap();
        assert_eq!(
            index.strategy_state(StrategyId(4)).unwrap(),
            Some(StrategyState::ReadyToGenerate)
        );
    }
}
