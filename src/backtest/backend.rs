//! Backtest backend interface.
//!
//! The executor is agnostic to what actually runs the backtest — a local
//! containerized engine or a cloud service. A backend must be
//! deterministic given `(artifact, range, seed)`, must model costs from
//! explicit parameters, and must not expose data outside the range.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::backtest::metrics::{ReturnSeries, TradeRecord};
use crate::codegen::BacktestArtifact;
use crate::error::Result;

/// A closed date range handed to the backend. The artifact itself never
/// carries dates; this is the only place they enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Raw results of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub returns: ReturnSeries,
    pub benchmark: ReturnSeries,
    pub trades: Vec<TradeRecord>,
}

/// The backend contract.
#[async_trait]
pub trait BacktestBackend: Send + Sync {
    /// Run the artifact over exactly this range.
    async fn submit(
        &self,
        artifact: &BacktestArtifact,
        range: DateRange,
        seed: u64,
    ) -> Result<BacktestRun>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}
