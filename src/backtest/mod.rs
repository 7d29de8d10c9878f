//! Walk-forward backtest execution.

pub mod backend;
pub mod executor;
pub mod metrics;
pub mod sim;
pub mod windows;

pub use backend::{BacktestBackend, BacktestRun, DateRange};
pub use executor::{ExecutionResult, WalkForwardExecutor};
pub use metrics::{ReturnSeries, TradeRecord, WindowMetrics};
pub use sim::SimBacktestBackend;
pub use windows::{plan_non_overlapping, plan_windows};
