//! Walk-forward execution across windows.
//!
//! Windows run concurrently behind a semaphore, each with its own deadline
//! and retry budget. One window failing marks that window and moves on;
//! the whole validation only errors when failures exceed the configured
//! tolerance. The executor supplies the only dates the artifact ever sees.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Duration};
use tracing::{info, warn};

use crate::backtest::backend::{BacktestBackend, BacktestRun, DateRange};
use crate::backtest::metrics::WindowMetrics;
use crate::codegen::BacktestArtifact;
use crate::config::WindowConfig;
use crate::error::{Error, Result};
use crate::record::types::{WindowOutcome, WindowStatus};
use crate::regime::RegimeTagger;
use crate::stats::WindowSample;

/// Everything the statistical validator needs from execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// One outcome per planned window, in window order
    pub windows: Vec<WindowOutcome>,
    /// Samples from the windows that completed
    pub samples: Vec<WindowSample>,
}

impl ExecutionResult {
    pub fn failed_windows(&self) -> usize {
        self.windows
            .iter()
            .filter(|w| matches!(w.status, WindowStatus::Error { .. }))
            .count()
    }
}

/// Runs an artifact across a window plan.
pub struct WalkForwardExecutor {
    backend: Arc<dyn BacktestBackend>,
    tagger: Arc<RegimeTagger>,
    config: WindowConfig,
}

impl WalkForwardExecutor {
    pub fn new(
        backend: Arc<dyn BacktestBackend>,
        tagger: Arc<RegimeTagger>,
        config: WindowConfig,
    ) -> Self {
        Self {
            backend,
            tagger,
            config,
        }
    }

    /// Execute every window. `seed_base` makes per-window seeds
    /// reproducible: window `i` runs with `seed_base + i`.
    pub async fn execute(
        &self,
        artifact: &BacktestArtifact,
        windows: &[DateRange],
        seed_base: u64,
    ) -> Result<ExecutionResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));

        let futures = windows.iter().enumerate().map(|(index, range)| {
            let semaphore = Arc::clone(&semaphore);
            let range = *range;
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return self.error_outcome(index, range, "executor shut down".to_string())
                    }
                };
                self.run_window(artifact, index, range, seed_base + index as u64)
                    .await
            }
        });

        let mut outcomes: Vec<WindowOutcome> = join_all(futures).await;
        outcomes.sort_by_key(|w| w.index);

        let failed = outcomes
            .iter()
            .filter(|w| matches!(w.status, WindowStatus::Error { .. }))
            .count();
        if failed > self.config.max_failed_windows {
            return Err(Error::Internal(format!(
                "{failed} of {} windows failed (tolerance {})",
                outcomes.len(),
                self.config.max_failed_windows
            )));
        }

        let samples = outcomes
            .iter()
            .filter_map(|w| {
                let metrics = w.metrics.as_ref()?;
                let regime = w.regime.clone()?;
                Some(WindowSample {
                    sharpe: metrics.sharpe,
                    max_drawdown: metrics.max_drawdown,
                    trade_count: metrics.trade_count,
                    regime,
                })
            })
            .collect();

        info!(
            windows = outcomes.len(),
            failed,
            backend = self.backend.name(),
            "walk-forward execution complete"
        );
        Ok(ExecutionResult {
            windows: outcomes,
            samples,
        })
    }

    fn error_outcome(&self, index: usize, range: DateRange, message: String) -> WindowOutcome {
        WindowOutcome {
            index,
            start: range.start,
            end: range.end,
            status: WindowStatus::Error { message },
            metrics: None,
            regime: None,
        }
    }

    async fn run_window(
        &self,
        artifact: &BacktestArtifact,
        index: usize,
        range: DateRange,
        seed: u64,
    ) -> WindowOutcome {
        let run = match self.submit_with_retries(artifact, index, range, seed).await {
            Ok(run) => run,
            Err(e) => {
                warn!(window = index, range = %range, error = %e, "window failed");
                return self.error_outcome(index, range, e.to_string());
            }
        };

        let metrics = WindowMetrics::compute(&run.returns, &run.benchmark, &run.trades);
        let regime = match self.tagger.tag(range.start, range.end) {
            Ok(tag) => tag,
            Err(e) => {
                warn!(window = index, error = %e, "regime tagging failed");
                return self.error_outcome(index, range, format!("regime tagging: {e}"));
            }
        };

        WindowOutcome {
            index,
            start: range.start,
            end: range.end,
            status: WindowStatus::Completed,
            metrics: Some(metrics),
            regime: Some(regime),
        }
    }

    async fn submit_with_retries(
        &self,
        artifact: &BacktestArtifact,
        index: usize,
        range: DateRange,
        seed: u64,
    ) -> Result<BacktestRun> {
        let deadline = Duration::from_secs(self.config.timeout_secs);
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                sleep(backoff).await;
            }

            match timeout(deadline, self.backend.submit(artifact, range, seed)).await {
                Ok(Ok(run)) => return Ok(run),
                Ok(Err(e)) => {
                    warn!(window = index, attempt, error = %e, "backend error");
                    last_err = Some(e);
                }
                Err(_) => {
                    let e = Error::BacktestTimeout {
                        duration_ms: deadline.as_millis() as u64,
                        attempt,
                    };
                    warn!(window = index, attempt, "backend deadline exceeded");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::WindowError {
                window: index,
                message: "no attempts were made".to_string(),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::metrics::ReturnSeries;
    use crate::backtest::windows::plan_non_overlapping;
    use crate::codegen::CodeGenerator;
    use crate::record::types::tests::sample_definition;
    use crate::regime::{ReferencePoint, ReferenceSeries};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic synthetic backend; optionally fails chosen windows.
    struct SimBackend {
        fail_years: Vec<i32>,
        calls: AtomicUsize,
    }

    impl SimBackend {
        fn new() -> Self {
            Self {
                fail_years: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(years: Vec<i32>) -> Self {
            Self {
                fail_years: years,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BacktestBackend for SimBackend {
        async fn submit(
            &self,
            _artifact: &crate::codegen::BacktestArtifact,
            range: DateRange,
            seed: u64,
        ) -> crate::error::Result<BacktestRun> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let year = range.start.format("%Y").to_string().parse::<i32>().unwrap();
            if self.fail_years.contains(&year) {
                return Err(Error::Internal(format!("container crashed in {year}")));
            }

            // Deterministic pseudo-returns from the seed
            let returns: Vec<f64> = (0..252)
                .map(|i| {
                    let x = ((seed * 31 + i) % 97) as f64 / 97.0;
                    0.0008 + (x - 0.5) * 0.01
                })
                .collect();
            let trades = (0..20)
                .map(|i| crate::backtest::metrics::TradeRecord {
                    symbol: "SPY".to_string(),
                    entered: range.start,
                    exited: range.end,
                    pnl: if i % 3 == 0 { -40.0 } else { 60.0 },
                })
                .collect();
            Ok(BacktestRun {
                returns: ReturnSeries::daily(returns.clone()),
                benchmark: ReturnSeries::daily(returns),
                trades,
            })
        }

        fn name(&self) -> &str {
            "sim"
        }
    }

    fn reference_series() -> ReferenceSeries {
        let mut points = Vec::new();
        let mut date = NaiveDate::from_ymd_opt(1987, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        while date < end {
            points.push(ReferencePoint {
                date,
                broad_close: 110.0,
                broad_sma_200: 100.0,
                implied_vol: 18.0,
                treasury_10y: 3.0,
                small_cap_close: 110.0,
            });
            date += chrono::Duration::days(7);
        }
        let sector_closes = BTreeMap::from([(
            "technology".to_string(),
            points.iter().map(|p| (p.date, 50.0)).collect(),
        )]);
        ReferenceSeries {
            points,
            sector_closes,
        }
    }

    fn executor(backend: SimBackend) -> WalkForwardExecutor {
        WalkForwardExecutor::new(
            Arc::new(backend),
            Arc::new(RegimeTagger::new(reference_series())),
            WindowConfig {
                timeout_secs: 5,
                max_retries: 1,
                ..WindowConfig::default()
            },
        )
    }

    fn artifact() -> crate::codegen::BacktestArtifact {
        CodeGenerator::new().generate(&sample_definition()).unwrap()
    }

    #[tokio::test]
    async fn test_all_windows_complete() {
        let executor = executor(SimBackend::new());
        let windows = plan_non_overlapping(2024, 12, 3).unwrap();
        let result = executor.execute(&artifact(), &windows, 7).await.unwrap();

        assert_eq!(result.windows.len(), 12);
        assert_eq!(result.failed_windows(), 0);
        assert_eq!(result.samples.len(), 12);
        // Outcomes are in window order regardless of completion order
        for (i, window) in result.windows.iter().enumerate() {
            assert_eq!(window.index, i);
        }
    }

    #[tokio::test]
    async fn test_single_window_failure_is_tolerated() {
        let executor = executor(SimBackend::failing(vec![2003]));
        let windows = plan_non_overlapping(2024, 12, 3).unwrap();
        let result = executor.execute(&artifact(), &windows, 7).await.unwrap();

        assert_eq!(result.failed_windows(), 1);
        assert_eq!(result.samples.len(), 11);
        let failed = result
            .windows
            .iter()
            .find(|w| matches!(w.status, WindowStatus::Error { .. }))
            .unwrap();
        assert_eq!(failed.start.format("%Y").to_string(), "2003");
        assert!(failed.metrics.is_none());
    }

    #[tokio::test]
    async fn test_excess_failures_error_the_validation() {
        let executor = executor(SimBackend::failing(vec![1991, 2003, 2009]));
        let windows = plan_non_overlapping(2024, 12, 3).unwrap();
        let err = executor.execute(&artifact(), &windows, 7).await.unwrap_err();
        assert!(err.to_string().contains("windows failed"));
    }

    #[tokio::test]
    async fn test_failed_window_is_retried() {
        let backend = Arc::new(SimBackend::failing(vec![2003]));
        let executor = WalkForwardExecutor::new(
            Arc::clone(&backend) as Arc<dyn BacktestBackend>,
            Arc::new(RegimeTagger::new(reference_series())),
            WindowConfig {
                timeout_secs: 5,
                max_retries: 1,
                ..WindowConfig::default()
            },
        );
        let windows = plan_non_overlapping(2024, 12, 3).unwrap();
        let result = executor.execute(&artifact(), &windows, 7).await.unwrap();
        assert_eq!(result.failed_windows(), 1);
        // 11 clean windows plus two attempts on the failing one
        assert_eq!(backend.calls.load(Ordering::SeqCst), 13);
    }

    #[tokio::test]
    async fn test_execution_is_deterministic_given_seed() {
        let windows = plan_non_overlapping(2024, 6, 3).unwrap();
        let a = executor(SimBackend::new())
            .execute(&artifact(), &windows, 42)
            .await
            .unwrap();
        let b = executor(SimBackend::new())
            .execute(&artifact(), &windows, 42)
            .await
            .unwrap();
        let sharpes =
            |r: &ExecutionResult| r.samples.iter().map(|s| s.sharpe).collect::<Vec<_>>();
        assert_eq!(sharpes(&a), sharpes(&b));
    }
}
