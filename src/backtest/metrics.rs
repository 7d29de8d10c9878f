//! Per-window backtest metrics.
//!
//! Computed from the raw return series and trade log a backend hands back
//! for one walk-forward window. All ratios are annualized from the series'
//! declared period frequency.

use serde::{Deserialize, Serialize};

/// A per-period simple return series with its sampling frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    /// Periods per year (252 daily, 52 weekly, 12 monthly)
    pub periods_per_year: f64,
    /// Simple per-period returns
    pub returns: Vec<f64>,
}

impl ReturnSeries {
    pub fn daily(returns: Vec<f64>) -> Self {
        Self {
            periods_per_year: 252.0,
            returns,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    fn mean(&self) -> f64 {
        if self.returns.is_empty() {
            return 0.0;
        }
        self.returns.iter().sum::<f64>() / self.returns.len() as f64
    }

    fn std_dev(&self) -> f64 {
        let n = self.returns.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self
            .returns
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        var.sqrt()
    }

    fn downside_dev(&self) -> f64 {
        let n = self.returns.len();
        if n < 2 {
            return 0.0;
        }
        let downside: f64 = self
            .returns
            .iter()
            .map(|r| r.min(0.0).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        downside.sqrt()
    }

    /// Annualized Sharpe ratio against a zero risk-free rate.
    pub fn sharpe(&self) -> f64 {
        let sd = self.std_dev();
        if sd == 0.0 {
            return 0.0;
        }
        self.mean() / sd * self.periods_per_year.sqrt()
    }

    /// Annualized Sortino ratio.
    pub fn sortino(&self) -> f64 {
        let dd = self.downside_dev();
        if dd == 0.0 {
            return 0.0;
        }
        self.mean() / dd * self.periods_per_year.sqrt()
    }

    /// Annualized volatility.
    pub fn volatility(&self) -> f64 {
        self.std_dev() * self.periods_per_year.sqrt()
    }

    /// Compound annual growth rate.
    pub fn cagr(&self) -> f64 {
        if self.returns.is_empty() {
            return 0.0;
        }
        let growth: f64 = self.returns.iter().map(|r| 1.0 + r).product();
        if growth <= 0.0 {
            return -1.0;
        }
        let years = self.returns.len() as f64 / self.periods_per_year;
        if years == 0.0 {
            return 0.0;
        }
        growth.powf(1.0 / years) - 1.0
    }

    /// Maximum peak-to-trough drawdown as a positive fraction.
    pub fn max_drawdown(&self) -> f64 {
        let mut equity = 1.0_f64;
        let mut peak = 1.0_f64;
        let mut max_dd = 0.0_f64;
        for r in &self.returns {
            equity *= 1.0 + r;
            if equity > peak {
                peak = equity;
            }
            let dd = 1.0 - equity / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
        max_dd
    }
}

/// One closed trade reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub entered: chrono::NaiveDate,
    pub exited: chrono::NaiveDate,
    /// Realized profit and loss in account currency
    pub pnl: f64,
}

/// Metrics for one walk-forward window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub cagr: f64,
    pub sharpe: f64,
    pub sortino: f64,
    /// Positive fraction, 0.20 = 20% drawdown
    pub max_drawdown: f64,
    pub win_rate: f64,
    /// Gross wins over gross losses; `None` when no losing trades exist
    pub profit_factor: Option<f64>,
    pub trade_count: u64,
    pub volatility: f64,
    pub benchmark_sharpe: f64,
    pub benchmark_cagr: f64,
}

impl WindowMetrics {
    /// Compute window metrics from raw backend output.
    pub fn compute(
        returns: &ReturnSeries,
        benchmark: &ReturnSeries,
        trades: &[TradeRecord],
    ) -> Self {
        let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
        let gross_win: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
        let gross_loss: f64 = trades
            .iter()
            .filter(|t| t.pnl < 0.0)
            .map(|t| -t.pnl)
            .sum();

        let win_rate = if trades.is_empty() {
            0.0
        } else {
            wins as f64 / trades.len() as f64
        };
        let profit_factor = if gross_loss > 0.0 {
            Some(gross_win / gross_loss)
        } else {
            None
        };

        Self {
            cagr: returns.cagr(),
            sharpe: returns.sharpe(),
            sortino: returns.sortino(),
            max_drawdown: returns.max_drawdown(),
            win_rate,
            profit_factor,
            trade_count: trades.len() as u64,
            volatility: returns.volatility(),
            benchmark_sharpe: benchmark.sharpe(),
            benchmark_cagr: benchmark.cagr(),
        }
    }
}
