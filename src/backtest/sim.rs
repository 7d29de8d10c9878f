//! Deterministic simulation backend.
//!
//! A local stand-in for a real backtest engine: returns are drawn from a
//! seeded generator keyed on `(code_hash, range, seed)`, so the same
//! submission always produces the same result. Used for dry runs and for
//! exercising the pipeline without a cloud backend attached.

use async_trait::async_trait;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;

use crate::backtest::backend::{BacktestBackend, BacktestRun, DateRange};
use crate::backtest::metrics::{ReturnSeries, TradeRecord};
use crate::codegen::BacktestArtifact;
use crate::error::{Error, Result};
use crate::hash::sha256_hex;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Simulation backend parameters.
#[derive(Debug, Clone)]
pub struct SimBacktestBackend {
    /// Annualized drift of the simulated strategy returns
    pub annual_drift: f64,
    /// Annualized volatility of the simulated strategy returns
    pub annual_vol: f64,
    /// Explicit round-trip cost in basis points, subtracted per trade day
    pub cost_bps: f64,
    /// Closed trades synthesized per window
    pub trades_per_window: usize,
}

impl Default for SimBacktestBackend {
    fn default() -> Self {
        Self {
            annual_drift: 0.06,
            annual_vol: 0.15,
            cost_bps: 1.0,
            trades_per_window: 15,
        }
    }
}

impl SimBacktestBackend {
    fn rng_for(&self, artifact: &BacktestArtifact, range: DateRange, seed: u64) -> ChaCha8Rng {
        let key = format!("{}|{}|{}", artifact.code_hash, range, seed);
        let digest = sha256_hex(key.as_bytes());
        let mut bytes = [0u8; 8];
        for (i, chunk) in digest.as_bytes().chunks(2).take(8).enumerate() {
            let hex = std::str::from_utf8(chunk).unwrap_or("00");
            bytes[i] = u8::from_str_radix(hex, 16).unwrap_or(0);
        }
        ChaCha8Rng::seed_from_u64(u64::from_le_bytes(bytes))
    }

    fn draw_series(
        &self,
        rng: &mut ChaCha8Rng,
        days: usize,
        drift: f64,
        vol: f64,
    ) -> Result<Vec<f64>> {
        let daily_drift = drift / TRADING_DAYS_PER_YEAR;
        let daily_vol = vol / TRADING_DAYS_PER_YEAR.sqrt();
        let normal = Normal::new(daily_drift, daily_vol)
            .map_err(|e| Error::Internal(format!("sim distribution: {e}")))?;
        let cost = self.cost_bps / 10_000.0 / TRADING_DAYS_PER_YEAR;
        Ok((0..days).map(|_| normal.sample(rng) - cost).collect())
    }
}

#[async_trait]
impl BacktestBackend for SimBacktestBackend {
    async fn submit(
        &self,
        artifact: &BacktestArtifact,
        range: DateRange,
        seed: u64,
    ) -> Result<BacktestRun> {
        let calendar_days = range.end.signed_duration_since(range.start).num_days();
        if calendar_days <= 0 {
            return Err(Error::Internal(format!("empty range {range}")));
        }
        let days = ((calendar_days as f64) * TRADING_DAYS_PER_YEAR / 365.25).round() as usize;

        let mut rng = self.rng_for(artifact, range, seed);
        let returns = self.draw_series(&mut rng, days, self.annual_drift, self.annual_vol)?;
        let benchmark = self.draw_series(&mut rng, days, 0.07, 0.16)?;

        let trades = (0..self.trades_per_window)
            .map(|_| {
                let pnl: f64 = rng.gen_range(-500.0..=700.0);
                TradeRecord {
                    symbol: artifact
                        .fingerprint
                        .universe
                        .iter()
                        .next()
                        .cloned()
                        .unwrap_or_else(|| "SPY".to_string()),
                    entered: range.start,
                    exited: range.end,
                    pnl,
                }
            })
            .collect();

        Ok(BacktestRun {
            returns: ReturnSeries::daily(returns),
            benchmark: ReturnSeries::daily(benchmark),
            trades,
        })
    }

    fn name(&self) -> &str {
        "sim"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::CodeGenerator;
    use crate::record::types::tests::sample_definition;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2012, 12, 31).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_deterministic_given_inputs() {
        let backend = SimBacktestBackend::default();
        let artifact = CodeGenerator::new().generate(&sample_definition()).unwrap();
        let a = backend.submit(&artifact, range(), 7).await.unwrap();
        let b = backend.submit(&artifact, range(), 7).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_different_seed_different_series() {
        let backend = SimBacktestBackend::default();
        let artifact = CodeGenerator::new().generate(&sample_definition()).unwrap();
        let a = backend.submit(&artifact, range(), 7).await.unwrap();
        let b = backend.submit(&artifact, range(), 8).await.unwrap();
        assert_ne!(a.returns, b.returns);
    }

    #[tokio::test]
    async fn test_series_length_tracks_range() {
        let backend = SimBacktestBackend::default();
        let artifact = CodeGenerator::new().generate(&sample_definition()).unwrap();
        let run = backend.submit(&artifact, range(), 7).await.unwrap();
        // Three calendar years of trading days
        assert!((750..=765).contains(&run.returns.returns.len()));
    }
}
