//! Statistical validation of walk-forward results.
//!
//! Takes the per-window metrics and regime tags collected by the executor,
//! computes bootstrap confidence intervals and a multiple-testing-corrected
//! p-value against a zero-skill null, evaluates the configured gates, and
//! produces the verdict written into the validation record.
//!
//! Gate failures are data: an `INVALIDATED` verdict carries the full
//! aggregates, never an error.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::BTreeMap;

use crate::config::{Correction, GateConfig, StatsConfig};
use crate::regime::RegimeTag;

/// Final verdict of a validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "verdict")]
pub enum Verdict {
    Validated,
    /// Gates pass only within the listed regime groups
    Conditional { regimes: Vec<String> },
    Invalidated,
    /// A pre-execution gate stopped the validation
    Blocked,
    Error,
}

impl Verdict {
    /// Whether the strategy may enter the validated catalog.
    pub fn is_passing(&self) -> bool {
        matches!(self, Self::Validated | Self::Conditional { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Validated => "VALIDATED",
            Self::Conditional { .. } => "CONDITIONAL",
            Self::Invalidated => "INVALIDATED",
            Self::Blocked => "BLOCKED",
            Self::Error => "ERROR",
        }
    }
}

/// One evaluated gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub passed: bool,
    pub observed: f64,
    pub threshold: f64,
}

impl GateResult {
    fn new(name: &str, passed: bool, observed: f64, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            passed,
            observed,
            threshold,
        }
    }
}

/// Aggregate Sharpe and window count for one regime group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePerformance {
    /// Group key, e.g. `direction=bull`
    pub regime: String,
    pub window_count: usize,
    pub mean_sharpe: f64,
    pub consistency: f64,
}

/// Aggregates over all successful windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub window_count: usize,
    pub mean_sharpe: f64,
    /// Bootstrap 95% confidence interval on the mean window Sharpe
    pub sharpe_ci: (f64, f64),
    /// Fraction of windows with Sharpe > 0
    pub consistency: f64,
    /// Worst window drawdown (positive fraction)
    pub worst_drawdown: f64,
    pub total_trades: u64,
    /// Raw one-sided p-value against the zero-skill null
    pub p_value: f64,
    /// Corrected p-value (family = validations in the definition lineage)
    pub p_adjusted: f64,
    pub family_size: usize,
    pub correction: Correction,
    /// Cohen's d of window Sharpes against zero
    pub effect_size: f64,
    pub per_regime: Vec<RegimePerformance>,
    /// Seed used for bootstrap resampling, recorded for reproducibility
    pub bootstrap_seed: u64,
}

/// A successful window's contribution to validation.
#[derive(Debug, Clone)]
pub struct WindowSample {
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub trade_count: u64,
    pub regime: RegimeTag,
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sample_std(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64).sqrt()
}

/// Seeded bootstrap confidence interval on the mean.
pub fn bootstrap_ci(xs: &[f64], resamples: usize, seed: u64, level: f64) -> (f64, f64) {
    if xs.is_empty() {
        return (0.0, 0.0);
    }
    if xs.len() == 1 {
        return (xs[0], xs[0]);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut means = Vec::with_capacity(resamples);
    for _ in 0..resamples {
        let total: f64 = (0..xs.len())
            .map(|_| xs[rng.gen_range(0..xs.len())])
            .sum();
        means.push(total / xs.len() as f64);
    }
    means.sort_by(|a, b| a.total_cmp(b));

    let alpha = (1.0 - level) / 2.0;
    let lo = ((means.len() as f64 - 1.0) * alpha).round() as usize;
    let hi = ((means.len() as f64 - 1.0) * (1.0 - alpha)).round() as usize;
    (means[lo], means[hi])
}

/// One-sided p-value for mean(xs) > 0 under a Student-t null.
pub fn zero_skill_p_value(xs: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return 1.0;
    }
    let sd = sample_std(xs);
    if sd == 0.0 {
        // Degenerate sample: all windows identical
        return if mean(xs) > 0.0 { 0.0 } else { 1.0 };
    }
    let t = mean(xs) / (sd / (n as f64).sqrt());
    let dist = match StudentsT::new(0.0, 1.0, (n - 1) as f64) {
        Ok(d) => d,
        Err(_) => return 1.0,
    };
    1.0 - dist.cdf(t)
}

/// Adjust the newest raw p-value against its validation family.
///
/// `family_raw` holds the raw p-values of earlier validations in the same
/// definition lineage; the family size is `family_raw.len() + 1`. For FDR
/// the Benjamini-Hochberg step-up adjustment is computed over the whole
/// family and the adjusted value of the newest entry returned.
pub fn adjust_p_value(raw: f64, family_raw: &[f64], correction: Correction) -> f64 {
    let m = family_raw.len() + 1;
    match correction {
        Correction::Bonferroni => (raw * m as f64).min(1.0),
        Correction::Fdr => {
            let mut all: Vec<(usize, f64)> = family_raw
                .iter()
                .copied()
                .chain(std::iter::once(raw))
                .enumerate()
                .collect();
            all.sort_by(|a, b| a.1.total_cmp(&b.1));

            // Step-up: adjusted_i = min over j >= i of p_j * m / rank_j
            let mut adjusted = vec![0.0_f64; m];
            let mut running = 1.0_f64;
            for rank in (1..=m).rev() {
                let (orig_idx, p) = all[rank - 1];
                running = running.min(p * m as f64 / rank as f64);
                adjusted[orig_idx] = running.min(1.0);
            }
            adjusted[m - 1]
        }
    }
}

fn regime_groups(samples: &[WindowSample]) -> Vec<RegimePerformance> {
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for s in samples {
        let keys = [
            format!("direction={}", s.regime.direction),
            format!("volatility={}", s.regime.volatility),
            format!("rates={}", s.regime.rates),
            format!("sector={}", s.regime.sector),
            format!("cap={}", s.regime.cap),
        ];
        for key in keys {
            groups.entry(key).or_default().push(s.sharpe);
        }
    }

    groups
        .into_iter()
        .map(|(regime, sharpes)| RegimePerformance {
            window_count: sharpes.len(),
            mean_sharpe: mean(&sharpes),
            consistency: sharpes.iter().filter(|s| **s > 0.0).count() as f64
                / sharpes.len() as f64,
            regime,
        })
        .collect()
}

/// Statistical validator: aggregates windows and applies the gates.
#[derive(Debug, Clone)]
pub struct StatisticalValidator {
    gates: GateConfig,
    stats: StatsConfig,
}

/// Everything the validator produces for the validation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub aggregate: AggregateMetrics,
    pub gate_results: Vec<GateResult>,
    pub verdict: Verdict,
}

impl StatisticalValidator {
    pub fn new(gates: GateConfig, stats: StatsConfig) -> Self {
        Self { gates, stats }
    }

    /// Evaluate all windows of a validation.
    ///
    /// `family_raw_p` holds raw p-values of earlier validations in the same
    /// definition lineage, for the multiple-testing family.
    pub fn evaluate(&self, samples: &[WindowSample], family_raw_p: &[f64]) -> ValidationOutcome {
        let sharpes: Vec<f64> = samples.iter().map(|s| s.sharpe).collect();
        let mean_sharpe = mean(&sharpes);
        let consistency = if sharpes.is_empty() {
            0.0
        } else {
            sharpes.iter().filter(|s| **s > 0.0).count() as f64 / sharpes.len() as f64
        };
        let worst_drawdown = samples
            .iter()
            .map(|s| s.max_drawdown)
            .fold(0.0_f64, f64::max);
        let total_trades: u64 = samples.iter().map(|s| s.trade_count).sum();

        let p_value = zero_skill_p_value(&sharpes);
        let p_adjusted = adjust_p_value(p_value, family_raw_p, self.gates.correction);
        let sd = sample_std(&sharpes);
        let effect_size = if sd == 0.0 { 0.0 } else { mean_sharpe / sd };

        let aggregate = AggregateMetrics {
            window_count: samples.len(),
            mean_sharpe,
            sharpe_ci: bootstrap_ci(
                &sharpes,
                self.stats.bootstrap_resamples,
                self.stats.bootstrap_seed,
                0.95,
            ),
            consistency,
            worst_drawdown,
            total_trades,
            p_value,
            p_adjusted,
            family_size: family_raw_p.len() + 1,
            correction: self.gates.correction,
            effect_size,
            per_regime: regime_groups(samples),
            bootstrap_seed: self.stats.bootstrap_seed,
        };

        let gate_results = vec![
            GateResult::new(
                "min_sharpe",
                mean_sharpe >= self.gates.min_sharpe,
                mean_sharpe,
                self.gates.min_sharpe,
            ),
            GateResult::new(
                "min_consistency",
                consistency >= self.gates.min_consistency,
                consistency,
                self.gates.min_consistency,
            ),
            GateResult::new(
                "max_drawdown",
                worst_drawdown <= self.gates.max_drawdown,
                worst_drawdown,
                self.gates.max_drawdown,
            ),
            GateResult::new(
                "min_trades",
                total_trades >= self.gates.min_trades,
                total_trades as f64,
                self.gates.min_trades as f64,
            ),
            GateResult::new(
                "adjusted_p",
                p_adjusted < self.gates.adjusted_alpha,
                p_adjusted,
                self.gates.adjusted_alpha,
            ),
        ];

        let verdict = self.verdict(&aggregate, &gate_results);
        ValidationOutcome {
            aggregate,
            gate_results,
            verdict,
        }
    }

    fn verdict(&self, aggregate: &AggregateMetrics, gates: &[GateResult]) -> Verdict {
        if gates.iter().all(|g| g.passed) {
            return Verdict::Validated;
        }

        // Regime-conditional pass: performance gates hold inside some regime
        // group even though they fail overall. The sample-size gate still
        // binds; overall-skill gates do not, since a regime-dependent edge
        // fails them by construction.
        let stats_ok = gates
            .iter()
            .filter(|g| g.name == "min_trades")
            .all(|g| g.passed);
        if stats_ok {
            let passing: Vec<String> = aggregate
                .per_regime
                .iter()
                .filter(|r| {
                    r.window_count >= 2
                        && r.mean_sharpe >= self.gates.min_sharpe
                        && r.consistency >= self.gates.min_consistency
                })
                .map(|r| r.regime.clone())
                .collect();
            if !passing.is_empty() {
                return Verdict::Conditional { regimes: passing };
            }
        }

        Verdict::Invalidated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::{CapLeadership, Direction, Rates, Volatility};
    use pretty_assertions::assert_eq;

    fn tag(direction: Direction) -> RegimeTag {
        RegimeTag {
            direction,
            volatility: Volatility::Normal,
            rates: Rates::Flat,
            sector: "technology".to_string(),
            cap: CapLeadership::Mixed,
        }
    }

    fn sample(sharpe: f64, direction: Direction) -> WindowSample {
        WindowSample {
            sharpe,
            max_drawdown: 0.10,
            trade_count: 50,
            regime: tag(direction),
        }
    }

    fn validator() -> StatisticalValidator {
        StatisticalValidator::new(GateConfig::default(), StatsConfig::default())
    }

    #[test]
    fn test_bootstrap_ci_is_deterministic() {
        let xs = vec![0.5, 1.2, 0.8, -0.1, 0.9, 1.5, 0.3, 0.7];
        let a = bootstrap_ci(&xs, 2000, 7, 0.95);
        let b = bootstrap_ci(&xs, 2000, 7, 0.95);
        assert_eq!(a, b);
        assert!(a.0 < a.1);
        assert!(a.0 < mean(&xs) && mean(&xs) < a.1);
    }

    #[test]
    fn test_p_value_strong_vs_weak() {
        let strong = vec![1.0, 1.2, 0.9, 1.1, 1.3, 0.8, 1.0, 1.2, 1.1, 0.9, 1.0, 1.1];
        let weak = vec![0.1, -0.2, 0.3, -0.1, 0.0, 0.2, -0.3, 0.1, -0.1, 0.2, 0.0, -0.2];
        assert!(zero_skill_p_value(&strong) < 0.001);
        assert!(zero_skill_p_value(&weak) > 0.1);
    }

    #[test]
    fn test_bonferroni_scales_by_family() {
        let adjusted = adjust_p_value(0.01, &[0.2, 0.3], Correction::Bonferroni);
        assert!((adjusted - 0.03).abs() < 1e-12);
        assert_eq!(adjust_p_value(0.9, &[0.5], Correction::Bonferroni), 1.0);
    }

    #[test]
    fn test_fdr_never_exceeds_bonferroni() {
        let family = vec![0.04, 0.20, 0.50];
        let raw = 0.01;
        let fdr = adjust_p_value(raw, &family, Correction::Fdr);
        let bonf = adjust_p_value(raw, &family, Correction::Bonferroni);
        assert!(fdr <= bonf + 1e-12);
        assert!(fdr >= raw);
    }

    #[test]
    fn test_fdr_singleton_family_is_identity() {
        let raw = 0.037;
        assert!((adjust_p_value(raw, &[], Correction::Fdr) - raw).abs() < 1e-12);
    }

    #[test]
    fn test_validated_verdict() {
        let samples: Vec<WindowSample> = (0..12)
            .map(|i| sample(0.9 + 0.05 * (i % 3) as f64, Direction::Bull))
            .collect();
        let outcome = validator().evaluate(&samples, &[]);
        assert_eq!(outcome.verdict, Verdict::Validated);
        assert!(outcome.aggregate.consistency > 0.99);
        assert_eq!(outcome.aggregate.total_trades, 600);
    }

    #[test]
    fn test_invalidated_verdict() {
        let samples: Vec<WindowSample> = (0..12)
            .map(|i| sample(if i % 2 == 0 { 0.2 } else { -0.4 }, Direction::Bull))
            .collect();
        let outcome = validator().evaluate(&samples, &[]);
        assert_eq!(outcome.verdict, Verdict::Invalidated);
        assert!(!outcome.gate_results.iter().all(|g| g.passed));
    }

    #[test]
    fn test_conditional_verdict_records_regimes() {
        // Strong in bull windows, flat-to-negative in bear windows.
        let mut samples = Vec::new();
        for _ in 0..6 {
            samples.push(sample(1.4, Direction::Bull));
        }
        for _ in 0..6 {
            samples.push(sample(-0.6, Direction::Bear));
        }
        let outcome = validator().evaluate(&samples, &[]);
        match outcome.verdict {
            Verdict::Conditional { ref regimes } => {
                assert!(regimes.contains(&"direction=bull".to_string()));
                assert!(!regimes.contains(&"direction=bear".to_string()));
            }
            other => panic!("expected CONDITIONAL, got {other:?}"),
        }
    }

    #[test]
    fn test_regime_grouping_counts() {
        let samples = vec![
            sample(1.0, Direction::Bull),
            sample(0.5, Direction::Bull),
            sample(-0.2, Direction::Bear),
        ];
        let groups = regime_groups(&samples);
        let bull = groups
            .iter()
            .find(|g| g.regime == "direction=bull")
            .unwrap();
        assert_eq!(bull.window_count, 2);
        assert!((bull.mean_sharpe - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_empty_samples_invalidate() {
        let outcome = validator().evaluate(&[], &[]);
        assert_eq!(outcome.verdict, Verdict::Invalidated);
        assert_eq!(outcome.aggregate.p_value, 1.0);
    }
}
