//! Market regime tagging for walk-forward windows.
//!
//! Each window is labeled independently across five orthogonal dimensions
//! computed from reference indicator series over the window's full date
//! range. Thresholds are fixed; given the same reference data the tag is
//! always recomputable.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Broad-market direction over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bull,
    Bear,
    Sideways,
}

/// Implied-volatility regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    Low,
    Normal,
    High,
}

/// Rate environment from the 10y treasury six-month change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rates {
    Rising,
    Falling,
    Flat,
}

/// Small-cap vs broad-market leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapLeadership {
    Small,
    Large,
    Mixed,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "bull"),
            Self::Bear => write!(f, "bear"),
            Self::Sideways => write!(f, "sideways"),
        }
    }
}

impl std::fmt::Display for Volatility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::fmt::Display for Rates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Falling => write!(f, "falling"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

impl std::fmt::Display for CapLeadership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Large => write!(f, "large"),
            Self::Mixed => write!(f, "mixed"),
        }
    }
}

/// Five-dimension regime label for one walk-forward window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegimeTag {
    pub direction: Direction,
    pub volatility: Volatility,
    pub rates: Rates,
    /// Best 3-month trailing sector at the window end
    pub sector: String,
    pub cap: CapLeadership,
}

impl std::fmt::Display for RegimeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.direction, self.volatility, self.rates, self.sector, self.cap
        )
    }
}

/// One dated observation of the reference indicators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub date: NaiveDate,
    /// Broad-equity proxy close
    pub broad_close: f64,
    /// 200-day simple moving average of the proxy
    pub broad_sma_200: f64,
    /// Implied-volatility index level
    pub implied_vol: f64,
    /// 10-year treasury yield in percent
    pub treasury_10y: f64,
    /// Small-cap proxy close
    pub small_cap_close: f64,
}

/// Reference indicator series the tagger reads.
///
/// Points must be sorted by date. Sector closes are keyed by sector name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceSeries {
    pub points: Vec<ReferencePoint>,
    pub sector_closes: BTreeMap<String, Vec<(NaiveDate, f64)>>,
}

impl ReferenceSeries {
    fn slice(&self, start: NaiveDate, end: NaiveDate) -> Vec<&ReferencePoint> {
        self.points
            .iter()
            .filter(|p| p.date >= start && p.date <= end)
            .collect()
    }

    fn last_at_or_before(&self, date: NaiveDate) -> Option<&ReferencePoint> {
        self.points.iter().rev().find(|p| p.date <= date)
    }

    fn sector_close_at_or_before(&self, sector: &str, date: NaiveDate) -> Option<f64> {
        self.sector_closes
            .get(sector)?
            .iter()
            .rev()
            .find(|(d, _)| *d <= date)
            .map(|(_, c)| *c)
    }
}

/// Fixed tagging thresholds.
///
/// These mirror the documented design and are not configuration: changing
/// them silently re-labels historical windows.
mod thresholds {
    /// Direction premium over the 200-day SMA (fraction)
    pub const DIRECTION_BAND: f64 = 0.05;
    /// Implied-vol boundaries
    pub const VOL_LOW: f64 = 15.0;
    pub const VOL_HIGH: f64 = 25.0;
    /// Six-month 10y change in percentage points
    pub const RATES_BAND: f64 = 0.50;
    /// Small-vs-broad 3-month relative return (fraction)
    pub const CAP_BAND: f64 = 0.05;
    /// Trailing window for sector and cap leadership
    pub const LEADERSHIP_MONTHS: u32 = 3;
    /// Trailing window for the rate change
    pub const RATES_MONTHS: u32 = 6;
}

/// Deterministic regime tagger over a reference series.
#[derive(Debug, Clone)]
pub struct RegimeTagger {
    reference: ReferenceSeries,
}

impl RegimeTagger {
    pub fn new(reference: ReferenceSeries) -> Self {
        Self { reference }
    }

    /// Label one window from its full date range.
    pub fn tag(&self, start: NaiveDate, end: NaiveDate) -> Result<RegimeTag> {
        let points = self.reference.slice(start, end);
        if points.is_empty() {
            return Err(Error::Internal(format!(
                "no reference data between {start} and {end}"
            )));
        }

        Ok(RegimeTag {
            direction: self.direction(&points),
            volatility: self.volatility(&points),
            rates: self.rates(end)?,
            sector: self.best_sector(end)?,
            cap: self.cap_leadership(end)?,
        })
    }

    fn direction(&self, points: &[&ReferencePoint]) -> Direction {
        let premium: f64 = points
            .iter()
            .map(|p| p.broad_close / p.broad_sma_200 - 1.0)
            .sum::<f64>()
            / points.len() as f64;

        if premium > thresholds::DIRECTION_BAND {
            Direction::Bull
        } else if premium < -thresholds::DIRECTION_BAND {
            Direction::Bear
        } else {
            Direction::Sideways
        }
    }

    fn volatility(&self, points: &[&ReferencePoint]) -> Volatility {
        let mean_vol: f64 =
            points.iter().map(|p| p.implied_vol).sum::<f64>() / points.len() as f64;

        if mean_vol < thresholds::VOL_LOW {
            Volatility::Low
        } else if mean_vol > thresholds::VOL_HIGH {
            Volatility::High
        } else {
            Volatility::Normal
        }
    }

    fn rates(&self, end: NaiveDate) -> Result<Rates> {
        let lookback = end
            .checked_sub_months(Months::new(thresholds::RATES_MONTHS))
            .ok_or_else(|| Error::Internal("rate lookback underflow".to_string()))?;

        let now = self
            .reference
            .last_at_or_before(end)
            .ok_or_else(|| Error::Internal(format!("no reference data at {end}")))?;
        let then = self
            .reference
            .last_at_or_before(lookback)
            .ok_or_else(|| Error::Internal(format!("no reference data at {lookback}")))?;

        let change = now.treasury_10y - then.treasury_10y;
        Ok(if change > thresholds::RATES_BAND {
            Rates::Rising
        } else if change < -thresholds::RATES_BAND {
            Rates::Falling
        } else {
            Rates::Flat
        })
    }

    fn best_sector(&self, end: NaiveDate) -> Result<String> {
        let lookback = end
            .checked_sub_months(Months::new(thresholds::LEADERSHIP_MONTHS))
            .ok_or_else(|| Error::Internal("sector lookback underflow".to_string()))?;

        let mut best: Option<(&str, f64)> = None;
        for sector in self.reference.sector_closes.keys() {
            let now = self.reference.sector_close_at_or_before(sector, end);
            let then = self.reference.sector_close_at_or_before(sector, lookback);
            if let (Some(now), Some(then)) = (now, then) {
                if then > 0.0 {
                    let ret = now / then - 1.0;
                    // BTreeMap iteration order makes ties deterministic
                    if best.map_or(true, |(_, r)| ret > r) {
                        best = Some((sector, ret));
                    }
                }
            }
        }

        best.map(|(name, _)| name.to_string())
            .ok_or_else(|| Error::Internal(format!("no sector data at {end}")))
    }

    fn cap_leadership(&self, end: NaiveDate) -> Result<CapLeadership> {
        let lookback = end
            .checked_sub_months(Months::new(thresholds::LEADERSHIP_MONTHS))
            .ok_or_else(|| Error::Internal("cap lookback underflow".to_string()))?;

        let now = self
            .reference
            .last_at_or_before(end)
            .ok_or_else(|| Error::Internal(format!("no reference data at {end}")))?;
        let then = self
            .reference
            .last_at_or_before(lookback)
            .ok_or_else(|| Error::Internal(format!("no reference data at {lookback}")))?;

        let small_ret = now.small_cap_close / then.small_cap_close - 1.0;
        let broad_ret = now.broad_close / then.broad_close - 1.0;
        let relative = small_ret - broad_ret;

        Ok(if relative > thresholds::CAP_BAND {
            CapLeadership::Small
        } else if relative < -thresholds::CAP_BAND {
            CapLeadership::Large
        } else {
            CapLeadership::Mixed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// A year of weekly reference points with controllable levels.
    fn series(
        premium: f64,
        vol: f64,
        yield_start: f64,
        yield_end: f64,
        small_extra: f64,
    ) -> ReferenceSeries {
        let start = date(2020, 1, 1);
        let mut points = Vec::new();
        let n = 52;
        for week in 0..n {
            let t = week as f64 / (n - 1) as f64;
            let d = start + chrono::Duration::weeks(week);
            let broad = 100.0 * (1.0 + 0.1 * t);
            points.push(ReferencePoint {
                date: d,
                broad_close: broad,
                broad_sma_200: broad / (1.0 + premium),
                implied_vol: vol,
                treasury_10y: yield_start + (yield_end - yield_start) * t,
                small_cap_close: broad * (1.0 + small_extra * t),
            });
        }

        let mut sector_closes = BTreeMap::new();
        for (name, growth) in [("energy", 0.02), ("technology", 0.30), ("utilities", 0.01)] {
            let closes = (0..n)
                .map(|week| {
                    let t = week as f64 / (n - 1) as f64;
                    (start + chrono::Duration::weeks(week), 50.0 * (1.0 + growth * t))
                })
                .collect();
            sector_closes.insert(name.to_string(), closes);
        }

        ReferenceSeries {
            points,
            sector_closes,
        }
    }

    #[test]
    fn test_bull_high_vol_rising_rates() {
        let tagger = RegimeTagger::new(series(0.08, 30.0, 1.0, 2.2, 0.0));
        let tag = tagger.tag(date(2020, 1, 1), date(2020, 12, 23)).unwrap();
        assert_eq!(tag.direction, Direction::Bull);
        assert_eq!(tag.volatility, Volatility::High);
        assert_eq!(tag.rates, Rates::Rising);
        assert_eq!(tag.sector, "technology");
        assert_eq!(tag.cap, CapLeadership::Mixed);
    }

    #[test]
    fn test_bear_low_vol_falling_rates_small_leads() {
        let tagger = RegimeTagger::new(series(-0.10, 12.0, 3.0, 1.5, 0.40));
        let tag = tagger.tag(date(2020, 1, 1), date(2020, 12, 23)).unwrap();
        assert_eq!(tag.direction, Direction::Bear);
        assert_eq!(tag.volatility, Volatility::Low);
        assert_eq!(tag.rates, Rates::Falling);
        assert_eq!(tag.cap, CapLeadership::Small);
    }

    #[test]
    fn test_sideways_normal_flat() {
        let tagger = RegimeTagger::new(series(0.01, 20.0, 2.0, 2.1, 0.0));
        let tag = tagger.tag(date(2020, 1, 1), date(2020, 12, 23)).unwrap();
        assert_eq!(tag.direction, Direction::Sideways);
        assert_eq!(tag.volatility, Volatility::Normal);
        assert_eq!(tag.rates, Rates::Flat);
    }

    #[test]
    fn test_tag_is_recomputable() {
        let tagger = RegimeTagger::new(series(0.08, 30.0, 1.0, 2.2, 0.0));
        let a = tagger.tag(date(2020, 1, 1), date(2020, 12, 23)).unwrap();
        let b = tagger.tag(date(2020, 1, 1), date(2020, 12, 23)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_window_is_an_error() {
        let tagger = RegimeTagger::new(series(0.0, 20.0, 2.0, 2.0, 0.0));
        assert!(tagger.tag(date(1990, 1, 1), date(1990, 12, 31)).is_err());
    }

    #[test]
    fn test_display_format() {
        let tag = RegimeTag {
            direction: Direction::Bull,
            volatility: Volatility::High,
            rates: Rates::Rising,
            sector: "technology".to_string(),
            cap: CapLeadership::Small,
        };
        assert_eq!(tag.to_string(), "bull/high/rising/technology/small");
    }
}
