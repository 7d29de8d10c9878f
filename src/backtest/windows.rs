//! Walk-forward window planning.
//!
//! Time is sliced into N calendar-aligned windows counting back from an
//! anchor year. The default plan is 12 non-overlapping 3-year windows; a
//! smaller step yields rolling overlapped windows when a study asks for
//! them.

use chrono::NaiveDate;

use crate::backtest::backend::DateRange;
use crate::error::{Error, Result};

/// Plan `count` windows of `span_years`, stepping `step_years` between
/// window starts, with the last window ending on Dec 31 of
/// `anchor_year - 1`. Windows are returned oldest first.
pub fn plan_windows(
    anchor_year: i32,
    count: usize,
    span_years: u32,
    step_years: u32,
) -> Result<Vec<DateRange>> {
    if count == 0 || span_years == 0 || step_years == 0 {
        return Err(Error::Config(
            "window count, span, and step must all be positive".to_string(),
        ));
    }

    let last_end_year = anchor_year - 1;
    let mut windows = Vec::with_capacity(count);
    for i in 0..count {
        // Index 0 is the oldest window.
        let offset = (count - 1 - i) as i32 * step_years as i32;
        let end_year = last_end_year - offset;
        let start_year = end_year - span_years as i32 + 1;
        let start = NaiveDate::from_ymd_opt(start_year, 1, 1)
            .ok_or_else(|| Error::Config(format!("bad window start year {start_year}")))?;
        let end = NaiveDate::from_ymd_opt(end_year, 12, 31)
            .ok_or_else(|| Error::Config(format!("bad window end year {end_year}")))?;
        windows.push(DateRange::new(start, end));
    }
    Ok(windows)
}

/// Non-overlapping plan: step equals span.
pub fn plan_non_overlapping(
    anchor_year: i32,
    count: usize,
    span_years: u32,
) -> Result<Vec<DateRange>> {
    plan_windows(anchor_year, count, span_years, span_years)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_plan_is_twelve_three_year_windows() {
        let windows = plan_non_overlapping(2024, 12, 3).unwrap();
        assert_eq!(windows.len(), 12);

        let first = windows.first().unwrap();
        let last = windows.last().unwrap();
        assert_eq!(first.start, NaiveDate::from_ymd_opt(1988, 1, 1).unwrap());
        assert_eq!(first.end, NaiveDate::from_ymd_opt(1990, 12, 31).unwrap());
        assert_eq!(last.start, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_eq!(last.end, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn test_windows_do_not_overlap() {
        let windows = plan_non_overlapping(2024, 12, 3).unwrap();
        for pair in windows.windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
    }

    #[test]
    fn test_windows_are_calendar_aligned() {
        for window in plan_non_overlapping(2024, 12, 3).unwrap() {
            assert_eq!(window.start.format("%m-%d").to_string(), "01-01");
            assert_eq!(window.end.format("%m-%d").to_string(), "12-31");
        }
    }

    #[test]
    fn test_rolling_plan_overlaps_by_step() {
        let windows = plan_windows(2024, 5, 3, 1).unwrap();
        assert_eq!(windows.len(), 5);
        // Consecutive starts differ by one year, spans still three
        for pair in windows.windows(2) {
            assert_eq!(pair[1].start.format("%Y").to_string().parse::<i32>().unwrap(),
                pair[0].start.format("%Y").to_string().parse::<i32>().unwrap() + 1);
        }
    }

    #[test]
    fn test_zero_counts_rejected() {
        assert!(plan_windows(2024, 0, 3, 3).is_err());
        assert!(plan_windows(2024, 12, 0, 3).is_err());
        assert!(plan_windows(2024, 12, 3, 0).is_err());
    }
}
