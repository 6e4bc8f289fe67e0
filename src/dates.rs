//! Calendar-date partitioning for search query windows
//!
//! GitHub search caps every query at 1000 results, so a date range is split
//! into single-day windows and each day is queried on its own.

use chrono::NaiveDate;
use thiserror::Error;

/// A date bound that failed to parse as `YYYY-MM-DD`
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid date '{0}': expected YYYY-MM-DD")]
pub struct InvalidRange(pub String);

/// Lazy sequence of calendar days, ascending and inclusive of both bounds
///
/// Cloning the range restarts it from the first day.
#[derive(Debug, Clone)]
pub struct DateRange {
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl DateRange {
    /// Parse both bounds; `start > end` is a valid empty range, not an error
    pub fn new(start: &str, end: &str) -> Result<Self, InvalidRange> {
        let start = parse_day(start)?;
        let end = parse_day(end)?;
        Ok(Self {
            next: Some(start),
            end,
        })
    }
}

impl Iterator for DateRange {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next?;
        if current > self.end {
            return None;
        }
        // Calendar-day increment, so DST shifts can never skip or repeat a day
        self.next = current.succ_opt();
        Some(current)
    }
}

fn parse_day(input: &str) -> Result<NaiveDate, InvalidRange> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|_| InvalidRange(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(start: &str, end: &str) -> Vec<String> {
        DateRange::new(start, end)
            .unwrap()
            .map(|d| d.to_string())
            .collect()
    }

    #[test]
    fn test_two_day_range() {
        assert_eq!(
            collect("2015-01-01", "2015-01-02"),
            vec!["2015-01-01", "2015-01-02"]
        );
    }

    #[test]
    fn test_single_day_range() {
        assert_eq!(collect("2015-01-01", "2015-01-01"), vec!["2015-01-01"]);
    }

    #[test]
    fn test_leap_day_is_included() {
        assert_eq!(
            collect("2020-02-28", "2020-03-01"),
            vec!["2020-02-28", "2020-02-29", "2020-03-01"]
        );
    }

    #[test]
    fn test_non_leap_february() {
        assert_eq!(
            collect("2019-02-28", "2019-03-01"),
            vec!["2019-02-28", "2019-03-01"]
        );
    }

    #[test]
    fn test_start_after_end_is_empty() {
        assert!(collect("2015-01-02", "2015-01-01").is_empty());
    }

    #[test]
    fn test_length_matches_day_span() {
        // 31 days of January plus the first of February
        let days = collect("2015-01-01", "2015-02-01");
        assert_eq!(days.len(), 32);
    }

    #[test]
    fn test_ascending_and_duplicate_free() {
        let days = collect("2016-12-28", "2017-01-03");
        let mut sorted = days.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(days, sorted);
        assert_eq!(days.first().map(String::as_str), Some("2016-12-28"));
        assert_eq!(days.last().map(String::as_str), Some("2017-01-03"));
    }

    #[test]
    fn test_clone_restarts_the_sequence() {
        let range = DateRange::new("2015-01-01", "2015-01-03").unwrap();
        let first: Vec<_> = range.clone().collect();
        let second: Vec<_> = range.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_bounds_are_rejected() {
        assert!(DateRange::new("2015-01-01", "not-a-date").is_err());
        assert!(DateRange::new("2015-02-30", "2015-03-01").is_err());
        assert!(DateRange::new("2015-13-01", "2015-13-02").is_err());
        assert_eq!(
            DateRange::new("garbage", "2015-01-02").unwrap_err(),
            InvalidRange("garbage".to_string())
        );
    }
}
