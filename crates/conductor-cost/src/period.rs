//! Billing periods
//!
//! Estimates and invoices are kept per calendar month. Periods come in as
//! "YYYY.MM" strings from query parameters.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{CostError, CostResult};

/// A calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    /// Year
    pub year: i32,
    /// Month, 1..=12
    pub month: u32,
}

impl YearMonth {
    /// Create a period, validating the month.
    pub fn new(year: i32, month: u32) -> CostResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(CostError::InvalidMonth);
        }
        Ok(Self { year, month })
    }

    /// Period containing the given date.
    pub fn of(date: impl Datelike) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Number of days in the month.
    pub fn days(&self) -> u32 {
        days_in_month(self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = CostError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || CostError::InvalidYearMonth(value.to_string());
        let (year, month) = value.split_once('.').ok_or_else(invalid)?;
        let year = year.trim().parse::<i32>().map_err(|_| invalid())?;
        let month = month.trim().parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.year, self.month)
    }
}

/// Inclusive range of months, open on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct YearMonthRange {
    /// First month
    pub start: Option<YearMonth>,
    /// Last month
    pub end: Option<YearMonth>,
}

impl YearMonthRange {
    /// Create a range. When both bounds are set, start must come first.
    pub fn new(start: Option<YearMonth>, end: Option<YearMonth>) -> CostResult<Self> {
        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                return Err(CostError::InvalidRange);
            }
        }
        Ok(Self { start, end })
    }

    /// Parse a range from optional "YYYY.MM" bounds.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> CostResult<Self> {
        let start = start.map(str::parse).transpose()?;
        let end = end.map(str::parse).transpose()?;
        Self::new(start, end)
    }

    /// Whether the month falls within the range.
    pub fn contains(&self, period: YearMonth) -> bool {
        self.start.map_or(true, |start| start <= period) && self.end.map_or(true, |end| period <= end)
    }
}

/// Days in a calendar month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(first), Some(next)) => (next - first).num_days() as u32,
        _ => 30,
    }
}

/// Hours in the month of the given date.
pub fn hours_in_month(date: impl Datelike) -> u32 {
    days_in_month(date.year(), date.month()) * 24
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse() {
        let period: YearMonth = "2015.07".parse().unwrap();
        assert_eq!(period, YearMonth { year: 2015, month: 7 });
        assert_eq!(period.to_string(), "2015.07");

        assert!(matches!("2015-07".parse::<YearMonth>(), Err(CostError::InvalidYearMonth(_))));
        assert!(matches!("July".parse::<YearMonth>(), Err(CostError::InvalidYearMonth(_))));
        assert!(matches!("2015.13".parse::<YearMonth>(), Err(CostError::InvalidMonth)));
        assert!(matches!("2015.0".parse::<YearMonth>(), Err(CostError::InvalidMonth)));
    }

    #[test]
    fn test_range() {
        let range = YearMonthRange::parse(Some("2015.01"), Some("2015.06")).unwrap();
        assert!(range.contains(YearMonth::new(2015, 1).unwrap()));
        assert!(range.contains(YearMonth::new(2015, 6).unwrap()));
        assert!(!range.contains(YearMonth::new(2015, 7).unwrap()));

        let open = YearMonthRange::parse(Some("2015.01"), None).unwrap();
        assert!(open.contains(YearMonth::new(2030, 1).unwrap()));
        assert!(!open.contains(YearMonth::new(2014, 12).unwrap()));

        let err = YearMonthRange::parse(Some("2015.06"), Some("2015.06")).unwrap_err();
        assert_eq!(err.to_string(), "Start has to be earlier than end.");
    }

    #[test]
    fn test_hours_in_month() {
        assert_eq!(days_in_month(2016, 2), 29);
        assert_eq!(days_in_month(2015, 2), 28);
        assert_eq!(days_in_month(2015, 12), 31);
        assert_eq!(hours_in_month(Utc.with_ymd_and_hms(2015, 4, 10, 0, 0, 0).unwrap()), 720);
    }
}
