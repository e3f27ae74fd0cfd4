// src/period.rs
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PeriodError {
    #[error("Invalid month '{0}', expected YYYY-MM")]
    InvalidMonth(String),
}

/// A calendar month used as the reporting period. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReportMonth {
    year: i32,
    month: u32,
    first_day: NaiveDate,
    last_day: NaiveDate,
}

impl ReportMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        let invalid = || PeriodError::InvalidMonth(format!("{:04}-{:02}", year, month));

        let first_day = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .and_then(|d| d.pred_opt())
            .ok_or_else(invalid)?;

        Ok(Self {
            year,
            month,
            first_day,
            last_day,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, PeriodError> {
        let raw = raw.trim();
        let invalid = || PeriodError::InvalidMonth(raw.to_string());

        let (year, month) = raw.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;

        Self::new(year, month).map_err(|_| invalid())
    }

    pub fn containing(date: NaiveDate) -> Self {
        // A date always lies in a valid month, so rebuild from its own fields.
        let first_day = date.with_day(1).unwrap_or(date);
        let next_first = if date.month() == 12 {
            NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
        };
        let last_day = next_first.and_then(|d| d.pred_opt()).unwrap_or(date);

        Self {
            year: date.year(),
            month: date.month(),
            first_day,
            last_day,
        }
    }

    pub fn current() -> Self {
        Self::containing(Local::now().date_naive())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn last_day(&self) -> NaiveDate {
        self.last_day
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.first_day && date <= self.last_day
    }

    /// Whole months from the join month to this month, floored at zero.
    pub fn working_months_since(&self, join_date: NaiveDate) -> u32 {
        let months = (self.year - join_date.year()) as i64 * 12
            + (self.month as i64 - join_date.month() as i64);
        months.max(0) as u32
    }
}

impl fmt::Display for ReportMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for ReportMonth {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ReportMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReportMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn parses_and_bounds_february_in_leap_year() {
        let month = ReportMonth::parse("2024-02").unwrap();
        assert_eq!(month.first_day(), d("2024-02-01"));
        assert_eq!(month.last_day(), d("2024-02-29"));
        assert_eq!(month.to_string(), "2024-02");
    }

    #[test]
    fn december_rolls_into_next_year() {
        let month = ReportMonth::parse("2023-12").unwrap();
        assert_eq!(month.last_day(), d("2023-12-31"));
    }

    #[test]
    fn rejects_malformed_months() {
        for raw in ["2024-13", "2024", "24-03", "2024-00", "abcd-ef", ""] {
            assert!(ReportMonth::parse(raw).is_err(), "expected '{}' to be rejected", raw);
        }
    }

    #[test]
    fn contains_is_inclusive() {
        let month = ReportMonth::parse("2024-03").unwrap();
        assert!(month.contains(d("2024-03-01")));
        assert!(month.contains(d("2024-03-31")));
        assert!(!month.contains(d("2024-04-01")));
        assert!(!month.contains(d("2024-02-29")));
    }

    #[test]
    fn working_months_floor_at_zero() {
        let month = ReportMonth::parse("2024-03").unwrap();
        assert_eq!(month.working_months_since(d("2023-01-20")), 14);
        assert_eq!(month.working_months_since(d("2024-03-15")), 0);
        assert_eq!(month.working_months_since(d("2024-06-01")), 0);
    }

    #[test]
    fn containing_matches_parse() {
        assert_eq!(
            ReportMonth::containing(d("2024-03-17")),
            ReportMonth::parse("2024-03").unwrap()
        );
    }
}
