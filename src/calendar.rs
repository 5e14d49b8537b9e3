//! ISO calendar-day arithmetic for ledger dates.

use chrono::{Days, NaiveDate};

use crate::error::ForecastError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Synthetic rows advance by one calendar day. Weekends and market holidays are
/// not skipped, so a Friday prediction lands on Saturday.
pub const CALENDAR_DAY_NOT_TRADING_DAY: &str = "CALENDAR_DAY_NOT_TRADING_DAY";

/// Strict `YYYY-MM-DD`: unpadded or padded-with-space forms are rejected so
/// that lexical order matches date order.
pub fn parse_date(date: &str) -> Result<NaiveDate, ForecastError> {
    NaiveDate::parse_from_str(date, DATE_FORMAT)
        .ok()
        .filter(|day| day.format(DATE_FORMAT).to_string() == date)
        .ok_or_else(|| ForecastError::InvalidDate(date.to_string()))
}

pub fn next_calendar_day(date: &str) -> Result<String, ForecastError> {
    let day = parse_date(date)?;
    let next = day
        .checked_add_days(Days::new(1))
        .ok_or_else(|| ForecastError::InvalidDate(date.to_string()))?;
    Ok(next.format(DATE_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_into_leap_day() {
        assert_eq!(next_calendar_day("2024-02-28").unwrap(), "2024-02-29");
        assert_eq!(next_calendar_day("2024-02-29").unwrap(), "2024-03-01");
        assert_eq!(next_calendar_day("2023-02-28").unwrap(), "2023-03-01");
    }

    #[test]
    fn rolls_over_year_end() {
        assert_eq!(next_calendar_day("2024-12-31").unwrap(), "2025-01-01");
    }

    #[test]
    fn weekends_are_not_skipped() {
        // 2024-03-01 is a Friday.
        assert_eq!(next_calendar_day("2024-03-01").unwrap(), "2024-03-02");
    }

    #[test]
    fn rejects_non_iso_input() {
        assert!(matches!(
            next_calendar_day("03/01/2024"),
            Err(ForecastError::InvalidDate(_))
        ));
        assert!(matches!(
            next_calendar_day("2024-02-30"),
            Err(ForecastError::InvalidDate(_))
        ));
    }

    #[test]
    fn rejects_unpadded_dates() {
        assert_eq!(
            parse_date("2024-1-9"),
            Err(ForecastError::InvalidDate("2024-1-9".to_string()))
        );
        assert!(parse_date(" 2024-01-09").is_err());
        assert!(parse_date("2024-01-09").is_ok());
    }
}
