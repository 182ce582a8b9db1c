use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, Utc};

const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// This is the standard way of converting a date to a string in focuslog. Lexicographic order of
/// the keys matches chronological order, which the storage layer relies on.
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn parse_date_key(key: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(key, DATE_KEY_FORMAT)
        .with_context(|| format!("Invalid date key {key:?}"))
}

/// Local calendar date of an instant.
pub fn local_date_of(moment: DateTime<Utc>) -> NaiveDate {
    moment.with_timezone(&Local).date_naive()
}

/// `date` moved back by `days` calendar days.
pub fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date - Duration::days(days as i64)
}
