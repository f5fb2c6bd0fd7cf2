//! Column conversions shared by the repositories. SQLite hands every integer
//! back as `i64` and every timestamp as RFC 3339 text.

use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

/// `LIMIT` parameter for a row count.
pub fn row_limit(limit: usize) -> Result<i64> {
    i64::try_from(limit).map_err(|_| anyhow!("row limit {limit} exceeds SQLite INTEGER range"))
}

/// Narrows a stored integer into the unsigned type of a domain field,
/// rejecting negatives and overflow instead of truncating.
pub fn from_column<T: TryFrom<i64>>(value: i64, field: &str) -> Result<T> {
    T::try_from(value).map_err(|_| anyhow!("{field} holds out-of-range value {value}"))
}

pub fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field} '{value}'"))
}

/// `MIN`/`MAX` over an empty table yield NULL.
pub fn parse_optional_timestamp(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|raw| parse_timestamp(&raw, field)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_rejects_values_outside_the_field() {
        assert_eq!(from_column::<u8>(5, "urgency").unwrap(), 5);
        assert!(from_column::<u8>(300, "urgency").is_err());
        assert!(from_column::<u32>(-1, "accelerations").is_err());
        assert!(to_i64(u64::MAX).is_err());
    }

    #[test]
    fn timestamps_normalise_to_utc() {
        let parsed = parse_timestamp("2024-03-01T10:00:00+02:00", "ts").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T08:00:00+00:00");
        assert!(parse_timestamp("yesterday", "ts").is_err());
        assert_eq!(parse_optional_timestamp(None, "ts").unwrap(), None);
    }
}
