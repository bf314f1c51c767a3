//! Hourly partition keys shared by the storage layout and the tables.

use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `(year, month, day, hour)` as zero-padded strings (4/2/2/2 digits).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub year: String,
    pub month: String,
    pub day: String,
    pub hour: String,
}

impl PartitionKey {
    /// Build from already fixed-width digit strings, e.g. regex captures.
    pub fn new(
        year: impl Into<String>,
        month: impl Into<String>,
        day: impl Into<String>,
        hour: impl Into<String>,
    ) -> Self {
        Self {
            year: year.into(),
            month: month.into(),
            day: day.into(),
            hour: hour.into(),
        }
    }

    /// UTC calendar hour containing `instant`.
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        Self {
            year: format!("{:04}", instant.year()),
            month: format!("{:02}", instant.month()),
            day: format!("{:02}", instant.day()),
            hour: format!("{:02}", instant.hour()),
        }
    }

    /// Partition of the window that ended `lag` before `now`.
    pub fn trailing(now: DateTime<Utc>, lag: TimeDelta) -> Self {
        Self::from_instant(now - lag)
    }

    /// Path segment `year=Y/month=M/day=D/hour=H`.
    pub fn path(&self) -> String {
        format!(
            "year={}/month={}/day={}/hour={}",
            self.year, self.month, self.day, self.hour
        )
    }

    /// Values bound to the `year`, `month`, `day`, `hour` predicates, in order.
    pub fn values(&self) -> [&str; 4] {
        [&self.year, &self.month, &self.day, &self.hour]
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn trailing_window_crosses_midnight() {
        let now = Utc.with_ymd_and_hms(2023, 6, 15, 1, 10, 0).unwrap();
        let key = PartitionKey::trailing(now, TimeDelta::hours(2));
        assert_eq!(key, PartitionKey::new("2023", "06", "14", "23"));
    }

    #[test]
    fn trailing_window_crosses_year() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 59, 59).unwrap();
        let key = PartitionKey::trailing(now, TimeDelta::hours(2));
        assert_eq!(key, PartitionKey::new("2023", "12", "31", "22"));
    }

    #[test]
    fn zero_padding_and_path() {
        let now = Utc.with_ymd_and_hms(987, 3, 2, 4, 0, 0).unwrap();
        let key = PartitionKey::from_instant(now);
        assert_eq!(key.path(), "year=0987/month=03/day=02/hour=04");
        assert_eq!(key.values(), ["0987", "03", "02", "04"]);
    }
}
