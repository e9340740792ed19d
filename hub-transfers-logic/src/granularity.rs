use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A point in time together with the start of every calendar bucket it
/// falls into, all as UTC epoch milliseconds. Weeks start on Sunday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Granularity {
    #[serde(default)]
    pub ms: i64,
    #[serde(default)]
    pub hour: i64,
    #[serde(default)]
    pub day: i64,
    #[serde(default)]
    pub week: i64,
    #[serde(default)]
    pub month: i64,
    #[serde(default)]
    pub quarter: i64,
    #[serde(default)]
    pub year: i64,
}

impl Granularity {
    pub fn from_millis(ms: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(ms).single().map(Self::from_datetime)
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        let date = time.date_naive();
        let week_start =
            date - chrono::Days::new(u64::from(date.weekday().num_days_from_sunday()));
        let quarter_month = (date.month0() / 3) * 3 + 1;

        Self {
            ms: time.timestamp_millis(),
            hour: start_of_day(date) + i64::from(time.hour()) * 3_600_000,
            day: start_of_day(date),
            week: start_of_day(week_start),
            month: start_of_month(date.year(), date.month()),
            quarter: start_of_month(date.year(), quarter_month),
            year: start_of_month(date.year(), 1),
        }
    }
}

fn start_of_day(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

fn start_of_month(year: i32, month: u32) -> i64 {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(start_of_day)
        .unwrap_or_default()
}
