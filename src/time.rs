//! Conversions between a caller's local calendar/wall-clock values and the
//! UTC instants everything is stored and compared as.

use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use chrono_tz::Tz;
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    Date(String),
    #[error("invalid time '{0}', expected HH:MM")]
    Time(String),
    #[error("unknown time zone '{0}'")]
    Zone(String),
}

pub fn parse_date(value: &str) -> Result<NaiveDate, TimeError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| TimeError::Date(value.to_string()))
}

pub fn parse_time(value: &str) -> Result<NaiveTime, TimeError> {
    NaiveTime::parse_from_str(value, TIME_FORMAT).map_err(|_| TimeError::Time(value.to_string()))
}

pub fn parse_zone(value: &str) -> Result<Tz, TimeError> {
    value
        .parse::<Tz>()
        .map_err(|_| TimeError::Zone(value.to_string()))
}

/// Resolves a wall-clock reading in `zone` to an absolute instant.
///
/// Ambiguous readings (clocks turned back) take the earlier instant. Readings
/// inside a DST gap are pushed forward by the length of the gap, the same way
/// a wall clock skips over it.
pub fn local_to_utc(zone: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match zone.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let before = zone
                .offset_from_utc_datetime(&(local - Duration::days(1)))
                .fix();
            Utc.from_utc_datetime(&(local - Duration::seconds(before.local_minus_utc().into())))
        }
    }
}

pub fn to_utc(date: NaiveDate, time: NaiveTime, zone: Tz) -> DateTime<Utc> {
    local_to_utc(zone, date.and_time(time))
}

pub fn day_start(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    local_to_utc(zone, date.and_time(NaiveTime::MIN))
}

/// Last millisecond of the local calendar day, so `[start, end]` is inclusive.
pub fn day_end(date: NaiveDate, zone: Tz) -> DateTime<Utc> {
    let next = date.succ_opt().unwrap_or(NaiveDate::MAX);
    day_start(next, zone) - Duration::milliseconds(1)
}

pub fn to_utc_instant(date: &str, time: &str, zone: Tz) -> Result<DateTime<Utc>, TimeError> {
    Ok(to_utc(parse_date(date)?, parse_time(time)?, zone))
}

pub fn start_of_day_utc(date: &str, zone: Tz) -> Result<DateTime<Utc>, TimeError> {
    Ok(day_start(parse_date(date)?, zone))
}

pub fn end_of_day_utc(date: &str, zone: Tz) -> Result<DateTime<Utc>, TimeError> {
    Ok(day_end(parse_date(date)?, zone))
}
