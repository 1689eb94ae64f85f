use chrono::Weekday;

use crate::error::SchedulingError;
use crate::models::Position;

/// ISO weekday number, Monday = 1 through Sunday = 7.
pub fn validate_day_of_week(value: u8) -> Result<Weekday, SchedulingError> {
    if (1..=7).contains(&value) {
        Weekday::try_from(value - 1).map_err(|_| day_of_week_error())
    } else {
        Err(day_of_week_error())
    }
}

fn day_of_week_error() -> SchedulingError {
    SchedulingError::Malformed("dayOfWeek must be between 1 and 7".into())
}

pub fn validate_lookahead_weeks(value: u32) -> Result<u32, SchedulingError> {
    if (1..=52).contains(&value) {
        Ok(value)
    } else {
        Err(SchedulingError::Malformed(
            "lookahead_weeks must be between 1 and 52".into(),
        ))
    }
}

pub fn validate_position(value: &str) -> Result<Position, SchedulingError> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| SchedulingError::Malformed(format!("Unknown position '{value}'")))
}
