use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Roster identifier of a member.
pub type Cid = u32;
pub type ScheduleId = i64;
pub type SessionId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Trainer,
    Admin,
}

/// The member a request acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub cid: Cid,
    pub first_name: String,
    pub last_name: String,
    pub operating_initials: String,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Identity {
    pub fn can_be_trainer(&self) -> bool {
        self.roles.contains(&Role::Trainer) || self.is_admin()
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    pub fn display_name(&self) -> String {
        format!(
            "{} {} ({})",
            self.first_name, self.last_name, self.operating_initials
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum Position {
    MinorGround,
    MajorGround,
    MinorTower,
    MajorTower,
    MinorApproach,
    MajorApproach,
    Center,
}

impl Position {
    pub const ALL: [Position; 7] = [
        Position::MinorGround,
        Position::MajorGround,
        Position::MinorTower,
        Position::MajorTower,
        Position::MinorApproach,
        Position::MajorApproach,
        Position::Center,
    ];

    pub fn friendly_name(self) -> &'static str {
        match self {
            Position::MinorGround => "Minor Ground",
            Position::MajorGround => "Major Ground",
            Position::MinorTower => "Minor Tower",
            Position::MajorTower => "Major Tower",
            Position::MinorApproach => "Minor Approach",
            Position::MajorApproach => "Major Approach",
            Position::Center => "Center",
        }
    }
}

/// A selectable position with its display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub name: Position,
    pub friendly_name: String,
}

impl From<Position> for PositionInfo {
    fn from(position: Position) -> Self {
        Self {
            name: position,
            friendly_name: position.friendly_name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Accepted,
}

/// A trainer's recurring weekly availability, anchored in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: ScheduleId,
    pub trainer: Cid,
    #[serde(with = "iso_weekday")]
    #[schema(value_type = u8, minimum = 1, maximum = 7, example = 5)]
    pub day_of_week: Weekday,
    #[serde(with = "hh_mm")]
    #[schema(value_type = String, example = "20:00")]
    pub time_of_day: NaiveTime,
    pub exceptions: Vec<ScheduleException>,
}

impl Schedule {
    pub fn has_exception_on(&self, date: NaiveDate) -> bool {
        self.exceptions.iter().any(|e| e.date == date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchedule {
    pub trainer: Cid,
    pub day_of_week: Weekday,
    pub time_of_day: NaiveTime,
}

/// A calendar date on which a schedule does not produce a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleException {
    pub id: i64,
    pub schedule_id: ScheduleId,
    #[schema(value_type = String, format = "date", example = "2023-12-01")]
    pub date: NaiveDate,
}

/// A persisted occurrence, either ad hoc or created by claiming a schedule slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub schedule_id: Option<ScheduleId>,
    pub trainer: Cid,
    pub student: Option<Cid>,
    pub position: Option<Position>,
    #[schema(value_type = String, format = "date-time", example = "2023-12-02T03:00:00Z")]
    pub date_time: DateTime<Utc>,
    pub status: SessionStatus,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub schedule_id: Option<ScheduleId>,
    pub trainer: Cid,
    pub student: Option<Cid>,
    pub position: Option<Position>,
    pub date_time: DateTime<Utc>,
    pub status: SessionStatus,
    pub notes: String,
}

impl NewSession {
    pub fn ad_hoc(trainer: Cid, date_time: DateTime<Utc>, notes: String) -> Self {
        Self {
            schedule_id: None,
            trainer,
            student: None,
            position: None,
            date_time,
            status: SessionStatus::Open,
            notes,
        }
    }

    pub fn claimed(slot: &VirtualSlot, student: Cid, position: Position) -> Self {
        Self {
            schedule_id: Some(slot.schedule_id),
            trainer: slot.trainer,
            student: Some(student),
            position: Some(position),
            date_time: slot.date_time,
            status: SessionStatus::Accepted,
            notes: String::new(),
        }
    }
}

/// A schedule's occurrence on a date that has no session row yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualSlot {
    pub schedule_id: ScheduleId,
    pub trainer: Cid,
    /// Calendar date the occurrence was materialized for, in the viewer's zone.
    #[schema(value_type = String, format = "date", example = "2023-12-01")]
    pub date: NaiveDate,
    #[schema(value_type = String, format = "date-time", example = "2023-12-02T03:00:00Z")]
    pub date_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Slot {
    Virtual(VirtualSlot),
    Real(Session),
}

impl Slot {
    pub fn date_time(&self) -> DateTime<Utc> {
        match self {
            Slot::Virtual(v) => v.date_time,
            Slot::Real(s) => s.date_time,
        }
    }

    pub fn trainer(&self) -> Cid {
        match self {
            Slot::Virtual(v) => v.trainer,
            Slot::Real(s) => s.trainer,
        }
    }

    pub fn schedule_id(&self) -> Option<ScheduleId> {
        match self {
            Slot::Virtual(v) => Some(v.schedule_id),
            Slot::Real(s) => s.schedule_id,
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Slot::Virtual(_) => true,
            Slot::Real(s) => s.status == SessionStatus::Open,
        }
    }
}

/// What a claim or delete is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTarget {
    Session(SessionId),
    /// A schedule's occurrence on a calendar date in the caller's zone.
    Occurrence {
        schedule_id: ScheduleId,
        date: NaiveDate,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrainerStats {
    pub cid: Cid,
    pub schedules: usize,
    pub exceptions: usize,
    pub sessions_past: usize,
    pub sessions_pending: usize,
}

mod iso_weekday {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(day: &Weekday, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(day.number_from_monday() as u8)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Weekday, D::Error> {
        let n = u8::deserialize(deserializer)?;
        crate::validation::validate_day_of_week(n).map_err(D::Error::custom)
    }
}

mod hh_mm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use crate::time::{TIME_FORMAT, parse_time};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_time(&raw).map_err(D::Error::custom)
    }
}
