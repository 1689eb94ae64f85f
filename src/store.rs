//! Persistence contract for schedules, exceptions and sessions.
//!
//! Every method is atomic with respect to the others: a reader never observes
//! half of a multi-row change such as a schedule deletion. Methods that guard a
//! state transition check their precondition and write in one step, returning
//! [`StoreError::Conflict`] when the precondition no longer holds.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::models::{
    Cid, NewSchedule, NewSession, Position, Schedule, ScheduleException, ScheduleId, Session,
    SessionId, SessionStatus,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Conjunction of optional constraints over sessions. Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub trainer: Option<Cid>,
    pub student: Option<Cid>,
    pub schedule_id: Option<ScheduleId>,
    pub status: Option<SessionStatus>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl SessionFilter {
    pub fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            until: Some(until),
            ..Self::default()
        }
    }

    pub fn trainer(mut self, cid: Cid) -> Self {
        self.trainer = Some(cid);
        self
    }

    pub fn student(mut self, cid: Cid) -> Self {
        self.student = Some(cid);
        self
    }

    pub fn schedule(mut self, id: ScheduleId) -> Self {
        self.schedule_id = Some(id);
        self
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, session: &Session) -> bool {
        self.trainer.is_none_or(|t| session.trainer == t)
            && self.student.is_none_or(|s| session.student == Some(s))
            && self.schedule_id.is_none_or(|id| session.schedule_id == Some(id))
            && self.status.is_none_or(|st| session.status == st)
            && self.from.is_none_or(|from| session.date_time >= from)
            && self.until.is_none_or(|until| session.date_time <= until)
    }
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// All schedules with their exceptions.
    async fn schedules(&self) -> Result<Vec<Schedule>, StoreError>;

    async fn schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError>;

    async fn insert_schedule(&self, new: NewSchedule) -> Result<Schedule, StoreError>;

    /// Detaches the schedule's sessions, drops its exceptions and removes it.
    async fn delete_schedule(&self, id: ScheduleId) -> Result<Schedule, StoreError>;

    /// Records that `schedule_id` does not occur on `date`, provided no session
    /// of the schedule lies inside `window`. Recording the same date twice
    /// returns the existing exception.
    async fn insert_exception(
        &self,
        schedule_id: ScheduleId,
        date: NaiveDate,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<ScheduleException, StoreError>;

    /// Sessions matching `filter`, ordered by instant.
    async fn sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError>;

    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    async fn insert_session(&self, new: NewSession) -> Result<Session, StoreError>;

    /// Inserts the row backing a schedule occurrence on `date`, provided the
    /// schedule still exists, has no exception on `date` and has no session
    /// inside `window`.
    async fn insert_occurrence_session(
        &self,
        new: NewSession,
        date: NaiveDate,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Session, StoreError>;

    /// Assigns `student` to an open, unassigned session.
    async fn claim_session(
        &self,
        id: SessionId,
        student: Cid,
        position: Position,
    ) -> Result<Session, StoreError>;

    /// Drops `student`'s claim. Schedule-backed rows are removed, ad hoc rows
    /// are reopened. Returns the row as it was before the release.
    async fn release_session(&self, id: SessionId, student: Cid) -> Result<Session, StoreError>;

    async fn update_notes(&self, id: SessionId, notes: String) -> Result<Session, StoreError>;

    /// Removes the row and returns it as it was at removal time.
    async fn delete_session(&self, id: SessionId) -> Result<Session, StoreError>;
}
