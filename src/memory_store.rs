use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use crate::models::{
    Cid, NewSchedule, NewSession, Position, Schedule, ScheduleException, ScheduleId, Session,
    SessionId, SessionStatus,
};
use crate::store::{ScheduleStore, SessionFilter, StoreError};

#[derive(Debug, Default)]
struct Tables {
    schedules: BTreeMap<ScheduleId, Schedule>,
    sessions: BTreeMap<SessionId, Session>,
    last_schedule_id: ScheduleId,
    last_exception_id: i64,
    last_session_id: SessionId,
}

fn next_id(last: &mut i64) -> i64 {
    *last += 1;
    *last
}

fn missing_session(id: SessionId) -> StoreError {
    StoreError::NotFound(format!("Could not find session with id {id}"))
}

fn missing_schedule(id: ScheduleId) -> StoreError {
    StoreError::NotFound(format!("Could not find schedule with id {id}"))
}

/// Process-local store. Each operation holds the table lock for its whole
/// read-check-write sequence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with existing rows; new ids continue after the
    /// highest seeded ones.
    pub fn seeded(schedules: Vec<Schedule>, sessions: Vec<Session>) -> Self {
        let mut tables = Tables::default();
        for schedule in schedules {
            tables.last_schedule_id = tables.last_schedule_id.max(schedule.id);
            for exception in &schedule.exceptions {
                tables.last_exception_id = tables.last_exception_id.max(exception.id);
            }
            tables.schedules.insert(schedule.id, schedule);
        }
        for session in sessions {
            tables.last_session_id = tables.last_session_id.max(session.id);
            tables.sessions.insert(session.id, session);
        }
        Self {
            tables: RwLock::new(tables),
        }
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        Ok(self.tables.read().await.schedules.values().cloned().collect())
    }

    async fn schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        Ok(self.tables.read().await.schedules.get(&id).cloned())
    }

    async fn insert_schedule(&self, new: NewSchedule) -> Result<Schedule, StoreError> {
        let mut tables = self.tables.write().await;
        let schedule = Schedule {
            id: next_id(&mut tables.last_schedule_id),
            trainer: new.trainer,
            day_of_week: new.day_of_week,
            time_of_day: new.time_of_day,
            exceptions: Vec::new(),
        };
        tables.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn delete_schedule(&self, id: ScheduleId) -> Result<Schedule, StoreError> {
        let mut tables = self.tables.write().await;
        let schedule = tables.schedules.remove(&id).ok_or_else(|| missing_schedule(id))?;
        for session in tables.sessions.values_mut() {
            if session.schedule_id == Some(id) {
                session.schedule_id = None;
            }
        }
        Ok(schedule)
    }

    async fn insert_exception(
        &self,
        schedule_id: ScheduleId,
        date: NaiveDate,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<ScheduleException, StoreError> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let taken = SessionFilter::between(window.0, window.1).schedule(schedule_id);
        if tables.sessions.values().any(|s| taken.matches(s)) {
            return Err(StoreError::Conflict(
                "This session has already been accepted".into(),
            ));
        }
        let schedule = tables
            .schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| missing_schedule(schedule_id))?;
        if let Some(existing) = schedule.exceptions.iter().find(|e| e.date == date) {
            return Ok(existing.clone());
        }
        let exception = ScheduleException {
            id: next_id(&mut tables.last_exception_id),
            schedule_id,
            date,
        };
        schedule.exceptions.push(exception.clone());
        Ok(exception)
    }

    async fn sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| (s.date_time, s.id));
        Ok(sessions)
    }

    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn insert_session(&self, new: NewSession) -> Result<Session, StoreError> {
        let mut tables = self.tables.write().await;
        let session = build_session(&mut tables, new);
        Ok(session)
    }

    async fn insert_occurrence_session(
        &self,
        new: NewSession,
        date: NaiveDate,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Session, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(schedule_id) = new.schedule_id {
            let schedule = tables
                .schedules
                .get(&schedule_id)
                .ok_or_else(|| missing_schedule(schedule_id))?;
            if schedule.has_exception_on(date) {
                return Err(StoreError::Conflict(
                    "This session was cancelled by the trainer".into(),
                ));
            }
            let taken = SessionFilter::between(window.0, window.1).schedule(schedule_id);
            if tables.sessions.values().any(|s| taken.matches(s)) {
                return Err(StoreError::Conflict(
                    "You cannot accept this session - it's already taken".into(),
                ));
            }
        }
        Ok(build_session(&mut tables, new))
    }

    async fn claim_session(
        &self,
        id: SessionId,
        student: Cid,
        position: Position,
    ) -> Result<Session, StoreError> {
        let mut tables = self.tables.write().await;
        let session = tables.sessions.get_mut(&id).ok_or_else(|| missing_session(id))?;
        if session.student.is_some() || session.status != SessionStatus::Open {
            return Err(StoreError::Conflict(
                "You cannot accept this session - it's already taken".into(),
            ));
        }
        session.student = Some(student);
        session.position = Some(position);
        session.status = SessionStatus::Accepted;
        Ok(session.clone())
    }

    async fn release_session(&self, id: SessionId, student: Cid) -> Result<Session, StoreError> {
        let mut tables = self.tables.write().await;
        let session = tables.sessions.get_mut(&id).ok_or_else(|| missing_session(id))?;
        if session.student != Some(student) {
            return Err(StoreError::Conflict(
                "You are no longer assigned to this session".into(),
            ));
        }
        let before = session.clone();
        if before.schedule_id.is_some() {
            tables.sessions.remove(&id);
        } else {
            session.student = None;
            session.position = None;
            session.status = SessionStatus::Open;
        }
        Ok(before)
    }

    async fn update_notes(&self, id: SessionId, notes: String) -> Result<Session, StoreError> {
        let mut tables = self.tables.write().await;
        let session = tables.sessions.get_mut(&id).ok_or_else(|| missing_session(id))?;
        session.notes = notes;
        Ok(session.clone())
    }

    async fn delete_session(&self, id: SessionId) -> Result<Session, StoreError> {
        let mut tables = self.tables.write().await;
        tables.sessions.remove(&id).ok_or_else(|| missing_session(id))
    }
}

fn build_session(tables: &mut Tables, new: NewSession) -> Session {
    let session = Session {
        id: next_id(&mut tables.last_session_id),
        schedule_id: new.schedule_id,
        trainer: new.trainer,
        student: new.student,
        position: new.position,
        date_time: new.date_time,
        status: new.status,
        notes: new.notes,
    };
    tables.sessions.insert(session.id, session.clone());
    session
}
