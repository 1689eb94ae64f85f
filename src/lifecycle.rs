//! State transitions of sessions and schedules.
//!
//! Each transition validates against a fresh read and then writes through a
//! store operation that re-checks its own precondition, so a lost race
//! surfaces as [`SchedulingError::Conflict`] instead of a double booking.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use tracing::info;

use crate::error::SchedulingError;
use crate::materializer::{self, DayWindow, Horizon};
use crate::models::{
    Identity, NewSchedule, NewSession, Position, Schedule, ScheduleId, Session, SessionId,
    SessionStatus, Slot, SlotTarget, TrainerStats, VirtualSlot,
};
use crate::notify::{self, NotificationEvent, NotificationKind, Notifier};
use crate::store::{ScheduleStore, SessionFilter};
use crate::time;

/// Window used by [`Scheduler::sessions_starting_soon`], in minutes.
pub const STARTING_SOON_MINUTES: i64 = 60;

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn ScheduleStore>,
    notifier: Arc<dyn Notifier>,
    lookahead_weeks: u32,
}

/// A schedule occurrence re-derived from current store state.
struct Occurrence {
    schedule: Schedule,
    window: DayWindow,
    slot: VirtualSlot,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        notifier: Arc<dyn Notifier>,
        lookahead_weeks: u32,
    ) -> Self {
        Self {
            store,
            notifier,
            lookahead_weeks,
        }
    }

    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.store
    }

    fn horizon(&self, now: DateTime<Utc>) -> Horizon {
        Horizon::new(now, self.lookahead_weeks)
    }

    pub async fn list_visible_slots(
        &self,
        date: NaiveDate,
        zone: Tz,
        viewer: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, SchedulingError> {
        let window = DayWindow::new(date, zone);
        let horizon = self.horizon(now);
        let slots = materializer::load_slots(self.store.as_ref(), &window, &horizon).await?;
        Ok(materializer::visible_to(viewer, slots, now))
    }

    pub async fn claim_slot(
        &self,
        target: SlotTarget,
        zone: Tz,
        position: Position,
        actor: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Session, SchedulingError> {
        let session = match target {
            SlotTarget::Session(id) => self.claim_session(id, position, actor, now).await?,
            SlotTarget::Occurrence { schedule_id, date } => {
                let occurrence = self.occurrence(schedule_id, date, zone, now).await?;
                if occurrence.schedule.trainer == actor.cid {
                    return Err(SchedulingError::Forbidden(
                        "You cannot accept your own session".into(),
                    ));
                }
                ensure_future(occurrence.slot.date_time, now)?;
                if occurrence.schedule.has_exception_on(date) {
                    return Err(SchedulingError::Conflict(
                        "This session was cancelled by the trainer".into(),
                    ));
                }
                self.ensure_untaken(&occurrence).await?;
                self.store
                    .insert_occurrence_session(
                        NewSession::claimed(&occurrence.slot, actor.cid, position),
                        date,
                        occurrence.window.bounds(),
                    )
                    .await?
            }
        };

        info!(
            session_id = session.id,
            schedule_id = ?session.schedule_id,
            actor = actor.cid,
            position = ?position,
            "session accepted"
        );
        notify::deliver(
            self.notifier.as_ref(),
            session.trainer,
            NotificationEvent {
                kind: NotificationKind::SessionAccepted,
                actor: actor.display_name(),
                session_id: Some(session.id),
                date_time: session.date_time,
            },
        )
        .await;
        Ok(session)
    }

    async fn claim_session(
        &self,
        id: SessionId,
        position: Position,
        actor: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Session, SchedulingError> {
        let record = self.session(id).await?;
        if record.trainer == actor.cid {
            return Err(SchedulingError::Forbidden(
                "You cannot accept your own session".into(),
            ));
        }
        ensure_future(record.date_time, now)?;
        if record.student.is_some() {
            return Err(SchedulingError::Conflict(
                "You cannot accept this session - it's already taken".into(),
            ));
        }
        Ok(self.store.claim_session(id, actor.cid, position).await?)
    }

    pub async fn release_slot(
        &self,
        id: SessionId,
        actor: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        let record = self.session(id).await?;
        if record.student != Some(actor.cid) {
            return Err(SchedulingError::Forbidden(
                "You cannot un-accept this session - you're not assigned to it".into(),
            ));
        }
        ensure_future(record.date_time, now)?;
        let released = self.store.release_session(id, actor.cid).await?;

        info!(
            session_id = id,
            schedule_id = ?released.schedule_id,
            actor = actor.cid,
            "session un-accepted"
        );
        notify::deliver(
            self.notifier.as_ref(),
            released.trainer,
            NotificationEvent {
                kind: NotificationKind::StudentCancelledSession,
                actor: actor.display_name(),
                session_id: Some(id),
                date_time: released.date_time,
            },
        )
        .await;
        Ok(())
    }

    pub async fn edit_notes(
        &self,
        id: SessionId,
        notes: String,
        actor: &Identity,
    ) -> Result<Session, SchedulingError> {
        let record = self.session(id).await?;
        if record.trainer != actor.cid {
            return Err(SchedulingError::Forbidden(
                "You cannot edit the notes on someone else's session".into(),
            ));
        }
        if !actor.can_be_trainer() {
            return Err(SchedulingError::Forbidden("You are not a trainer".into()));
        }
        let session = self.store.update_notes(id, notes).await?;
        info!(session_id = id, actor = actor.cid, "session notes updated");
        Ok(session)
    }

    pub async fn delete_slot(
        &self,
        target: SlotTarget,
        zone: Tz,
        actor: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        match target {
            SlotTarget::Session(id) => self.delete_session(id, actor, now).await,
            SlotTarget::Occurrence { schedule_id, date } => {
                let occurrence = self.occurrence(schedule_id, date, zone, now).await?;
                if occurrence.schedule.trainer != actor.cid {
                    return Err(SchedulingError::Forbidden(
                        "You cannot cancel someone else's session".into(),
                    ));
                }
                ensure_future(occurrence.slot.date_time, now)?;
                // A claimed occurrence is a real row and must be deleted as such.
                self.ensure_untaken(&occurrence).await?;
                let exception = self
                    .store
                    .insert_exception(schedule_id, date, occurrence.window.bounds())
                    .await?;
                info!(
                    schedule_id,
                    exception_id = exception.id,
                    date = %date,
                    actor = actor.cid,
                    "schedule occurrence cancelled"
                );
                Ok(())
            }
        }
    }

    async fn delete_session(
        &self,
        id: SessionId,
        actor: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        let record = self.session(id).await?;
        if record.trainer != actor.cid || !actor.can_be_trainer() {
            return Err(SchedulingError::Forbidden(
                "You cannot delete someone else's session".into(),
            ));
        }
        ensure_future(record.date_time, now)?;
        let removed = self.store.delete_session(id).await?;
        info!(
            session_id = id,
            schedule_id = ?removed.schedule_id,
            actor = actor.cid,
            "session deleted"
        );

        // The removed row tells us who actually held the claim at deletion time.
        if let Some(student) = removed.student {
            notify::deliver(
                self.notifier.as_ref(),
                student,
                NotificationEvent {
                    kind: NotificationKind::TrainerCancelledSession,
                    actor: actor.display_name(),
                    session_id: Some(id),
                    date_time: removed.date_time,
                },
            )
            .await;
        }
        Ok(())
    }

    pub async fn create_ad_hoc_session(
        &self,
        actor: &Identity,
        instant: DateTime<Utc>,
        notes: String,
        now: DateTime<Utc>,
    ) -> Result<Session, SchedulingError> {
        ensure_trainer(actor)?;
        ensure_future(instant, now)?;
        let session = self
            .store
            .insert_session(NewSession::ad_hoc(actor.cid, instant, notes))
            .await?;
        info!(
            session_id = session.id,
            actor = actor.cid,
            date_time = %session.date_time,
            "session created"
        );
        Ok(session)
    }

    /// Creates a weekly schedule from a trainer's local weekday and time.
    ///
    /// The local pair is resolved against the next matching date from today in
    /// `zone`, and the UTC weekday and time of that instant are what get stored.
    pub async fn create_schedule(
        &self,
        actor: &Identity,
        day_of_week: Weekday,
        time_of_day: NaiveTime,
        zone: Tz,
        now: DateTime<Utc>,
    ) -> Result<Schedule, SchedulingError> {
        ensure_trainer(actor)?;
        let anchored = anchor_weekly(day_of_week, time_of_day, zone, now)?;
        let schedule = self
            .store
            .insert_schedule(NewSchedule {
                trainer: actor.cid,
                day_of_week: anchored.weekday(),
                time_of_day: anchored.time(),
            })
            .await?;
        info!(
            schedule_id = schedule.id,
            actor = actor.cid,
            local_day = %day_of_week,
            local_time = %time_of_day.format(time::TIME_FORMAT),
            zone = %zone,
            day_of_week = schedule.day_of_week.number_from_monday(),
            time_of_day = %schedule.time_of_day.format(time::TIME_FORMAT),
            "schedule created"
        );
        Ok(schedule)
    }

    pub async fn delete_schedule(
        &self,
        id: ScheduleId,
        actor: &Identity,
    ) -> Result<(), SchedulingError> {
        let schedule = self
            .store
            .schedule(id)
            .await?
            .ok_or_else(|| {
                SchedulingError::NotFound(format!("Could not find schedule with id {id}"))
            })?;
        if schedule.trainer != actor.cid {
            return Err(SchedulingError::Forbidden(
                "You cannot delete someone else's schedule".into(),
            ));
        }
        let removed = self.store.delete_schedule(id).await?;
        info!(
            schedule_id = id,
            exceptions = removed.exceptions.len(),
            actor = actor.cid,
            "schedule deleted"
        );
        Ok(())
    }

    pub async fn schedules_for_trainer(
        &self,
        actor: &Identity,
    ) -> Result<Vec<Schedule>, SchedulingError> {
        ensure_trainer(actor)?;
        let mut schedules: Vec<Schedule> = self
            .store
            .schedules()
            .await?
            .into_iter()
            .filter(|s| s.trainer == actor.cid)
            .collect();
        schedules.sort_by_key(|s| (s.day_of_week.num_days_from_monday(), s.time_of_day, s.id));
        Ok(schedules)
    }

    /// The trainer's sessions that have not started yet.
    pub async fn sessions_for_trainer(
        &self,
        actor: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, SchedulingError> {
        ensure_trainer(actor)?;
        let sessions = self
            .store
            .sessions(&SessionFilter::default().trainer(actor.cid))
            .await?;
        Ok(sessions.into_iter().filter(|s| s.date_time > now).collect())
    }

    /// Sessions the actor has claimed; with `pending_only`, just the upcoming ones.
    pub async fn sessions_for_student(
        &self,
        actor: &Identity,
        pending_only: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, SchedulingError> {
        let mut filter = SessionFilter::default().student(actor.cid);
        if pending_only {
            filter = filter.status(SessionStatus::Accepted);
        }
        let sessions = self.store.sessions(&filter).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| !pending_only || s.date_time > now)
            .collect())
    }

    /// Every upcoming session the actor takes part in, as trainer or student.
    pub async fn upcoming_sessions(
        &self,
        actor: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, SchedulingError> {
        let trained = SessionFilter::default().trainer(actor.cid);
        let claimed = SessionFilter::default().student(actor.cid);
        let (as_trainer, as_student) = futures::try_join!(
            self.store.sessions(&trained),
            self.store.sessions(&claimed),
        )?;
        let mut sessions: Vec<Session> = as_trainer
            .into_iter()
            .chain(as_student)
            .filter(|s| s.date_time > now)
            .collect();
        sessions.sort_by_key(|s| (s.date_time, s.id));
        sessions.dedup_by_key(|s| s.id);
        Ok(sessions)
    }

    /// Accepted sessions beginning within the next hour.
    pub async fn sessions_starting_soon(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, SchedulingError> {
        let until = now + Duration::minutes(STARTING_SOON_MINUTES);
        let filter = SessionFilter::between(now, until).status(SessionStatus::Accepted);
        let sessions = self.store.sessions(&filter).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.date_time > now && s.date_time < until)
            .collect())
    }

    pub async fn trainer_stats(
        &self,
        actor: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrainerStats>, SchedulingError> {
        if !actor.is_admin() {
            return Err(SchedulingError::Forbidden("You are not an admin".into()));
        }
        let everything = SessionFilter::default();
        let (schedules, sessions) =
            futures::try_join!(self.store.schedules(), self.store.sessions(&everything))?;
        let trainers: BTreeSet<_> = schedules
            .iter()
            .map(|s| s.trainer)
            .chain(sessions.iter().map(|s| s.trainer))
            .collect();

        Ok(trainers
            .into_iter()
            .map(|cid| {
                let own: Vec<&Schedule> = schedules.iter().filter(|s| s.trainer == cid).collect();
                let (past, pending): (Vec<&Session>, Vec<&Session>) = sessions
                    .iter()
                    .filter(|s| s.trainer == cid)
                    .partition(|s| s.date_time <= now);
                TrainerStats {
                    cid,
                    schedules: own.len(),
                    exceptions: own.iter().map(|s| s.exceptions.len()).sum(),
                    sessions_past: past.len(),
                    sessions_pending: pending.len(),
                }
            })
            .collect())
    }

    async fn session(&self, id: SessionId) -> Result<Session, SchedulingError> {
        self.store
            .session(id)
            .await?
            .ok_or_else(|| {
                SchedulingError::NotFound(format!("Could not find session with id {id}"))
            })
    }

    async fn occurrence(
        &self,
        schedule_id: ScheduleId,
        date: NaiveDate,
        zone: Tz,
        now: DateTime<Utc>,
    ) -> Result<Occurrence, SchedulingError> {
        let schedule = self
            .store
            .schedule(schedule_id)
            .await?
            .ok_or_else(|| {
                SchedulingError::NotFound(format!("Could not find schedule with id {schedule_id}"))
            })?;
        let window = DayWindow::new(date, zone);
        let date_time = self
            .horizon(now)
            .occurrence_within(&schedule, &window)
            .ok_or_else(|| {
                SchedulingError::NotFound(format!(
                    "Schedule {schedule_id} has no session on {date}"
                ))
            })?;
        let slot = VirtualSlot {
            schedule_id,
            trainer: schedule.trainer,
            date,
            date_time,
        };
        Ok(Occurrence {
            schedule,
            window,
            slot,
        })
    }

    async fn ensure_untaken(&self, occurrence: &Occurrence) -> Result<(), SchedulingError> {
        let filter = SessionFilter::between(occurrence.window.start, occurrence.window.end)
            .schedule(occurrence.schedule.id);
        if self.store.sessions(&filter).await?.is_empty() {
            Ok(())
        } else {
            Err(SchedulingError::Conflict(
                "This session has already been accepted".into(),
            ))
        }
    }
}

fn ensure_future(instant: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), SchedulingError> {
    if instant > now {
        Ok(())
    } else {
        Err(SchedulingError::PastInstant(
            "You cannot edit a session in the past".into(),
        ))
    }
}

fn ensure_trainer(actor: &Identity) -> Result<(), SchedulingError> {
    if actor.can_be_trainer() {
        Ok(())
    } else {
        Err(SchedulingError::Forbidden("You are not a trainer".into()))
    }
}

/// Instant of the first `day_of_week` at `time_of_day` in `zone`, counting today.
pub fn anchor_weekly(
    day_of_week: Weekday,
    time_of_day: NaiveTime,
    zone: Tz,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedulingError> {
    let today = now.with_timezone(&zone).date_naive();
    let ahead =
        (7 + day_of_week.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
    let date = today
        .checked_add_days(Days::new(ahead.into()))
        .ok_or_else(|| {
            SchedulingError::Malformed(format!("cannot anchor schedule after {today}"))
        })?;
    Ok(time::to_utc(date, time_of_day, zone))
}

#[cfg(test)]
mod tests {
    use chrono_tz::America::{Denver, Los_Angeles};
    use chrono_tz::Asia::Tokyo;

    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_anchor_weekly_crosses_utc_midnight() {
        // Friday 20:00 in Los Angeles is Saturday 04:00 UTC in winter.
        let anchored = anchor_weekly(
            Weekday::Fri,
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            Los_Angeles,
            at("2023-11-08T12:00:00Z"),
        )
        .unwrap();
        assert_eq!(anchored, at("2023-11-11T04:00:00Z"));
        assert_eq!(anchored.weekday(), Weekday::Sat);
    }

    #[test]
    fn test_anchor_weekly_counts_today() {
        // Wednesday morning in Denver; a Wednesday schedule anchors to today.
        let anchored = anchor_weekly(
            Weekday::Wed,
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            Denver,
            at("2023-11-08T15:00:00Z"),
        )
        .unwrap();
        assert_eq!(anchored, at("2023-11-09T01:00:00Z"));
    }

    #[test]
    fn test_anchor_weekly_uses_zone_for_today() {
        // 2023-11-08T20:00Z is already Thursday in Tokyo.
        let anchored = anchor_weekly(
            Weekday::Thu,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            Tokyo,
            at("2023-11-08T20:00:00Z"),
        )
        .unwrap();
        assert_eq!(anchored, at("2023-11-09T00:00:00Z"));
        assert_eq!(anchored.weekday(), Weekday::Thu);
    }

    #[test]
    fn test_ensure_future_is_strict() {
        let now = at("2023-11-08T12:00:00Z");
        assert!(ensure_future(now + Duration::seconds(1), now).is_ok());
        assert!(matches!(
            ensure_future(now, now),
            Err(SchedulingError::PastInstant(_))
        ));
    }
}
