//! Expands recurring schedules into the slots visible on one calendar date.
//!
//! Slots are recomputed from store state on every call. Concrete sessions on
//! the date always win over a schedule's occurrence, exceptions suppress an
//! occurrence, and nothing at or before `now` is offered.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::models::{Identity, Schedule, ScheduleId, Session, SessionStatus, Slot, VirtualSlot};
use crate::store::{ScheduleStore, SessionFilter, StoreError};
use crate::time;

/// A caller-local calendar date as an inclusive UTC range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn new(date: NaiveDate, zone: Tz) -> Self {
        Self {
            date,
            start: time::day_start(date, zone),
            end: time::day_end(date, zone),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start, self.end)
    }
}

/// The reference instant and how many weekly occurrences ahead may be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub now: DateTime<Utc>,
    pub lookahead_weeks: u32,
}

impl Horizon {
    pub fn new(now: DateTime<Utc>, lookahead_weeks: u32) -> Self {
        Self {
            now,
            lookahead_weeks,
        }
    }

    pub fn is_future(&self, instant: DateTime<Utc>) -> bool {
        instant > self.now
    }

    /// Earliest occurrence of `schedule` on or after the start of yesterday (UTC).
    ///
    /// Starting a day back keeps an occurrence from earlier today reachable, so
    /// that it is rejected as past rather than silently shifted a week.
    pub fn first_occurrence(&self, schedule: &Schedule) -> DateTime<Utc> {
        let today = self.now.date_naive();
        let yesterday = today.pred_opt().unwrap_or(today);
        let ahead = (7 + schedule.day_of_week.num_days_from_monday()
            - yesterday.weekday().num_days_from_monday())
            % 7;
        (yesterday + Days::new(ahead.into()))
            .and_time(schedule.time_of_day)
            .and_utc()
    }

    /// The occurrence of `schedule` that falls inside `window`, if any of the
    /// next `lookahead_weeks` occurrences does.
    pub fn occurrence_within(
        &self,
        schedule: &Schedule,
        window: &DayWindow,
    ) -> Option<DateTime<Utc>> {
        let first = self.first_occurrence(schedule);
        (0..self.lookahead_weeks)
            .map(|week| first + Duration::weeks(week.into()))
            .find(|at| window.contains(*at))
    }
}

/// Concrete sessions inside `window` plus virtual slots for every schedule
/// that ticks on the date and is neither taken, cancelled nor past.
pub fn slots_on_date(
    window: &DayWindow,
    horizon: &Horizon,
    sessions: &[Session],
    schedules: &[Schedule],
) -> Vec<Slot> {
    let concrete: Vec<&Session> = sessions
        .iter()
        .filter(|s| window.contains(s.date_time))
        .collect();
    // Matched by schedule id: an edited session may have drifted from the rule's time.
    let taken: HashSet<ScheduleId> = concrete.iter().filter_map(|s| s.schedule_id).collect();

    let virtuals = schedules
        .iter()
        .filter(|schedule| !taken.contains(&schedule.id))
        .filter(|schedule| !schedule.has_exception_on(window.date))
        .filter_map(|schedule| {
            horizon
                .occurrence_within(schedule, window)
                .filter(|at| horizon.is_future(*at))
                .map(|date_time| {
                    Slot::Virtual(VirtualSlot {
                        schedule_id: schedule.id,
                        trainer: schedule.trainer,
                        date: window.date,
                        date_time,
                    })
                })
        });

    concrete
        .into_iter()
        .cloned()
        .map(Slot::Real)
        .chain(virtuals)
        .collect()
}

/// Narrows slots to what `viewer` may see, ordered by start time. Trainers keep
/// their own claimed sessions; everything else must be open and upcoming.
pub fn visible_to(viewer: &Identity, slots: Vec<Slot>, now: DateTime<Utc>) -> Vec<Slot> {
    let mut visible: Vec<Slot> = slots
        .into_iter()
        .filter(|slot| match slot {
            Slot::Real(session) if session.trainer == viewer.cid => {
                session.status != SessionStatus::Open || session.date_time > now
            }
            other => other.is_open() && other.date_time() > now,
        })
        .collect();
    visible.sort_by_key(Slot::date_time);
    visible
}

pub async fn load_slots(
    store: &dyn ScheduleStore,
    window: &DayWindow,
    horizon: &Horizon,
) -> Result<Vec<Slot>, StoreError> {
    let filter = SessionFilter::between(window.start, window.end);
    let (sessions, schedules) = futures::try_join!(store.sessions(&filter), store.schedules())?;
    let slots = slots_on_date(window, horizon, &sessions, &schedules);
    debug!(
        date = %window.date,
        sessions = sessions.len(),
        schedules = schedules.len(),
        slots = slots.len(),
        "materialized slots"
    );
    Ok(slots)
}
