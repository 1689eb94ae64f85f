use chrono::Duration;
use icalendar::{Calendar, Component, Event, EventLike};

use crate::models::{Session, SessionStatus};

#[derive(Clone)]
pub struct ICalExporter {
    calendar_name: String,
}

impl ICalExporter {
    pub fn new(calendar_name: impl Into<String>) -> Self {
        Self {
            calendar_name: calendar_name.into(),
        }
    }

    pub fn generate(&self, sessions: &[Session]) -> Vec<u8> {
        let mut calendar = Calendar::new();
        calendar.name(&self.calendar_name);

        for session in sessions {
            let summary = match session.position {
                Some(position) => format!("Training: {}", position.friendly_name()),
                None => "Training session (unclaimed)".to_string(),
            };
            let status = match session.status {
                SessionStatus::Open => "open",
                SessionStatus::Accepted => "accepted",
            };

            let mut event = Event::new();
            event.summary(&summary);
            event.starts(session.date_time);
            event.ends(session.date_time + Duration::hours(1));
            event.description(&format!("Status: {status}\nNotes: {}", session.notes));
            event.uid(&format!("{}-training-session", session.id));
            calendar.push(event);
        }

        calendar.to_string().into_bytes()
    }
}
