use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use httpmock::prelude::*;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::Service;
use training_scheduler::auth::ACTOR_HEADER;
use training_scheduler::ical::ICalExporter;
use training_scheduler::lifecycle::Scheduler;
use training_scheduler::memory_store::MemoryStore;
use training_scheduler::models::{Cid, Identity, Role, Schedule, Session, SessionStatus};
use training_scheduler::notify::{LogNotifier, Notifier, WebhookNotifier};
use training_scheduler::roster::StaticRoster;
use training_scheduler::settings::Settings;
use training_scheduler::{AppState, build_router};
use url::Url;

const TOKEN: &str = "test-token-123";
const TRAINER: Cid = 1000000;
const STUDENT: Cid = 1200000;
const OTHER_STUDENT: Cid = 1300000;
const ADMIN: Cid = 1400000;

fn member(cid: Cid, first_name: &str, initials: &str, roles: Vec<Role>) -> Identity {
    Identity {
        cid,
        first_name: first_name.to_string(),
        last_name: "Tester".to_string(),
        operating_initials: initials.to_string(),
        roles,
    }
}

/// Helper function to create test app state around a store and notifier
fn create_test_state(store: MemoryStore, notifier: Arc<dyn Notifier>) -> AppState {
    let settings = Settings {
        debug: true,
        auth_token: TOKEN.to_string(),
        enable_swagger: true,
        port: 8080,
        lookahead_weeks: 6,
        notify_webhook_url: None,
        roster_path: None,
        calendar_name: "Training Sessions".to_string(),
    };

    let roster = StaticRoster::new(vec![
        member(TRAINER, "Tina", "TT", vec![Role::Trainer]),
        member(STUDENT, "Sam", "SS", vec![]),
        member(OTHER_STUDENT, "Olga", "OS", vec![]),
        member(ADMIN, "Ada", "AA", vec![Role::Admin]),
    ]);

    AppState {
        scheduler: Scheduler::new(Arc::new(store), notifier, settings.lookahead_weeks),
        roster: Arc::new(roster),
        exporter: Arc::new(ICalExporter::new(settings.calendar_name.clone())),
        settings,
    }
}

/// A date two days out, with a weekly schedule of the trainer at 12:00 UTC on it.
fn scheduled_day() -> (NaiveDate, MemoryStore) {
    let date = (Utc::now() + Duration::days(2)).date_naive();
    let schedule = Schedule {
        id: 1,
        trainer: TRAINER,
        day_of_week: date.weekday(),
        time_of_day: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        exceptions: vec![],
    };
    (date, MemoryStore::seeded(vec![schedule], vec![]))
}

fn ad_hoc(id: i64, date_time: DateTime<Utc>) -> Session {
    Session {
        id,
        schedule_id: None,
        trainer: TRAINER,
        student: None,
        position: None,
        date_time,
        status: SessionStatus::Open,
        notes: String::new(),
    }
}

fn log_app(store: MemoryStore) -> Router {
    build_router(create_test_state(store, Arc::new(LogNotifier)))
}

/// Builds an authenticated request acting as `actor`
fn request(method: Method, uri: &str, actor: Cid, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(ACTOR_HEADER, actor.to_string());
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Helper to extract response body as string
async fn response_body_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn response_json(body: Body) -> Value {
    serde_json::from_str(&response_body_string(body).await).unwrap()
}

#[tokio::test]
async fn test_root_endpoint() {
    // Arrange
    let mut app = log_app(MemoryStore::new());

    // Act
    let response = app
        .call(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_body_string(response.into_body()).await;
    assert!(body.contains("Training Scheduler API"));
    assert!(body.contains("/slots"));
}

#[tokio::test]
async fn test_healthz_live() {
    // Arrange
    let mut app = log_app(MemoryStore::new());

    // Act
    let response = app
        .call(
            Request::builder()
                .uri("/healthz/live")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_body_string(response.into_body()).await;
    assert!(body.contains(r#""status":"ok"#));
}

#[tokio::test]
async fn test_openapi_document_served() {
    // Arrange
    let mut app = log_app(MemoryStore::new());

    // Act
    let response = app
        .call(
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_body_string(response.into_body()).await;
    assert!(body.contains("/schedules/{id}/occurrences/{date}"));
}

#[tokio::test]
async fn test_slots_no_auth_token() {
    // Arrange
    let mut app = log_app(MemoryStore::new());

    // Act
    let response = app
        .call(
            Request::builder()
                .uri("/slots?date=2023-12-01&tz=UTC")
                .header(ACTOR_HEADER, STUDENT.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert - should fail without token
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_slots_invalid_auth_token() {
    // Arrange
    let mut app = log_app(MemoryStore::new());

    // Act
    let response = app
        .call(
            Request::builder()
                .uri("/slots?date=2023-12-01&tz=UTC&token=invalid-token")
                .header(ACTOR_HEADER, STUDENT.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_slots_query_token_without_actor() {
    // Arrange
    let mut app = log_app(MemoryStore::new());

    // Act
    let response = app
        .call(
            Request::builder()
                .uri(format!("/slots?date=2023-12-01&tz=UTC&token={TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert - the token alone does not say who is asking
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_slots_unknown_member() {
    // Arrange
    let mut app = log_app(MemoryStore::new());

    // Act
    let response = app
        .call(request(Method::GET, "/slots?date=2023-12-01&tz=UTC", 42, None))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_slots_malformed_date_and_zone() {
    // Arrange
    let mut app = log_app(MemoryStore::new());

    // Act
    let bad_date = app
        .call(request(Method::GET, "/slots?date=2023-13-01&tz=UTC", STUDENT, None))
        .await
        .unwrap();
    let bad_zone = app
        .call(request(
            Method::GET,
            "/slots?date=2023-12-01&tz=Mars/Olympus",
            STUDENT,
            None,
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(bad_date.status(), StatusCode::BAD_REQUEST);
    assert_eq!(bad_zone.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_positions_listed() {
    // Arrange
    let mut app = log_app(MemoryStore::new());

    // Act
    let response = app
        .call(request(Method::GET, "/positions", STUDENT, None))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let positions = response_json(response.into_body()).await;
    let positions = positions.as_array().unwrap();
    assert_eq!(positions.len(), 7);
    assert_eq!(positions[0]["name"], "minorGround");
    assert_eq!(positions[0]["friendlyName"], "Minor Ground");
    assert_eq!(positions[6]["name"], "center");
}

#[tokio::test]
async fn test_slots_lists_virtual_occurrence() {
    // Arrange
    let (date, store) = scheduled_day();
    let mut app = log_app(store);

    // Act
    let response = app
        .call(request(
            Method::GET,
            &format!("/slots?date={date}&tz=UTC"),
            STUDENT,
            None,
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let slots = response_json(response.into_body()).await;
    let slots = slots.as_array().unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0]["kind"], "virtual");
    assert_eq!(slots[0]["scheduleId"], 1);
    assert_eq!(slots[0]["trainer"], TRAINER);
    assert_eq!(slots[0]["date"], date.to_string());
}

#[tokio::test]
async fn test_claim_occurrence_then_conflict() {
    // Arrange
    let (date, store) = scheduled_day();
    let mut app = log_app(store);
    let uri = format!("/schedules/1/occurrences/{date}");
    let body = json!({"position": "minorGround", "tz": "UTC"});

    // Act
    let first = app
        .call(request(Method::PUT, &uri, STUDENT, Some(body.clone())))
        .await
        .unwrap();
    let second = app
        .call(request(Method::PUT, &uri, OTHER_STUDENT, Some(body)))
        .await
        .unwrap();

    // Assert
    assert_eq!(first.status(), StatusCode::CREATED);
    let session = response_json(first.into_body()).await;
    assert_eq!(session["status"], "accepted");
    assert_eq!(session["student"], STUDENT);
    assert_eq!(session["scheduleId"], 1);
    assert_eq!(session["position"], "minorGround");

    assert_eq!(second.status(), StatusCode::CONFLICT);

    // The occurrence is no longer offered to anyone else
    let response = app
        .call(request(
            Method::GET,
            &format!("/slots?date={date}&tz=UTC"),
            OTHER_STUDENT,
            None,
        ))
        .await
        .unwrap();
    let slots = response_json(response.into_body()).await;
    assert_eq!(slots, json!([]));

    // but the trainer still sees the claimed session
    let response = app
        .call(request(
            Method::GET,
            &format!("/slots?date={date}&tz=UTC"),
            TRAINER,
            None,
        ))
        .await
        .unwrap();
    let slots = response_json(response.into_body()).await;
    assert_eq!(slots[0]["kind"], "real");
    assert_eq!(slots[0]["student"], STUDENT);
}

#[tokio::test]
async fn test_trainer_cannot_claim_own_occurrence() {
    // Arrange
    let (date, store) = scheduled_day();
    let mut app = log_app(store);

    // Act
    let response = app
        .call(request(
            Method::PUT,
            &format!("/schedules/1/occurrences/{date}"),
            TRAINER,
            Some(json!({"position": "center", "tz": "UTC"})),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_claim_rejects_unknown_position() {
    // Arrange
    let (date, store) = scheduled_day();
    let mut app = log_app(store);

    // Act
    let response = app
        .call(request(
            Method::PUT,
            &format!("/schedules/1/occurrences/{date}"),
            STUDENT,
            Some(json!({"position": "oceanic", "tz": "UTC"})),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_accept_past_session() {
    // Arrange
    let store = MemoryStore::seeded(vec![], vec![ad_hoc(5, Utc::now() - Duration::days(1))]);
    let mut app = log_app(store);

    // Act
    let response = app
        .call(request(
            Method::PUT,
            "/sessions/5",
            STUDENT,
            Some(json!({"action": "ACCEPT", "position": "majorTower"})),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_accept_missing_session() {
    // Arrange
    let mut app = log_app(MemoryStore::new());

    // Act
    let response = app
        .call(request(
            Method::PUT,
            "/sessions/99",
            STUDENT,
            Some(json!({"action": "ACCEPT", "position": "majorTower"})),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ad_hoc_session_lifecycle() {
    // Arrange
    let mut app = log_app(MemoryStore::new());
    let date = (Utc::now() + Duration::days(3)).date_naive();

    // Act - trainer posts a one-off session
    let created = app
        .call(request(
            Method::POST,
            "/sessions",
            TRAINER,
            Some(json!({
                "date": date.to_string(),
                "time": "18:00",
                "tz": "America/Denver",
                "notes": "radar"
            })),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(created.status(), StatusCode::CREATED);
    let session = response_json(created.into_body()).await;
    assert_eq!(session["status"], "open");
    let id = session["id"].as_i64().unwrap();
    let uri = format!("/sessions/{id}");

    let accepted = app
        .call(request(
            Method::PUT,
            &uri,
            STUDENT,
            Some(json!({"action": "ACCEPT", "position": "minorApproach"})),
        ))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);

    let mine = app
        .call(request(Method::GET, "/sessions/mine?pending=true", STUDENT, None))
        .await
        .unwrap();
    let mine = response_json(mine.into_body()).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let released = app
        .call(request(
            Method::PUT,
            &uri,
            STUDENT,
            Some(json!({"action": "UNACCEPT"})),
        ))
        .await
        .unwrap();
    assert_eq!(released.status(), StatusCode::OK);

    // The one-off row survives release and is open again
    let response = app
        .call(request(Method::GET, "/sessions/trainer", TRAINER, None))
        .await
        .unwrap();
    let sessions = response_json(response.into_body()).await;
    assert_eq!(sessions[0]["status"], "open");
    assert_eq!(sessions[0]["student"], Value::Null);

    let deleted = app
        .call(request(Method::DELETE, &uri, TRAINER, None))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_create_session_requires_trainer() {
    // Arrange
    let mut app = log_app(MemoryStore::new());
    let date = (Utc::now() + Duration::days(3)).date_naive();

    // Act
    let response = app
        .call(request(
            Method::POST,
            "/sessions",
            STUDENT,
            Some(json!({"date": date.to_string(), "time": "18:00", "tz": "UTC"})),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cancel_occurrence_hides_it() {
    // Arrange
    let (date, store) = scheduled_day();
    let mut app = log_app(store);
    let uri = format!("/schedules/1/occurrences/{date}?tz=UTC");

    // Act
    let by_student = app
        .call(request(Method::DELETE, &uri, STUDENT, None))
        .await
        .unwrap();
    let by_trainer = app
        .call(request(Method::DELETE, &uri, TRAINER, None))
        .await
        .unwrap();

    // Assert
    assert_eq!(by_student.status(), StatusCode::FORBIDDEN);
    assert_eq!(by_trainer.status(), StatusCode::NO_CONTENT);

    let response = app
        .call(request(
            Method::GET,
            &format!("/slots?date={date}&tz=UTC"),
            STUDENT,
            None,
        ))
        .await
        .unwrap();
    let slots = response_json(response.into_body()).await;
    assert_eq!(slots, json!([]));

    let claim = app
        .call(request(
            Method::PUT,
            &format!("/schedules/1/occurrences/{date}"),
            STUDENT,
            Some(json!({"position": "center", "tz": "UTC"})),
        ))
        .await
        .unwrap();
    assert_eq!(claim.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_schedule_management() {
    // Arrange
    let mut app = log_app(MemoryStore::new());
    let body = json!({"dayOfWeek": 5, "timeOfDay": "20:00", "tz": "America/Los_Angeles"});

    // Act
    let by_student = app
        .call(request(Method::POST, "/schedules", STUDENT, Some(body.clone())))
        .await
        .unwrap();
    let by_trainer = app
        .call(request(Method::POST, "/schedules", TRAINER, Some(body)))
        .await
        .unwrap();
    let bad_day = app
        .call(request(
            Method::POST,
            "/schedules",
            TRAINER,
            Some(json!({"dayOfWeek": 8, "timeOfDay": "20:00", "tz": "UTC"})),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(by_student.status(), StatusCode::FORBIDDEN);
    assert_eq!(by_trainer.status(), StatusCode::CREATED);
    assert_eq!(bad_day.status(), StatusCode::BAD_REQUEST);

    let schedule = response_json(by_trainer.into_body()).await;
    // Friday 20:00 in Los Angeles is Saturday 03:00 or 04:00 UTC
    assert_eq!(schedule["dayOfWeek"], 6);
    let id = schedule["id"].as_i64().unwrap();

    let listed = app
        .call(request(Method::GET, "/schedules", TRAINER, None))
        .await
        .unwrap();
    let listed = response_json(listed.into_body()).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let deleted = app
        .call(request(
            Method::DELETE,
            &format!("/schedules/{id}"),
            TRAINER,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_my_sessions_ical() {
    // Arrange
    let (date, store) = scheduled_day();
    let mut app = log_app(store);
    app.call(request(
        Method::PUT,
        &format!("/schedules/1/occurrences/{date}"),
        STUDENT,
        Some(json!({"position": "majorGround", "tz": "UTC"})),
    ))
    .await
    .unwrap();

    // Act
    let response = app
        .call(request(Method::GET, "/sessions/mine.ical", STUDENT, None))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/calendar"
    );
    let body = response_body_string(response.into_body()).await;
    assert!(body.contains("BEGIN:VCALENDAR"));
    assert!(body.contains("Training: Major Ground"));
}

#[tokio::test]
async fn test_sessions_soon_needs_only_token() {
    // Arrange
    let mut soon = ad_hoc(3, Utc::now() + Duration::minutes(30));
    soon.student = Some(STUDENT);
    soon.status = SessionStatus::Accepted;
    let later = Session {
        id: 4,
        date_time: Utc::now() + Duration::hours(3),
        ..soon.clone()
    };
    let mut app = log_app(MemoryStore::seeded(vec![], vec![soon, later]));

    // Act
    let response = app
        .call(
            Request::builder()
                .uri(format!("/sessions/soon?token={TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let sessions = response_json(response.into_body()).await;
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], 3);
}

#[tokio::test]
async fn test_stats_admin_only() {
    // Arrange
    let (_, store) = scheduled_day();
    let mut app = log_app(store);

    // Act
    let by_trainer = app
        .call(request(Method::GET, "/stats", TRAINER, None))
        .await
        .unwrap();
    let by_admin = app
        .call(request(Method::GET, "/stats", ADMIN, None))
        .await
        .unwrap();

    // Assert
    assert_eq!(by_trainer.status(), StatusCode::FORBIDDEN);
    assert_eq!(by_admin.status(), StatusCode::OK);
    let stats = response_json(by_admin.into_body()).await;
    assert_eq!(stats[0]["cid"], TRAINER);
    assert_eq!(stats[0]["schedules"], 1);
}

#[tokio::test]
async fn test_claim_notifies_trainer_via_webhook() {
    // Arrange
    let mock_server = MockServer::start();
    let mock = mock_server.mock(|when, then| {
        when.method(POST)
            .path("/notify")
            .json_body_includes(format!(
                r#"{{"recipient": {TRAINER}, "kind": "SESSION_ACCEPTED", "actor": "Sam Tester (SS)"}}"#
            ));
        then.status(204);
    });
    let notifier = WebhookNotifier::new(Url::parse(&mock_server.url("/notify")).unwrap());
    let (date, store) = scheduled_day();
    let mut app = build_router(create_test_state(store, Arc::new(notifier)));

    // Act
    let response = app
        .call(request(
            Method::PUT,
            &format!("/schedules/1/occurrences/{date}"),
            STUDENT,
            Some(json!({"position": "minorTower", "tz": "UTC"})),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::CREATED);
    mock.assert();
}

#[tokio::test]
async fn test_failed_webhook_does_not_fail_claim() {
    // Arrange
    let mock_server = MockServer::start();
    mock_server.mock(|when, then| {
        when.method(POST).path("/notify");
        then.status(503);
    });
    let notifier = WebhookNotifier::new(Url::parse(&mock_server.url("/notify")).unwrap());
    let (date, store) = scheduled_day();
    let mut app = build_router(create_test_state(store, Arc::new(notifier)));

    // Act
    let response = app
        .call(request(
            Method::PUT,
            &format!("/schedules/1/occurrences/{date}"),
            STUDENT,
            Some(json!({"position": "minorTower", "tz": "UTC"})),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::CREATED);
}
