use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::{Json, http::StatusCode};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use chrono::Utc;
use http::HeaderMap;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::{
    AppState,
    auth::{resolve_actor, verify_token},
    error::ApiError,
    models::{
        Identity, Position, PositionInfo, Schedule, ScheduleId, Session, SessionId, Slot,
        SlotTarget, TrainerStats,
    },
    time::{parse_date, parse_time, parse_zone, to_utc_instant},
    validation::{validate_day_of_week, validate_position},
};

type BearerHeader = Option<TypedHeader<Authorization<Bearer>>>;

#[derive(Debug, Deserialize, IntoParams)]
pub struct TokenQuery {
    /// Authentication token (alternative to Bearer header)
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SlotsQuery {
    /// Calendar date in the viewer's zone, YYYY-MM-DD
    pub date: String,
    /// IANA time zone of the viewer, e.g. America/Denver
    pub tz: String,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ZoneQuery {
    /// IANA time zone the date in the path is expressed in
    pub tz: String,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct MineQuery {
    /// Only accepted sessions that have not started yet
    #[serde(default)]
    pub pending: bool,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionBody {
    #[schema(example = "2023-12-01")]
    pub date: String,
    #[schema(example = "18:00")]
    pub time: String,
    #[schema(example = "America/Denver")]
    pub tz: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionAction {
    Accept,
    Unaccept,
    UpdateNotes,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateSessionBody {
    pub action: SessionAction,
    #[schema(example = "minorGround")]
    pub position: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClaimOccurrenceBody {
    #[schema(example = "minorGround")]
    pub position: String,
    #[schema(example = "America/Denver")]
    pub tz: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleBody {
    /// Local ISO weekday, Monday = 1 through Sunday = 7
    #[schema(example = 5)]
    pub day_of_week: u8,
    #[schema(example = "20:00")]
    pub time_of_day: String,
    #[schema(example = "America/Denver")]
    pub tz: String,
}

async fn authorize(
    state: &AppState,
    auth: BearerHeader,
    token: Option<&str>,
    headers: &HeaderMap,
) -> Result<Identity, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    verify_token(&state.settings, auth_header, token)?;
    resolve_actor(state.roster.as_ref(), headers).await
}

#[utoipa::path(get, path = "/", tag = "scheduling")]
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Training Scheduler API",
        "endpoints": {
            "/slots": "Sessions and schedule slots visible on a date",
            "/sessions": "Create, accept, release and cancel sessions",
            "/schedules": "Manage recurring weekly availability"
        }
    }))
}

#[utoipa::path(get, path = "/healthz/live", tag = "scheduling")]
pub async fn healthz_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(get, path = "/healthz/ready", tag = "scheduling")]
pub async fn healthz_ready() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(
    get,
    path = "/slots",
    params(SlotsQuery),
    responses(
        (status = 200, description = "Slots on the date, ordered by time", body = [Slot]),
        (status = 400, description = "Malformed date or time zone"),
        (status = 401, description = "Invalid authentication token or unknown member")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "scheduling"
)]
pub async fn get_slots(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Vec<Slot>>, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    let date = parse_date(&query.date)?;
    let zone = parse_zone(&query.tz)?;
    let slots = state
        .scheduler
        .list_visible_slots(date, zone, &actor, Utc::now())
        .await?;
    Ok(Json(slots))
}

#[utoipa::path(
    get,
    path = "/positions",
    params(TokenQuery),
    responses(
        (status = 200, description = "Positions a student may train on", body = [PositionInfo]),
        (status = 401, description = "Invalid authentication token or unknown member")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "scheduling"
)]
pub async fn list_positions(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<PositionInfo>>, ApiError> {
    authorize(&state, auth, query.token.as_deref(), &headers).await?;
    Ok(Json(Position::ALL.into_iter().map(PositionInfo::from).collect()))
}

#[utoipa::path(
    post,
    path = "/sessions",
    params(TokenQuery),
    request_body = CreateSessionBody,
    responses(
        (status = 201, description = "Session created", body = Session),
        (status = 403, description = "Not a trainer"),
        (status = 422, description = "Session would start in the past")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    let zone = parse_zone(&body.tz)?;
    let instant = to_utc_instant(&body.date, &body.time, zone)?;
    let session = state
        .scheduler
        .create_ad_hoc_session(&actor, instant, body.notes, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[utoipa::path(
    put,
    path = "/sessions/{id}",
    params(("id" = i64, Path, description = "Session id"), TokenQuery),
    request_body = UpdateSessionBody,
    responses(
        (status = 200, description = "Session accepted, released or updated"),
        (status = 403, description = "Not allowed for this member"),
        (status = 404, description = "No such session"),
        (status = 409, description = "Already taken"),
        (status = 422, description = "Session is in the past")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn update_session(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Path(id): Path<SessionId>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<UpdateSessionBody>,
) -> Result<Response, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    let now = Utc::now();
    match body.action {
        SessionAction::Accept => {
            let position = body
                .position
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("Missing \"position\"".into()))?;
            let position = validate_position(position)?;
            let session = state
                .scheduler
                .claim_slot(SlotTarget::Session(id), chrono_tz::UTC, position, &actor, now)
                .await?;
            Ok(Json(session).into_response())
        }
        SessionAction::Unaccept => {
            state.scheduler.release_slot(id, &actor, now).await?;
            Ok(Json(serde_json::json!({"status": "un-accepted"})).into_response())
        }
        SessionAction::UpdateNotes => {
            let session = state
                .scheduler
                .edit_notes(id, body.notes.unwrap_or_default(), &actor)
                .await?;
            Ok(Json(session).into_response())
        }
    }
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    params(("id" = i64, Path, description = "Session id"), TokenQuery),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 403, description = "Not the owning trainer"),
        (status = 404, description = "No such session"),
        (status = 422, description = "Session is in the past")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Path(id): Path<SessionId>,
    Query(query): Query<TokenQuery>,
) -> Result<StatusCode, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    state
        .scheduler
        .delete_slot(SlotTarget::Session(id), chrono_tz::UTC, &actor, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/schedules/{id}/occurrences/{date}",
    params(
        ("id" = i64, Path, description = "Schedule id"),
        ("date" = String, Path, description = "Calendar date in the caller's zone"),
        TokenQuery
    ),
    request_body = ClaimOccurrenceBody,
    responses(
        (status = 201, description = "Session created for the occurrence", body = Session),
        (status = 403, description = "Trainers cannot accept their own sessions"),
        (status = 404, description = "No such schedule or occurrence"),
        (status = 409, description = "Already taken or cancelled"),
        (status = 422, description = "Occurrence is in the past")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "schedules"
)]
pub async fn claim_occurrence(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Path((schedule_id, date)): Path<(ScheduleId, String)>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<ClaimOccurrenceBody>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    let target = SlotTarget::Occurrence {
        schedule_id,
        date: parse_date(&date)?,
    };
    let zone = parse_zone(&body.tz)?;
    let position = validate_position(&body.position)?;
    let session = state
        .scheduler
        .claim_slot(target, zone, position, &actor, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[utoipa::path(
    delete,
    path = "/schedules/{id}/occurrences/{date}",
    params(
        ("id" = i64, Path, description = "Schedule id"),
        ("date" = String, Path, description = "Calendar date in the caller's zone"),
        ZoneQuery
    ),
    responses(
        (status = 204, description = "Occurrence cancelled"),
        (status = 403, description = "Not the owning trainer"),
        (status = 404, description = "No such schedule or occurrence"),
        (status = 409, description = "Occurrence already has a session"),
        (status = 422, description = "Occurrence is in the past")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "schedules"
)]
pub async fn cancel_occurrence(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Path((schedule_id, date)): Path<(ScheduleId, String)>,
    Query(query): Query<ZoneQuery>,
) -> Result<StatusCode, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    let target = SlotTarget::Occurrence {
        schedule_id,
        date: parse_date(&date)?,
    };
    let zone = parse_zone(&query.tz)?;
    state
        .scheduler
        .delete_slot(target, zone, &actor, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/schedules",
    params(TokenQuery),
    responses(
        (status = 200, description = "The trainer's schedules", body = [Schedule]),
        (status = 403, description = "Not a trainer")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "schedules"
)]
pub async fn list_schedules(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<Schedule>>, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    Ok(Json(state.scheduler.schedules_for_trainer(&actor).await?))
}

#[utoipa::path(
    post,
    path = "/schedules",
    params(TokenQuery),
    request_body = CreateScheduleBody,
    responses(
        (status = 201, description = "Schedule created, anchored in UTC", body = Schedule),
        (status = 400, description = "Malformed weekday, time or zone"),
        (status = 403, description = "Not a trainer")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "schedules"
)]
pub async fn create_schedule(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(body): Json<CreateScheduleBody>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    let day_of_week = validate_day_of_week(body.day_of_week)?;
    let time_of_day = parse_time(&body.time_of_day)?;
    let zone = parse_zone(&body.tz)?;
    let schedule = state
        .scheduler
        .create_schedule(&actor, day_of_week, time_of_day, zone, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

#[utoipa::path(
    delete,
    path = "/schedules/{id}",
    params(("id" = i64, Path, description = "Schedule id"), TokenQuery),
    responses(
        (status = 204, description = "Schedule and its exceptions deleted; sessions detached"),
        (status = 403, description = "Not the owning trainer"),
        (status = 404, description = "No such schedule")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "schedules"
)]
pub async fn delete_schedule(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Path(id): Path<ScheduleId>,
    Query(query): Query<TokenQuery>,
) -> Result<StatusCode, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    state.scheduler.delete_schedule(id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/sessions/trainer",
    params(TokenQuery),
    responses(
        (status = 200, description = "The trainer's upcoming sessions", body = [Session]),
        (status = 403, description = "Not a trainer")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn trainer_sessions(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    let sessions = state
        .scheduler
        .sessions_for_trainer(&actor, Utc::now())
        .await?;
    Ok(Json(sessions))
}

#[utoipa::path(
    get,
    path = "/sessions/mine",
    params(MineQuery),
    responses((status = 200, description = "Sessions the member has accepted", body = [Session])),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn my_sessions(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Query(query): Query<MineQuery>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    let sessions = state
        .scheduler
        .sessions_for_student(&actor, query.pending, Utc::now())
        .await?;
    Ok(Json(sessions))
}

#[utoipa::path(
    get,
    path = "/sessions/mine.ical",
    params(TokenQuery),
    responses(
        (status = 200, description = "iCal file of upcoming sessions", content_type = "text/calendar")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn my_sessions_ical(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    let sessions = state
        .scheduler
        .upcoming_sessions(&actor, Utc::now())
        .await?;
    let body = state.exporter.generate(&sessions);
    Ok((
        StatusCode::OK,
        [
            ("content-type", "text/calendar"),
            (
                "content-disposition",
                "attachment; filename=training_sessions.ics",
            ),
        ],
        body,
    ))
}

#[utoipa::path(
    get,
    path = "/sessions/soon",
    params(TokenQuery),
    responses(
        (status = 200, description = "Accepted sessions starting within the hour", body = [Session]),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn sessions_soon(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    verify_token(&state.settings, auth_header, query.token.as_deref())?;
    let sessions = state.scheduler.sessions_starting_soon(Utc::now()).await?;
    Ok(Json(sessions))
}

#[utoipa::path(
    get,
    path = "/stats",
    params(TokenQuery),
    responses(
        (status = 200, description = "Per-trainer activity", body = [TrainerStats]),
        (status = 403, description = "Not an admin")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "scheduling"
)]
pub async fn stats(
    State(state): State<AppState>,
    auth: BearerHeader,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<TrainerStats>>, ApiError> {
    let actor = authorize(&state, auth, query.token.as_deref(), &headers).await?;
    Ok(Json(state.scheduler.trainer_stats(&actor, Utc::now()).await?))
}
