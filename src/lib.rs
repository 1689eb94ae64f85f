pub mod auth;
pub mod error;
pub mod handlers;
pub mod ical;
pub mod lifecycle;
pub mod materializer;
pub mod memory_store;
pub mod models;
pub mod notify;
pub mod openapi;
pub mod roster;
pub mod settings;
pub mod store;
pub mod time;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use handlers::{
    cancel_occurrence, claim_occurrence, create_schedule, create_session, delete_schedule,
    delete_session, get_slots, healthz_live, healthz_ready, list_positions, list_schedules,
    my_sessions, my_sessions_ical, root, sessions_soon, stats, trainer_sessions, update_session,
};
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::ical::ICalExporter;
use crate::lifecycle::Scheduler;
use crate::memory_store::MemoryStore;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::openapi::ApiDoc;
use crate::roster::{Roster, StaticRoster};
use crate::settings::Settings;
use crate::validation::validate_lookahead_weeks;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub scheduler: Scheduler,
    pub roster: Arc<dyn Roster>,
    pub exporter: Arc<ICalExporter>,
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let env_filter = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .init();

    let lookahead_weeks = validate_lookahead_weeks(settings.lookahead_weeks)?;

    let roster = match &settings.roster_path {
        Some(path) => {
            let roster = StaticRoster::from_file(path)?;
            info!(path = %path, members = roster.len(), "loaded roster");
            roster
        }
        None => {
            warn!("APP_ROSTER_PATH not set; every request will be rejected as an unknown member");
            StaticRoster::default()
        }
    };

    let notifier: Arc<dyn Notifier> = match &settings.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };
    info!(channel = notifier.channel_name(), "notifications enabled");

    let state = AppState {
        settings: settings.clone(),
        scheduler: Scheduler::new(Arc::new(MemoryStore::new()), notifier, lookahead_weeks),
        roster: Arc::new(roster),
        exporter: Arc::new(ICalExporter::new(settings.calendar_name.clone())),
    };

    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!("Starting Training Scheduler API on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let mut router = Router::new()
        .route("/", get(root))
        .route("/healthz/live", get(healthz_live))
        .route("/healthz/ready", get(healthz_ready))
        .route("/slots", get(get_slots))
        .route("/positions", get(list_positions))
        .route("/sessions", post(create_session))
        .route("/sessions/trainer", get(trainer_sessions))
        .route("/sessions/mine", get(my_sessions))
        .route("/sessions/mine.ical", get(my_sessions_ical))
        .route("/sessions/soon", get(sessions_soon))
        .route("/sessions/{id}", put(update_session).delete(delete_session))
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route("/schedules/{id}", delete(delete_schedule))
        .route(
            "/schedules/{id}/occurrences/{date}",
            put(claim_occurrence).delete(cancel_occurrence),
        )
        .route("/stats", get(stats))
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    router.layer(trace_layer)
}
