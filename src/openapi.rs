use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::handlers::{
    ClaimOccurrenceBody, CreateScheduleBody, CreateSessionBody, SessionAction, UpdateSessionBody,
};
use crate::models::{
    Position, PositionInfo, Role, Schedule, ScheduleException, Session, SessionStatus, Slot,
    TrainerStats, VirtualSlot,
};

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let Some(components) = openapi.components.as_mut() else {
            return;
        };
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
        components.add_security_scheme(
            "query_token",
            SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("token"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz_live,
        crate::handlers::healthz_ready,
        crate::handlers::get_slots,
        crate::handlers::list_positions,
        crate::handlers::create_session,
        crate::handlers::update_session,
        crate::handlers::delete_session,
        crate::handlers::claim_occurrence,
        crate::handlers::cancel_occurrence,
        crate::handlers::list_schedules,
        crate::handlers::create_schedule,
        crate::handlers::delete_schedule,
        crate::handlers::trainer_sessions,
        crate::handlers::my_sessions,
        crate::handlers::my_sessions_ical,
        crate::handlers::sessions_soon,
        crate::handlers::stats
    ),
    components(schemas(
        Slot,
        VirtualSlot,
        Session,
        SessionStatus,
        Schedule,
        ScheduleException,
        Position,
        PositionInfo,
        Role,
        TrainerStats,
        CreateSessionBody,
        UpdateSessionBody,
        SessionAction,
        ClaimOccurrenceBody,
        CreateScheduleBody
    )),
    tags(
        (name = "scheduling", description = "Slot listing and service operations"),
        (name = "sessions", description = "Training session lifecycle"),
        (name = "schedules", description = "Recurring weekly availability")
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;
