pub mod rest;
pub mod state;

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use rest::ApiDoc;
use state::AppState;

/// Builds the full application router, Swagger UI included.
pub fn router(app_state: Arc<AppState>) -> Router {
    let user_routes = Router::new()
        .route("/users/{user_id}/stats", get(rest::get_stats_handler))
        .route("/users/{user_id}/xp", post(rest::award_xp_handler))
        .route("/users/{user_id}/streak", post(rest::touch_streak_handler))
        .route("/users/{user_id}/activities", post(rest::record_activity_handler))
        .route("/users/{user_id}/achievements", get(rest::list_achievements_handler))
        .route("/users/{user_id}/xp-events", get(rest::list_xp_events_handler))
        .route("/users/{user_id}/ledger", get(rest::verify_ledger_handler))
        .route("/users/{user_id}/ledger/rebuild", post(rest::rebuild_ledger_handler));

    let mentorship_routes = Router::new()
        .route("/mentorships", post(rest::assign_mentor_handler))
        .route("/mentorships/{mentee_id}", delete(rest::remove_mentor_handler));

    // Maintenance routes are meant for an operator tool, not end users.
    let admin_routes = Router::new()
        .route("/admin/integrity/validate", post(rest::integrity_validate_handler))
        .route("/admin/integrity/clean", post(rest::integrity_clean_handler));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    let api_router = Router::new()
        .merge(user_routes)
        .merge(mentorship_routes)
        .merge(admin_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
