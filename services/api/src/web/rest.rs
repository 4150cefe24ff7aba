//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use progression_core::domain::XpEventKind;
use progression_core::level::{level_progress, xp_for_next_level};
use progression_core::{
    AchievementProgress, Activity, MentorshipPairing, PortError, UnlockedAchievement, UserStats,
    XpEvent, XpReason,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        get_stats_handler,
        award_xp_handler,
        touch_streak_handler,
        record_activity_handler,
        list_achievements_handler,
        list_xp_events_handler,
        verify_ledger_handler,
        rebuild_ledger_handler,
        assign_mentor_handler,
        remove_mentor_handler,
        integrity_validate_handler,
        integrity_clean_handler,
    ),
    components(
        schemas(
            StatsResponse, AwardRequest, AwardResponse, StreakResponse, ActivityRequest,
            ActivityKind, ActivityResponse, AchievementsResponse, XpEventsResponse,
            LedgerResponse, AssignMentorRequest, PairingResponse, ValidateResponse,
            CleanResponse
        )
    ),
    tags(
        (name = "Progression Engine API", description = "XP, levels, streaks, achievements, mentor bonuses and integrity maintenance.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Translates an engine error into the status code and message returned to the client.
fn port_error(context: &str, e: PortError) -> (StatusCode, String) {
    let status = match &e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::DuplicateId { .. } | PortError::VersionConflict { .. } => StatusCode::CONFLICT,
        PortError::InvalidInput(_) | PortError::InvalidReference(_) => StatusCode::BAD_REQUEST,
        PortError::StoreUnavailable(_) | PortError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        PortError::Serialization(_) | PortError::Unexpected(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        error!("{}: {:?}", context, e);
    } else {
        warn!("{}: {}", context, e);
    }
    (status, format!("{}: {}", context, e))
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A user's progression state.
#[derive(Serialize, ToSchema)]
pub struct StatsResponse {
    user_id: String,
    total_xp: i64,
    level: u32,
    xp_for_next_level: i64,
    level_progress: f64,
    current_streak: u32,
    longest_streak: u32,
    last_activity_date: Option<i64>,
    total_courses_completed: u32,
    total_modules_completed: u32,
    total_assessments_passed: u32,
    average_score: f64,
    unlocked_achievements: Vec<String>,
}

impl From<UserStats> for StatsResponse {
    fn from(stats: UserStats) -> Self {
        Self {
            xp_for_next_level: xp_for_next_level(stats.total_xp),
            level_progress: level_progress(stats.total_xp),
            user_id: stats.user_id,
            total_xp: stats.total_xp,
            level: stats.level,
            current_streak: stats.current_streak,
            longest_streak: stats.longest_streak,
            last_activity_date: stats.last_activity_date,
            total_courses_completed: stats.total_courses_completed,
            total_modules_completed: stats.total_modules_completed,
            total_assessments_passed: stats.total_assessments_passed,
            average_score: stats.average_score,
            unlocked_achievements: stats.unlocked_achievements,
        }
    }
}

/// The payload for awarding XP.
#[derive(Deserialize, ToSchema)]
pub struct AwardRequest {
    amount: i64,
    #[schema(value_type = String, example = "lesson")]
    kind: XpEventKind,
    label: String,
}

#[derive(Serialize, ToSchema)]
pub struct AwardResponse {
    new_total_xp: i64,
    new_level: u32,
    leveled_up: bool,
    previous_level: u32,
    #[schema(value_type = Vec<Object>)]
    unlocked: Vec<UnlockedAchievement>,
    mentor_id: Option<String>,
    mentor_bonus: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct StreakResponse {
    current_streak: u32,
}

#[derive(Deserialize, ToSchema, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    CourseCompleted,
    ModuleCompleted,
    AssessmentPassed,
}

/// The payload for recording a non-XP activity. `score` is required for assessments.
#[derive(Deserialize, ToSchema)]
pub struct ActivityRequest {
    kind: ActivityKind,
    score: Option<f64>,
}

#[derive(Serialize, ToSchema)]
pub struct ActivityResponse {
    stats: StatsResponse,
    #[schema(value_type = Vec<Object>)]
    unlocked: Vec<UnlockedAchievement>,
}

#[derive(Serialize, ToSchema)]
pub struct AchievementsResponse {
    #[schema(value_type = Vec<Object>)]
    achievements: Vec<AchievementProgress>,
}

#[derive(Serialize, ToSchema)]
pub struct XpEventsResponse {
    #[schema(value_type = Vec<Object>)]
    events: Vec<XpEvent>,
}

#[derive(Serialize, ToSchema)]
pub struct LedgerResponse {
    stored_total: i64,
    ledger_total: i64,
    bonus_total: i64,
    consistent: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct AssignMentorRequest {
    mentor_id: String,
    mentee_id: String,
    assigned_by: String,
}

#[derive(Serialize, ToSchema)]
pub struct PairingResponse {
    pairing_id: String,
    mentor_id: String,
    mentee_id: String,
    assigned_at: i64,
    assigned_by: String,
    active: bool,
}

impl From<MentorshipPairing> for PairingResponse {
    fn from(pairing: MentorshipPairing) -> Self {
        Self {
            active: pairing.is_active(),
            pairing_id: pairing.id,
            mentor_id: pairing.mentor_id,
            mentee_id: pairing.mentee_id,
            assigned_at: pairing.assigned_at,
            assigned_by: pairing.assigned_by,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ValidateResponse {
    is_valid: bool,
    issues: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct CleanResponse {
    teams_fixed: usize,
    groups_fixed: usize,
    pairings_removed: usize,
    progress_removed: usize,
    total_fixes: usize,
    fixes: Vec<String>,
}

//=========================================================================================
// Progression Handlers
//=========================================================================================

/// Get a user's stats, creating zero-valued stats on first read.
#[utoipa::path(
    get,
    path = "/users/{user_id}/stats",
    params(("user_id" = String, Path, description = "The user's id.")),
    responses(
        (status = 200, description = "Current stats", body = StatsResponse),
        (status = 503, description = "Backing store unavailable")
    )
)]
pub async fn get_stats_handler(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let stats = app_state
        .engine
        .get_user_stats(&user_id)
        .await
        .map_err(|e| port_error("Failed to load stats", e))?;
    Ok(Json(StatsResponse::from(stats)))
}

/// Award XP to a user.
#[utoipa::path(
    post,
    path = "/users/{user_id}/xp",
    params(("user_id" = String, Path, description = "The user's id.")),
    request_body = AwardRequest,
    responses(
        (status = 200, description = "XP awarded", body = AwardResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Concurrent writers kept conflicting"),
        (status = 503, description = "Backing store unavailable")
    )
)]
pub async fn award_xp_handler(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<AwardRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let result = app_state
        .engine
        .award(&user_id, req.amount, XpReason::new(req.kind, req.label))
        .await
        .map_err(|e| port_error("Failed to award XP", e))?;

    let (mentor_id, mentor_bonus) = match result.mentor_bonus {
        Some(bonus) => (Some(bonus.mentor_id), Some(bonus.bonus)),
        None => (None, None),
    };
    Ok(Json(AwardResponse {
        new_total_xp: result.new_total_xp,
        new_level: result.new_level,
        leveled_up: result.leveled_up,
        previous_level: result.previous_level,
        unlocked: result.unlocked,
        mentor_id,
        mentor_bonus,
    }))
}

/// Count today's activity towards the user's streak.
#[utoipa::path(
    post,
    path = "/users/{user_id}/streak",
    params(("user_id" = String, Path, description = "The user's id.")),
    responses(
        (status = 200, description = "Streak after this touch", body = StreakResponse),
        (status = 503, description = "Backing store unavailable")
    )
)]
pub async fn touch_streak_handler(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let current_streak = app_state
        .engine
        .touch_streak(&user_id)
        .await
        .map_err(|e| port_error("Failed to update streak", e))?;
    Ok(Json(StreakResponse { current_streak }))
}

/// Record a completed course, module or passed assessment.
#[utoipa::path(
    post,
    path = "/users/{user_id}/activities",
    params(("user_id" = String, Path, description = "The user's id.")),
    request_body = ActivityRequest,
    responses(
        (status = 200, description = "Activity recorded", body = ActivityResponse),
        (status = 400, description = "Invalid request")
    )
)]
pub async fn record_activity_handler(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<ActivityRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let activity = match (req.kind, req.score) {
        (ActivityKind::CourseCompleted, _) => Activity::CourseCompleted,
        (ActivityKind::ModuleCompleted, _) => Activity::ModuleCompleted,
        (ActivityKind::AssessmentPassed, Some(score)) => Activity::AssessmentPassed { score },
        (ActivityKind::AssessmentPassed, None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                "score is required for assessment_passed".to_string(),
            ))
        }
    };

    let result = app_state
        .engine
        .record_activity(&user_id, activity)
        .await
        .map_err(|e| port_error("Failed to record activity", e))?;
    Ok(Json(ActivityResponse {
        stats: result.stats.into(),
        unlocked: result.unlocked,
    }))
}

/// List the visible achievements with the user's progress towards each.
#[utoipa::path(
    get,
    path = "/users/{user_id}/achievements",
    params(("user_id" = String, Path, description = "The user's id.")),
    responses((status = 200, description = "Achievement progress", body = AchievementsResponse))
)]
pub async fn list_achievements_handler(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let achievements = app_state
        .engine
        .achievement_progress(&user_id)
        .await
        .map_err(|e| port_error("Failed to list achievements", e))?;
    Ok(Json(AchievementsResponse { achievements }))
}

/// List the user's XP events, newest first.
#[utoipa::path(
    get,
    path = "/users/{user_id}/xp-events",
    params(("user_id" = String, Path, description = "The user's id.")),
    responses((status = 200, description = "XP history", body = XpEventsResponse))
)]
pub async fn list_xp_events_handler(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let events = app_state
        .engine
        .xp_history(&user_id)
        .await
        .map_err(|e| port_error("Failed to load XP history", e))?;
    Ok(Json(XpEventsResponse { events }))
}

/// Compare the user's stored XP total against the event ledger.
#[utoipa::path(
    get,
    path = "/users/{user_id}/ledger",
    params(("user_id" = String, Path, description = "The user's id.")),
    responses((status = 200, description = "Ledger comparison", body = LedgerResponse))
)]
pub async fn verify_ledger_handler(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let check = app_state
        .engine
        .verify_ledger(&user_id)
        .await
        .map_err(|e| port_error("Failed to verify ledger", e))?;
    Ok(Json(LedgerResponse {
        stored_total: check.stored_total,
        ledger_total: check.ledger_total,
        bonus_total: check.bonus_total,
        consistent: check.consistent,
    }))
}

/// Rewrite the user's stored XP total from the event ledger.
#[utoipa::path(
    post,
    path = "/users/{user_id}/ledger/rebuild",
    params(("user_id" = String, Path, description = "The user's id.")),
    responses((status = 200, description = "Ledger comparison after the rebuild", body = LedgerResponse))
)]
pub async fn rebuild_ledger_handler(
    State(app_state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let check = app_state
        .engine
        .rebuild_total(&user_id)
        .await
        .map_err(|e| port_error("Failed to rebuild ledger total", e))?;
    Ok(Json(LedgerResponse {
        stored_total: check.stored_total,
        ledger_total: check.ledger_total,
        bonus_total: check.bonus_total,
        consistent: check.consistent,
    }))
}

//=========================================================================================
// Mentorship Handlers
//=========================================================================================

/// Pair a mentee with a mentor.
#[utoipa::path(
    post,
    path = "/mentorships",
    request_body = AssignMentorRequest,
    responses(
        (status = 201, description = "Pairing created", body = PairingResponse),
        (status = 400, description = "A user cannot mentor themselves"),
        (status = 409, description = "The mentee already has an active mentor")
    )
)]
pub async fn assign_mentor_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<AssignMentorRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let pairing = app_state
        .engine
        .assign_mentor(&req.mentor_id, &req.mentee_id, &req.assigned_by)
        .await
        .map_err(|e| port_error("Failed to assign mentor", e))?;
    Ok((StatusCode::CREATED, Json(PairingResponse::from(pairing))))
}

/// End the mentee's active pairing.
#[utoipa::path(
    delete,
    path = "/mentorships/{mentee_id}",
    params(("mentee_id" = String, Path, description = "The mentee's id.")),
    responses(
        (status = 200, description = "Pairing removed", body = PairingResponse),
        (status = 404, description = "No active pairing")
    )
)]
pub async fn remove_mentor_handler(
    State(app_state): State<Arc<AppState>>,
    Path(mentee_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let pairing = app_state
        .engine
        .remove_mentor(&mentee_id)
        .await
        .map_err(|e| port_error("Failed to remove mentor", e))?;
    Ok(Json(PairingResponse::from(pairing)))
}

//=========================================================================================
// Maintenance Handlers
//=========================================================================================

/// Report dangling references without changing anything.
#[utoipa::path(
    post,
    path = "/admin/integrity/validate",
    responses((status = 200, description = "Validation report", body = ValidateResponse))
)]
pub async fn integrity_validate_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let report = app_state
        .engine
        .run_integrity_validate()
        .await
        .map_err(|e| port_error("Integrity validation failed", e))?;
    Ok(Json(ValidateResponse {
        is_valid: report.is_valid,
        issues: report.issues,
    }))
}

/// Repair dangling references.
#[utoipa::path(
    post,
    path = "/admin/integrity/clean",
    responses((status = 200, description = "Repair report", body = CleanResponse))
)]
pub async fn integrity_clean_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let report = app_state
        .engine
        .run_integrity_clean()
        .await
        .map_err(|e| port_error("Integrity clean failed", e))?;
    Ok(Json(CleanResponse {
        total_fixes: report.total_fixes(),
        teams_fixed: report.teams_fixed,
        groups_fixed: report.groups_fixed,
        pairings_removed: report.pairings_removed,
        progress_removed: report.progress_removed,
        fixes: report.fixes,
    }))
}
