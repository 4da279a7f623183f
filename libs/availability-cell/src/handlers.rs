use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::NaiveDate;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{BatchAvailabilityRequest, CreateExceptionRequest, CreatePatternRequest, UpdatePatternRequest};
use crate::services::{exceptions::ExceptionService, patterns::PatternService, slots::SlotService};

const DEFAULT_SLOT_DURATION_MINUTES: i64 = 60;

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
    pub duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    /// Admins may manage another practitioner's schedule.
    pub practitioner_id: Option<Uuid>,
}

/// Resolve whose schedule is being managed: admins may act on any
/// practitioner, everyone else falls back to their own id.
fn resolve_target_practitioner(user: &User, requested: Option<Uuid>) -> Result<Uuid, AppError> {
    let own = Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Invalid user id in token".to_string()))?;

    match requested {
        Some(other) if other != own && !user.is_admin() => Ok(own),
        Some(other) => Ok(other),
        None => Ok(own),
    }
}

fn success_body<T: serde::Serialize>(value: &T) -> Result<Json<Value>, AppError> {
    let mut body = serde_json::to_value(value).map_err(|e| AppError::Internal(e.to_string()))?;
    body["success"] = json!(true);
    Ok(Json(body))
}

// ==============================================================================
// SLOT RESOLUTION
// ==============================================================================

#[axum::debug_handler]
pub async fn get_practitioner_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(practitioner_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let slot_service = SlotService::new(&state);

    let duration = query.duration.unwrap_or(DEFAULT_SLOT_DURATION_MINUTES);
    let day = slot_service
        .compute_slots(practitioner_id, query.date, duration, auth.token())
        .await?;

    success_body(&day)
}

#[axum::debug_handler]
pub async fn batch_availability(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<BatchAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let slot_service = SlotService::new(&state);

    let duration = request
        .duration_minutes
        .unwrap_or(DEFAULT_SLOT_DURATION_MINUTES);
    let days = slot_service
        .batch_availability(
            &request.practitioner_ids,
            &request.dates,
            duration,
            auth.token(),
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "availability": days
    })))
}

// ==============================================================================
// PATTERN MANAGEMENT
// ==============================================================================

#[axum::debug_handler]
pub async fn list_patterns(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(scope): Query<ScopeQuery>,
) -> Result<Json<Value>, AppError> {
    let practitioner_id = resolve_target_practitioner(&user, scope.practitioner_id)?;
    let pattern_service = PatternService::new(&state);

    let patterns = pattern_service
        .list_patterns(practitioner_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "patterns": patterns
    })))
}

#[axum::debug_handler]
pub async fn create_pattern(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(scope): Query<ScopeQuery>,
    Json(request): Json<CreatePatternRequest>,
) -> Result<Json<Value>, AppError> {
    let practitioner_id = resolve_target_practitioner(&user, scope.practitioner_id)?;
    let pattern_service = PatternService::new(&state);

    let pattern = pattern_service
        .create_pattern(practitioner_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Availability pattern added",
        "id": pattern.id
    })))
}

#[axum::debug_handler]
pub async fn update_pattern(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(pattern_id): Path<Uuid>,
    Json(request): Json<UpdatePatternRequest>,
) -> Result<Json<Value>, AppError> {
    let pattern_service = PatternService::new(&state);

    pattern_service
        .update_pattern(pattern_id, request, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Availability pattern updated"
    })))
}

#[axum::debug_handler]
pub async fn delete_pattern(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(pattern_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let pattern_service = PatternService::new(&state);

    pattern_service
        .delete_pattern(pattern_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Availability pattern deleted"
    })))
}

// ==============================================================================
// EXCEPTION MANAGEMENT
// ==============================================================================

#[axum::debug_handler]
pub async fn list_exceptions(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(scope): Query<ScopeQuery>,
) -> Result<Json<Value>, AppError> {
    let practitioner_id = resolve_target_practitioner(&user, scope.practitioner_id)?;
    let exception_service = ExceptionService::new(&state);

    let exceptions = exception_service
        .list_exceptions(practitioner_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "exceptions": exceptions
    })))
}

#[axum::debug_handler]
pub async fn create_exceptions(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(scope): Query<ScopeQuery>,
    Json(request): Json<CreateExceptionRequest>,
) -> Result<Json<Value>, AppError> {
    let practitioner_id = resolve_target_practitioner(&user, scope.practitioner_id)?;
    let exception_service = ExceptionService::new(&state);

    let created = exception_service
        .create_exceptions(practitioner_id, request, auth.token())
        .await?;

    let message = if created.count > 0 {
        format!(
            "{} date{} blocked successfully",
            created.count,
            if created.count > 1 { "s" } else { "" }
        )
    } else {
        "All dates were already blocked".to_string()
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "count": created.count,
        "ids": created.ids
    })))
}

#[axum::debug_handler]
pub async fn delete_exception(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(exception_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let exception_service = ExceptionService::new(&state);

    exception_service
        .delete_exception(exception_id, auth.token())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Availability exception deleted"
    })))
}
