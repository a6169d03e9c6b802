//! Lesson endpoints.
//!
//! - `POST /api/lessons` (admin)
//! - `DELETE /api/lessons/:id` (admin)
//! - `GET /api/lessons/upcoming`
//! - `GET /api/lessons/archive` (admin)
//! - `POST /api/lessons/reminders` (admin or `x-api-key`)

use super::body;
use crate::auth::{RequireAdmin, SessionUser};
use crate::engine::{ArchivedLesson, LessonDeletion, LessonOverview, NewLesson, ReminderReport};
use crate::server::AppState;
use crate::types::{Lesson, LessonId};
use axum::{
    Json, async_trait,
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, request::Parts},
};
use studio_web::AppError;
use uuid::Uuid;

/// Header carrying the scheduler's shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Schedule a lesson.
///
/// # Errors
///
/// Validation, auth and store errors.
pub async fn create(
    State(state): State<AppState>,
    RequireAdmin(actor): RequireAdmin,
    payload: Result<Json<NewLesson>, JsonRejection>,
) -> Result<(StatusCode, Json<Lesson>), AppError> {
    let new = body(payload)?;
    let lesson = state.engine.create_lesson(&actor, new).await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

/// Delete a lesson and its bookings.
///
/// # Errors
///
/// `400` for a malformed id; auth, not-found and store errors.
pub async fn delete(
    State(state): State<AppState>,
    RequireAdmin(actor): RequireAdmin,
    Path(id): Path<String>,
) -> Result<Json<LessonDeletion>, AppError> {
    let lesson_id = Uuid::parse_str(&id)
        .map(LessonId::from_uuid)
        .map_err(|_| AppError::bad_request("Lesson id must be a UUID"))?;
    Ok(Json(state.engine.delete_lesson(&actor, lesson_id).await?))
}

/// Upcoming lessons with occupancy.
///
/// # Errors
///
/// Auth and store errors.
pub async fn upcoming(
    State(state): State<AppState>,
    SessionUser(actor): SessionUser,
) -> Result<Json<Vec<LessonOverview>>, AppError> {
    Ok(Json(state.engine.upcoming_lessons(&actor).await?))
}

/// Past lessons with booking counts.
///
/// # Errors
///
/// Auth and store errors.
pub async fn archive(
    State(state): State<AppState>,
    RequireAdmin(actor): RequireAdmin,
) -> Result<Json<Vec<ArchivedLesson>>, AppError> {
    Ok(Json(state.engine.lesson_archive(&actor).await?))
}

/// Caller allowed to trigger reminders: the scheduler presenting the
/// shared secret in `x-api-key`, or an admin session.
#[derive(Debug, Clone, Copy)]
pub struct ReminderTrigger;

#[async_trait]
impl FromRequestParts<AppState> for ReminderTrigger {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if has_cron_secret(state, &parts.headers) {
            return Ok(Self);
        }
        RequireAdmin::from_request_parts(parts, state).await?;
        Ok(Self)
    }
}

fn has_cron_secret(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(secret) = state.cron_secret.as_deref() else {
        return false;
    };
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|key| key == secret)
}

/// Send reminders for lessons starting in 24 to 48 hours.
///
/// # Errors
///
/// `401`/`403` without valid credentials; store errors.
pub async fn reminders(
    State(state): State<AppState>,
    _trigger: ReminderTrigger,
) -> Result<Json<ReminderReport>, AppError> {
    Ok(Json(state.engine.send_lesson_reminders().await?))
}
