//! Booking endpoints.
//!
//! - `POST /api/bookings/reserve`
//! - `POST /api/bookings/cancel`
//! - `POST /api/bookings/list`
//! - `POST /api/bookings/trial` (admin)

use super::body;
use crate::auth::{RequireAdmin, SessionUser};
use crate::engine::{BookingView, Cancellation, Reservation, TrialBooking, TrialRequest};
use crate::server::AppState;
use crate::types::{BookingId, LessonId, StudentId};
use axum::{Json, extract::State, extract::rejection::JsonRejection, http::StatusCode};
use serde::Deserialize;
use studio_web::AppError;

/// Body of `POST /bookings/reserve`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    /// Lesson to book
    pub lesson_id: LessonId,
    /// Student to book for (admins only)
    #[serde(default)]
    pub on_behalf_of_student_id: Option<StudentId>,
}

/// Body of `POST /bookings/cancel`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    /// Booking to cancel
    pub booking_id: BookingId,
    /// Student the booking belongs to (admins only)
    #[serde(default)]
    pub on_behalf_of_student_id: Option<StudentId>,
}

/// Body of `POST /bookings/list`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    /// Student whose bookings to list (admins only)
    #[serde(default)]
    pub student_id: Option<StudentId>,
}

/// Reserve a lesson, consuming the soonest-expiring credit.
///
/// # Errors
///
/// Validation, auth and booking-rule errors, see [`crate::error::BookingError`].
pub async fn reserve(
    State(state): State<AppState>,
    SessionUser(actor): SessionUser,
    payload: Result<Json<ReserveRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    let request = body(payload)?;
    let reservation = state
        .engine
        .reserve(&actor, request.lesson_id, request.on_behalf_of_student_id)
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// Cancel a booking and return its credit.
///
/// # Errors
///
/// Validation, auth and booking-rule errors, see [`crate::error::BookingError`].
pub async fn cancel(
    State(state): State<AppState>,
    SessionUser(actor): SessionUser,
    payload: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Json<Cancellation>, AppError> {
    let request = body(payload)?;
    let cancellation = state
        .engine
        .cancel(&actor, request.booking_id, request.on_behalf_of_student_id)
        .await?;
    Ok(Json(cancellation))
}

/// List a student's bookings with their lessons.
///
/// # Errors
///
/// Validation, auth and store errors.
pub async fn list(
    State(state): State<AppState>,
    SessionUser(actor): SessionUser,
    payload: Result<Json<ListRequest>, JsonRejection>,
) -> Result<Json<Vec<BookingView>>, AppError> {
    let request = body(payload)?;
    Ok(Json(state.engine.student_bookings(&actor, request.student_id).await?))
}

/// Book a trial lesson for a new guest.
///
/// # Errors
///
/// Validation, auth and booking-rule errors.
pub async fn trial(
    State(state): State<AppState>,
    RequireAdmin(actor): RequireAdmin,
    payload: Result<Json<TrialRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TrialBooking>), AppError> {
    let request = body(payload)?;
    let trial = state.engine.book_trial_lesson(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(trial)))
}
