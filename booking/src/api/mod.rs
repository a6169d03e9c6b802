//! HTTP handlers, grouped by area.
//!
//! Request bodies are camelCase JSON. Malformed bodies and query strings
//! answer `400 VALIDATION_ERROR`; engine errors map through
//! [`BookingError`](crate::error::BookingError).

pub mod bookings;
pub mod credits;
pub mod lessons;
pub mod revenue;
pub mod students;

use axum::Json;
use axum::extract::Query;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use studio_web::AppError;

/// Unwrap a JSON body, turning a rejection into a validation error.
pub(crate) fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

/// Unwrap a query string, turning a rejection into a validation error.
pub(crate) fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}
