//! Booking engine errors and their HTTP mapping.
//!
//! Business-rule rejections are returned as-is and never retried: the same
//! request under the same conditions fails the same way. Store failures carry
//! the underlying [`DocumentStoreError`]; transient ones were already retried
//! by the store layer before they reach here.

use axum::http::StatusCode;
use studio_core::document_store::DocumentStoreError;
use studio_web::AppError;
use thiserror::Error;

/// Errors returned by booking engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Malformed or missing input.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A referenced lesson, booking or student does not exist.
    #[error("{resource} {id} not found")]
    NotFound {
        /// Kind of record
        resource: &'static str,
        /// Requested id
        id: String,
    },

    /// The caller may not perform this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The lesson has no spots left.
    #[error("Lesson is full")]
    LessonFull,

    /// The student already holds a booking for this lesson.
    #[error("Student already booked this lesson")]
    DuplicateBooking,

    /// The lesson has already started.
    #[error("Lesson has already started")]
    LessonInPast,

    /// No unconsumed, unexpired credit unit is left.
    #[error("No available credits")]
    InsufficientCredits,

    /// Too close to the lesson start for a student to cancel.
    #[error("Cancellation window has closed ({hours}h before the lesson)")]
    CancellationWindowClosed {
        /// Window length in hours
        hours: i64,
    },

    /// A multi-document write stopped halfway and compensation failed.
    ///
    /// Needs manual reconciliation; the details were logged.
    #[error("Inconsistent state: {0}")]
    Inconsistent(String),

    /// The document store failed.
    #[error(transparent)]
    Store(#[from] DocumentStoreError),
}

impl BookingError {
    /// Shorthand for [`BookingError::NotFound`].
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`BookingError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for [`BookingError::Forbidden`].
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Whether this is a business-rule rejection rather than a failure.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        !matches!(self, Self::Inconsistent(_) | Self::Store(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::LessonFull => "lesson_full",
            Self::DuplicateBooking => "duplicate_booking",
            Self::LessonInPast => "lesson_in_past",
            Self::InsufficientCredits => "insufficient_credits",
            Self::CancellationWindowClosed { .. } => "window_closed",
            Self::Inconsistent(_) => "inconsistent",
            Self::Store(_) => "store_error",
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        let message = err.to_string();
        match err {
            BookingError::Validation(msg) => Self::bad_request(msg),
            BookingError::NotFound { resource, id } => Self::not_found(resource, id),
            BookingError::Forbidden(msg) => Self::forbidden(msg),
            BookingError::LessonFull => {
                Self::rule_violation(StatusCode::CONFLICT, "LESSON_FULL", message)
            }
            BookingError::DuplicateBooking => {
                Self::rule_violation(StatusCode::CONFLICT, "DUPLICATE_BOOKING", message)
            }
            BookingError::LessonInPast => {
                Self::rule_violation(StatusCode::UNPROCESSABLE_ENTITY, "LESSON_IN_PAST", message)
            }
            BookingError::InsufficientCredits => {
                Self::rule_violation(StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_CREDITS", message)
            }
            BookingError::CancellationWindowClosed { .. } => Self::rule_violation(
                StatusCode::UNPROCESSABLE_ENTITY,
                "CANCELLATION_WINDOW_CLOSED",
                message,
            ),
            BookingError::Inconsistent(detail) => {
                Self::rule_violation(StatusCode::INTERNAL_SERVER_ERROR, "INCONSISTENT_STATE", message)
                    .with_source(anyhow::anyhow!(detail))
            }
            BookingError::Store(store) => store.into(),
        }
    }
}
