//! The cancel transaction.
//!
//! Write order: release the credit unit held by the booking (conditional on
//! it still pointing at this booking), then delete the booking. If the
//! delete fails the released units are claimed back for the booking.

use super::BookingEngine;
use crate::error::BookingError;
use crate::metrics;
use crate::notify::{LessonNotice, Notification, Recipient};
use crate::types::{Actor, Booking, BookingId, CreditUnit, LessonId, StudentId};
use serde::Serialize;
use std::time::Instant;
use studio_core::document_store::DocumentStoreError;
use tracing::{debug, error, info, instrument, warn};

/// A committed cancellation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    /// The deleted booking
    pub booking_id: BookingId,
    /// Lesson the booking was for
    pub lesson_id: LessonId,
    /// Whether a credit unit was returned to the student
    pub credit_released: bool,
}

impl BookingEngine {
    /// Cancel a booking.
    ///
    /// The booking's own student may cancel until the cancellation window
    /// opens. An admin may cancel any booking at any time; when
    /// `on_behalf_of` is given it must name the booking's student.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`]: unknown booking or its lesson is gone
    /// - [`BookingError::Forbidden`]: caller is neither owner nor admin
    /// - [`BookingError::CancellationWindowClosed`]: student too late
    /// - [`BookingError::Inconsistent`]: a compensating write failed
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor), fields(actor = %actor.id, booking = %booking_id))]
    pub async fn cancel(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        on_behalf_of: Option<StudentId>,
    ) -> Result<Cancellation, BookingError> {
        let started = Instant::now();
        let result = self.cancel_as(actor, booking_id, on_behalf_of).await;
        metrics::record_cancellation(&result, started.elapsed());

        match result {
            Ok((cancellation, notification)) => {
                info!(
                    lesson = %cancellation.lesson_id,
                    credit_released = cancellation.credit_released,
                    "Booking cancelled"
                );
                if let Some(notification) = notification {
                    self.notify(notification);
                }
                Ok(cancellation)
            }
            Err(e) => {
                if e.is_rejection() {
                    debug!(error = %e, "Cancellation rejected");
                } else {
                    warn!(error = %e, "Cancellation failed");
                }
                Err(e)
            }
        }
    }

    async fn cancel_as(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        on_behalf_of: Option<StudentId>,
    ) -> Result<(Cancellation, Option<Notification>), BookingError> {
        let booking = self.require_booking(booking_id).await?;
        let lesson = self.require_lesson(booking.lesson_id).await?;
        let student = self.repo.student(&booking.student_id).await?;

        let as_admin = actor.is_admin
            && on_behalf_of
                .as_ref()
                .is_none_or(|target| *target == booking.student_id);
        if !as_admin && (actor.id != booking.student_id || on_behalf_of.is_some_and(|t| t != actor.id)) {
            return Err(BookingError::forbidden("Booking belongs to another student"));
        }

        let now = self.now();
        if !as_admin && now >= lesson.starts_at - self.rules.cancellation_window() {
            return Err(BookingError::CancellationWindowClosed {
                hours: self.rules.cancellation_window_hours,
            });
        }

        let credit_released = self.remove_booking(&booking).await?;

        let notification = student.map(|student| Notification::BookingCancelled {
            recipient: Recipient {
                name: student.name,
                email: student.email,
            },
            lesson: LessonNotice::from(&lesson),
        });

        Ok((
            Cancellation {
                booking_id,
                lesson_id: lesson.id,
                credit_released,
            },
            notification,
        ))
    }

    /// Release the booking's credit and delete the booking.
    ///
    /// Returns whether a credit unit was released. Used by cancellation and
    /// by the lesson deletion cascade.
    pub(crate) async fn remove_booking(&self, booking: &Booking) -> Result<bool, BookingError> {
        let released = self.release_booking_credits(booking).await?;

        let delete_error = match self.repo.delete_booking(booking.id).await {
            Ok(()) | Err(DocumentStoreError::NotFound { .. }) => return Ok(!released.is_empty()),
            Err(e) if e.is_transient() => match self.repo.booking(booking.id).await {
                Ok(None) => return Ok(!released.is_empty()),
                Ok(Some(_)) => e,
                Err(read_error) => {
                    metrics::record_inconsistency("cancel");
                    error!(
                        booking = %booking.id,
                        student = %booking.student_id,
                        released = ?released.iter().map(|u| u.id).collect::<Vec<_>>(),
                        delete_error = %e,
                        read_error = %read_error,
                        "Booking delete outcome unknown after releasing its credit"
                    );
                    return Err(BookingError::Inconsistent(format!(
                        "booking {} may still exist without its credit",
                        booking.id
                    )));
                }
            },
            Err(e) => e,
        };

        self.reclaim(&released, booking).await?;
        Err(delete_error.into())
    }

    /// Release every unit consumed by `booking`, returning them as they were.
    async fn release_booking_credits(&self, booking: &Booking) -> Result<Vec<CreditUnit>, BookingError> {
        let units = self.repo.units_consumed_by(booking.id).await?;
        match units.len() {
            0 => debug!(booking = %booking.id, "No credit linked to booking, nothing to release"),
            1 => {}
            n => warn!(booking = %booking.id, units = n, "Booking holds several credit units, releasing all"),
        }

        let mut released = Vec::with_capacity(units.len());
        for unit in units {
            match self.repo.release_unit(unit.id, booking.id).await {
                Ok(_) => released.push(unit),
                Err(DocumentStoreError::PreconditionFailed { .. } | DocumentStoreError::NotFound { .. }) => {
                    debug!(unit = %unit.id, "Credit already released");
                }
                Err(e) if e.is_transient() => match self.repo.unit(unit.id).await {
                    Ok(Some(current)) if current.consumed_by != Some(booking.id) => released.push(unit),
                    _ => {
                        self.reclaim(&released, booking).await?;
                        return Err(e.into());
                    }
                },
                Err(e) => {
                    self.reclaim(&released, booking).await?;
                    return Err(e.into());
                }
            }
        }
        Ok(released)
    }

    /// Claim `units` back for `booking` after a failed cancellation step.
    async fn reclaim(&self, units: &[CreditUnit], booking: &Booking) -> Result<(), BookingError> {
        for unit in units {
            let consumed_at = unit.consumed_at.unwrap_or(booking.created_at);
            if let Err(e) = self.repo.claim_unit(unit.id, booking.id, consumed_at).await {
                metrics::record_inconsistency("cancel");
                error!(
                    unit = %unit.id,
                    booking = %booking.id,
                    student = %booking.student_id,
                    lesson = %booking.lesson_id,
                    error = %e,
                    "Failed to re-claim credit; booking remains without its credit"
                );
                return Err(BookingError::Inconsistent(format!(
                    "booking {} lost credit unit {}",
                    booking.id, unit.id
                )));
            }
        }
        Ok(())
    }
}
