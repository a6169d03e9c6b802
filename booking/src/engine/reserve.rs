//! The reserve transaction.
//!
//! Write order:
//!
//! 1. Claim a credit unit for a pre-generated booking id (conditional update:
//!    only while the unit is unconsumed). A lost claim re-runs allocation.
//! 2. Create the booking. On failure the claim is released again.
//! 3. Rank the lesson's bookings; a booking beyond capacity is deleted and
//!    its credit released.
//!
//! When a compensating write fails too, the transaction ends with
//! [`BookingError::Inconsistent`] and an `error!` log naming every id
//! involved.

use super::capacity::{self, Occupancy};
use super::{BookingEngine, resolve_student};
use crate::error::BookingError;
use crate::metrics;
use crate::notify::{LessonNotice, Notification, Recipient};
use crate::types::{Actor, Booking, BookingId, CreditUnit, Lesson, LessonId, Student, StudentId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use studio_core::document_store::DocumentStoreError;
use tracing::{debug, error, info, instrument, warn};

/// Allocation attempts before giving up on a contended credit set.
const MAX_CLAIM_ATTEMPTS: usize = 5;

/// A committed reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// The new booking
    pub booking: Booking,
    /// The booked lesson
    pub lesson: Lesson,
    /// Spots left after this booking
    pub spots_remaining: u32,
    /// The credit unit consumed, `None` for trial bookings
    pub credit_unit: Option<CreditUnit>,
}

impl BookingEngine {
    /// Reserve `lesson_id` for the actor, or for `on_behalf_of` when the
    /// actor is an admin.
    ///
    /// A confirmation is sent to the student after the reservation commits.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: non-admin acting for someone else
    /// - [`BookingError::NotFound`]: unknown lesson or student
    /// - [`BookingError::LessonInPast`], [`BookingError::LessonFull`],
    ///   [`BookingError::DuplicateBooking`]: capacity check failed
    /// - [`BookingError::InsufficientCredits`]: no available credit unit
    /// - [`BookingError::Inconsistent`]: a compensating write failed
    /// - [`BookingError::Store`]: the store failed before anything was written
    #[instrument(skip(self, actor), fields(actor = %actor.id, lesson = %lesson_id))]
    pub async fn reserve(
        &self,
        actor: &Actor,
        lesson_id: LessonId,
        on_behalf_of: Option<StudentId>,
    ) -> Result<Reservation, BookingError> {
        let student_id = resolve_student(actor, on_behalf_of)?;
        let started = Instant::now();

        let result = self.reserve_for(&student_id, lesson_id).await;
        metrics::record_reservation(&result, started.elapsed());

        match &result {
            Ok((reservation, student)) => {
                info!(
                    booking = %reservation.booking.id,
                    student = %student_id,
                    spots_remaining = reservation.spots_remaining,
                    "Lesson reserved"
                );
                self.notify(Notification::BookingConfirmed {
                    recipient: Recipient {
                        name: student.name.clone(),
                        email: student.email.clone(),
                    },
                    lesson: LessonNotice::from(&reservation.lesson),
                });
            }
            Err(e) if e.is_rejection() => debug!(error = %e, student = %student_id, "Reservation rejected"),
            Err(e) => warn!(error = %e, student = %student_id, "Reservation failed"),
        }

        result.map(|(reservation, _)| reservation)
    }

    async fn reserve_for(
        &self,
        student_id: &StudentId,
        lesson_id: LessonId,
    ) -> Result<(Reservation, Student), BookingError> {
        let lesson = self.require_lesson(lesson_id).await?;
        let student = self.require_student(student_id).await?;
        let now = self.now();

        let occupancy = Occupancy {
            booked: self.repo.count_bookings(lesson_id).await?,
            already_booked: self.repo.find_booking(lesson_id, student_id).await?.is_some(),
        };
        capacity::check(&lesson, occupancy, now, self.rules.capacity)?;

        let booking = Booking {
            id: BookingId::new(),
            lesson_id,
            student_id: student_id.clone(),
            created_at: now,
        };

        let unit = self.claim_credit(student_id, booking.id, now).await?;
        debug!(unit = %unit.id, booking = %booking.id, "Credit claimed");

        self.create_claimed_booking(&booking, &unit).await?;

        let spots_remaining = self
            .confirm_capacity(&booking, Some(&unit), occupancy.booked)
            .await?;

        Ok((
            Reservation {
                booking,
                lesson,
                spots_remaining,
                credit_unit: Some(unit),
            },
            student,
        ))
    }

    /// Allocate and claim a unit for `booking`, re-allocating after lost races.
    async fn claim_credit(
        &self,
        student_id: &StudentId,
        booking: BookingId,
        now: DateTime<Utc>,
    ) -> Result<CreditUnit, BookingError> {
        for attempt in 0..MAX_CLAIM_ATTEMPTS {
            let candidate = self.allocate(student_id, now).await?;
            match self.repo.claim_unit(candidate.id, booking, now).await {
                Ok(claimed) => return Ok(claimed),
                Err(DocumentStoreError::PreconditionFailed { .. } | DocumentStoreError::NotFound { .. }) => {
                    metrics::record_claim_conflict();
                    debug!(unit = %candidate.id, attempt, "Credit claimed concurrently, re-allocating");
                }
                Err(e) if e.is_transient() => {
                    return self.settle_uncertain_claim(&candidate, booking, e).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(student = %student_id, "Gave up allocating after repeated claim conflicts");
        Err(BookingError::InsufficientCredits)
    }

    /// A claim timed out: find out whether it was applied.
    async fn settle_uncertain_claim(
        &self,
        candidate: &CreditUnit,
        booking: BookingId,
        cause: DocumentStoreError,
    ) -> Result<CreditUnit, BookingError> {
        match self.repo.unit(candidate.id).await {
            Ok(Some(unit)) if unit.consumed_by == Some(booking) => Ok(unit),
            Ok(_) => Err(cause.into()),
            Err(read_error) => {
                metrics::record_inconsistency("reserve");
                error!(
                    unit = %candidate.id,
                    booking = %booking,
                    claim_error = %cause,
                    read_error = %read_error,
                    "Credit claim outcome unknown; unit may be held by a booking that does not exist"
                );
                Err(BookingError::Inconsistent(format!(
                    "credit unit {} may be claimed by missing booking {booking}",
                    candidate.id
                )))
            }
        }
    }

    /// Create `booking`, releasing `unit` if that fails.
    async fn create_claimed_booking(
        &self,
        booking: &Booking,
        unit: &CreditUnit,
    ) -> Result<(), BookingError> {
        let cause = match self.repo.insert_booking(booking).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => match self.repo.booking(booking.id).await {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => BookingError::Store(e),
                Err(_) => {
                    return Err(self.inconsistent_booking(booking, Some(unit), &e.to_string()));
                }
            },
            Err(DocumentStoreError::Conflict { .. }) => BookingError::DuplicateBooking,
            Err(e) => BookingError::Store(e),
        };

        self.release_for(unit, booking.id, "booking creation failed")
            .await?;
        Err(cause)
    }

    /// Rank `booking` among the lesson's bookings; undo it if over capacity.
    ///
    /// Returns the spots remaining.
    pub(crate) async fn confirm_capacity(
        &self,
        booking: &Booking,
        unit: Option<&CreditUnit>,
        booked_before: u64,
    ) -> Result<u32, BookingError> {
        let bookings = match self.repo.bookings_for_lesson(booking.lesson_id).await {
            Ok(bookings) => bookings,
            Err(e) => {
                warn!(error = %e, booking = %booking.id, "Capacity re-check skipped");
                return Ok(capacity::spots_remaining(self.rules.capacity, booked_before + 1));
            }
        };

        let limit = usize::try_from(self.rules.capacity).unwrap_or(usize::MAX);
        let within = capacity::rank_of(&bookings, booking.id).is_none_or(|rank| rank < limit);
        if within {
            let booked = u64::try_from(bookings.len()).unwrap_or(u64::MAX);
            return Ok(capacity::spots_remaining(self.rules.capacity, booked));
        }

        metrics::record_capacity_rollback();
        warn!(
            booking = %booking.id,
            lesson = %booking.lesson_id,
            booked = bookings.len(),
            "Lesson overfilled by concurrent reservations, rolling back"
        );

        if let Err(e) = self.repo.delete_booking(booking.id).await {
            if !matches!(e, DocumentStoreError::NotFound { .. }) {
                return Err(self.inconsistent_booking(booking, unit, &e.to_string()));
            }
        }
        if let Some(unit) = unit {
            self.release_for(unit, booking.id, "capacity rollback").await?;
        }
        Err(BookingError::LessonFull)
    }

    /// Release `unit` from `booking` as compensation.
    async fn release_for(
        &self,
        unit: &CreditUnit,
        booking: BookingId,
        reason: &'static str,
    ) -> Result<(), BookingError> {
        match self.repo.release_unit(unit.id, booking).await {
            Ok(_) | Err(DocumentStoreError::PreconditionFailed { .. }) => {
                debug!(unit = %unit.id, booking = %booking, reason, "Credit released");
                Ok(())
            }
            Err(e) => {
                metrics::record_inconsistency("reserve");
                error!(
                    unit = %unit.id,
                    booking = %booking,
                    student = %unit.student_id,
                    reason,
                    error = %e,
                    "Failed to release credit; unit stays consumed by a booking that does not exist"
                );
                Err(BookingError::Inconsistent(format!(
                    "credit unit {} still consumed by booking {booking} ({reason})",
                    unit.id
                )))
            }
        }
    }

    fn inconsistent_booking(
        &self,
        booking: &Booking,
        unit: Option<&CreditUnit>,
        detail: &str,
    ) -> BookingError {
        metrics::record_inconsistency("reserve");
        error!(
            booking = %booking.id,
            lesson = %booking.lesson_id,
            student = %booking.student_id,
            unit = ?unit.map(|u| u.id),
            capacity = self.rules.capacity,
            error = detail,
            "Booking state unknown after failed write"
        );
        BookingError::Inconsistent(format!(
            "booking {} for lesson {} needs manual review",
            booking.id, booking.lesson_id
        ))
    }
}
