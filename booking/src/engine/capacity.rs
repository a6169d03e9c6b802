//! Capacity checks for a lesson.
//!
//! [`check`] is advisory: two reservations can pass it concurrently. The
//! reserve transaction therefore ranks the lesson's bookings again after
//! creating its own and rolls back if it landed beyond capacity
//! ([`rank_of`]).

use crate::error::BookingError;
use crate::types::{Booking, BookingId, Lesson};
use chrono::{DateTime, Utc};

/// What the store said about a lesson just before reserving.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Occupancy {
    /// Bookings currently held
    pub booked: u64,
    /// Whether the reserving student already holds one of them
    pub already_booked: bool,
}

/// Whether a new booking of `lesson` may proceed.
///
/// # Errors
///
/// In order of precedence: [`BookingError::LessonInPast`] unless the lesson
/// starts strictly after `now`, [`BookingError::LessonFull`] when `booked`
/// reached `capacity`, [`BookingError::DuplicateBooking`] when the student is
/// already booked.
pub fn check(
    lesson: &Lesson,
    occupancy: Occupancy,
    now: DateTime<Utc>,
    capacity: u32,
) -> Result<(), BookingError> {
    if lesson.starts_at <= now {
        return Err(BookingError::LessonInPast);
    }
    if occupancy.booked >= u64::from(capacity) {
        return Err(BookingError::LessonFull);
    }
    if occupancy.already_booked {
        return Err(BookingError::DuplicateBooking);
    }
    Ok(())
}

/// Spots left given `booked` bookings.
#[must_use]
pub fn spots_remaining(capacity: u32, booked: u64) -> u32 {
    u32::try_from(u64::from(capacity).saturating_sub(booked)).unwrap_or(0)
}

/// Zero-based position of booking `id` when bookings are ranked by
/// (`createdAt`, `id`).
///
/// A booking whose rank is at least the capacity is over the limit.
#[must_use]
pub fn rank_of(bookings: &[Booking], id: BookingId) -> Option<usize> {
    let mut ranked: Vec<_> = bookings.iter().map(Booking::rank_key).collect();
    ranked.sort_unstable();
    ranked.iter().position(|(_, booking)| *booking == id)
}
