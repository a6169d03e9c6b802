//! The booking and credit allocation engine.
//!
//! [`BookingEngine`] owns the transactions that touch more than one
//! document: reserving a lesson, cancelling a booking, cascading a lesson
//! deletion and granting credits. The store only guarantees single-document
//! atomicity, so every transaction orders its writes, uses conditional
//! updates on credit units and compensates when a later step fails.
//!
//! | operation | module |
//! |-----------|--------|
//! | `reserve` | [`reserve`] |
//! | `cancel` | [`cancel`] |
//! | credit top-up, welcome grant, history, summary, legacy migration | [`credits`] |
//! | lesson administration, trial lessons, student bookings | [`lessons`] |
//! | registration, profile, stats | [`students`] |
//! | revenue report | [`revenue`] |
//! | lesson reminders | [`reminders`] |

pub mod allocator;
pub mod cancel;
pub mod capacity;
pub mod credits;
pub mod lessons;
pub mod pricing;
pub mod reminders;
pub mod reserve;
pub mod revenue;
pub mod students;

pub use cancel::Cancellation;
pub use credits::{CreditHistory, CreditHistoryEntry, CreditStatus, MigrationReport, WelcomeOutcome};
pub use lessons::{
    ArchivedLesson, BookingView, LessonDeletion, LessonOverview, LessonSummary, NewLesson,
    StudentSummary, TrialBooking, TrialRequest,
};
pub use pricing::PriceTable;
pub use reminders::ReminderReport;
pub use reserve::Reservation;
pub use revenue::{Bucket, RevenueBucket, RevenueReport};
pub use students::{ProfileUpdate, Registration, RegisterStudent, StudentStats};

use crate::config::BookingRules;
use crate::error::BookingError;
use crate::notify::{self, Notification, Notifier};
use crate::repository::Repository;
use crate::types::{Actor, Booking, BookingId, Lesson, LessonId, Student, StudentId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use studio_core::document_store::DocumentStore;
use studio_core::environment::Clock;

/// Booking engine shared by all request handlers.
#[derive(Clone)]
pub struct BookingEngine {
    repo: Repository,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    rules: BookingRules,
    prices: PriceTable,
}

impl BookingEngine {
    /// Create an engine over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        rules: BookingRules,
    ) -> Self {
        Self {
            repo: Repository::new(store),
            clock,
            notifier,
            prices: PriceTable::new(rules.revenue_per_booking),
            rules,
        }
    }

    /// Typed store access.
    #[must_use]
    pub const fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Active booking rules.
    #[must_use]
    pub const fn rules(&self) -> &BookingRules {
        &self.rules
    }

    /// Shared credit price table.
    #[must_use]
    pub const fn prices(&self) -> &PriceTable {
        &self.prices
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn notify(&self, notification: Notification) {
        notify::dispatch(&self.notifier, notification);
    }

    async fn require_lesson(&self, id: LessonId) -> Result<Lesson, BookingError> {
        self.repo
            .lesson(id)
            .await?
            .ok_or_else(|| BookingError::not_found("Lesson", id))
    }

    async fn require_booking(&self, id: BookingId) -> Result<Booking, BookingError> {
        self.repo
            .booking(id)
            .await?
            .ok_or_else(|| BookingError::not_found("Booking", id))
    }

    async fn require_student(&self, id: &StudentId) -> Result<Student, BookingError> {
        self.repo
            .student(id)
            .await?
            .ok_or_else(|| BookingError::not_found("Student", id))
    }
}

/// Fail unless `actor` is an administrator.
pub(crate) fn require_admin(actor: &Actor) -> Result<(), BookingError> {
    if actor.is_admin {
        Ok(())
    } else {
        Err(BookingError::forbidden("Administrator role required"))
    }
}

/// The student an operation acts for.
///
/// Acting for someone else requires the admin role.
pub(crate) fn resolve_student(
    actor: &Actor,
    on_behalf_of: Option<StudentId>,
) -> Result<StudentId, BookingError> {
    match on_behalf_of {
        None => Ok(actor.id.clone()),
        Some(student) if student == actor.id || actor.is_admin => Ok(student),
        Some(_) => Err(BookingError::forbidden(
            "Only administrators can act on behalf of another student",
        )),
    }
}
