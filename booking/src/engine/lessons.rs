//! Lesson administration and lesson-centric reads.
//!
//! Deleting a lesson cascades through [`BookingEngine::remove_booking`], so
//! every booking gives its credit back before the lesson disappears.

use super::capacity::{self, Occupancy};
use super::{BookingEngine, require_admin, resolve_student};
use crate::error::BookingError;
use crate::notify::{LessonNotice, Notification, Recipient};
use crate::types::{
    Actor, Booking, BookingId, Lesson, LessonId, LessonKind, Student, StudentId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use studio_core::document_store::{Direction, DocumentStoreError};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Input of [`BookingEngine::create_lesson`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLesson {
    /// Start time
    pub starts_at: DateTime<Utc>,
    /// Kind of lesson
    pub kind: LessonKind,
    /// Teacher, required for guest lessons
    #[serde(default)]
    pub teacher: Option<String>,
}

/// Lesson fields shown next to bookings and credits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSummary {
    /// Lesson id
    pub id: LessonId,
    /// Start time
    pub starts_at: DateTime<Utc>,
    /// Kind of lesson
    pub kind: LessonKind,
    /// Teacher, if any
    pub teacher: Option<String>,
    /// Display label
    pub label: String,
}

impl From<&Lesson> for LessonSummary {
    fn from(lesson: &Lesson) -> Self {
        Self {
            id: lesson.id,
            starts_at: lesson.starts_at,
            kind: lesson.kind,
            teacher: lesson.teacher.clone(),
            label: lesson.label(),
        }
    }
}

/// A booked student as shown to admins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    /// Student id
    pub id: StudentId,
    /// Booking held by the student
    pub booking_id: BookingId,
    /// Name, empty if the student record is gone
    pub name: String,
    /// Email, empty if the student record is gone
    pub email: String,
}

/// An upcoming lesson with its occupancy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonOverview {
    /// The lesson
    pub lesson: Lesson,
    /// Display label
    pub label: String,
    /// Address
    pub location: &'static str,
    /// Bookings held
    pub booked_count: u32,
    /// Free spots
    pub spots_remaining: u32,
    /// Whether the caller holds a booking
    pub booked_by_me: bool,
    /// The caller's booking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_booking_id: Option<BookingId>,
    /// Booked students, admins only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub students: Option<Vec<StudentSummary>>,
}

/// A past lesson and how many attended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedLesson {
    /// The lesson
    pub lesson: Lesson,
    /// Display label
    pub label: String,
    /// Bookings held
    pub booking_count: u32,
}

/// Outcome of a cascading lesson deletion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDeletion {
    /// The deleted lesson
    pub lesson_id: LessonId,
    /// Bookings removed with it
    pub deleted_bookings: u32,
    /// Credit units returned to students
    pub released_credits: u32,
}

/// Input of [`BookingEngine::book_trial_lesson`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRequest {
    /// Guest name
    pub name: String,
    /// Guest email
    pub email: String,
    /// Lesson to attend
    pub lesson_id: LessonId,
}

/// A committed trial booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialBooking {
    /// The guest student created for the trial
    pub student: Student,
    /// The credit-less booking
    pub booking: Booking,
    /// Spots left after this booking
    pub spots_remaining: u32,
}

/// A booking with its lesson, as listed to students.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    /// Booking id
    pub booking_id: BookingId,
    /// When it was made
    pub created_at: DateTime<Utc>,
    /// The lesson
    pub lesson: LessonSummary,
    /// Address
    pub location: &'static str,
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl BookingEngine {
    /// Schedule a lesson.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: caller is not an admin
    /// - [`BookingError::Validation`]: guest lesson without a teacher
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor, new), fields(actor = %actor.id))]
    pub async fn create_lesson(&self, actor: &Actor, new: NewLesson) -> Result<Lesson, BookingError> {
        require_admin(actor)?;
        let teacher = new
            .teacher
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if new.kind == LessonKind::Guest && teacher.is_none() {
            return Err(BookingError::validation("Guest lessons need a teacher"));
        }

        let lesson = Lesson {
            id: LessonId::new(),
            starts_at: new.starts_at,
            kind: new.kind,
            teacher,
        };
        self.repo.insert_lesson(&lesson).await?;
        info!(lesson = %lesson.id, starts_at = %lesson.starts_at, "Lesson created");
        Ok(lesson)
    }

    /// Delete a lesson with all its bookings, releasing their credits.
    ///
    /// Stops at the first booking that cannot be removed; bookings removed
    /// before that stay removed and the lesson stays in place.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: caller is not an admin
    /// - [`BookingError::NotFound`]: unknown lesson
    /// - [`BookingError::Inconsistent`]: a booking was left without its credit
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor), fields(actor = %actor.id, lesson = %lesson_id))]
    pub async fn delete_lesson(&self, actor: &Actor, lesson_id: LessonId) -> Result<LessonDeletion, BookingError> {
        require_admin(actor)?;
        self.require_lesson(lesson_id).await?;

        let mut deletion = LessonDeletion {
            lesson_id,
            deleted_bookings: 0,
            released_credits: 0,
        };
        for booking in self.repo.bookings_for_lesson(lesson_id).await? {
            match self.remove_booking(&booking).await {
                Ok(released) => {
                    deletion.deleted_bookings += 1;
                    deletion.released_credits += u32::from(released);
                }
                Err(e) => {
                    warn!(
                        booking = %booking.id,
                        removed = deletion.deleted_bookings,
                        error = %e,
                        "Lesson deletion stopped"
                    );
                    return Err(e);
                }
            }
        }

        match self.repo.delete_lesson(lesson_id).await {
            Ok(()) | Err(DocumentStoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            bookings = deletion.deleted_bookings,
            credits = deletion.released_credits,
            "Lesson deleted"
        );
        Ok(deletion)
    }

    /// Lessons starting from now on, earliest first.
    ///
    /// Admins also see who booked each lesson.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn upcoming_lessons(&self, actor: &Actor) -> Result<Vec<LessonOverview>, BookingError> {
        let lessons = self
            .repo
            .lessons_between(Some(self.now()), None, Direction::Ascending)
            .await?;
        let lesson_ids: Vec<_> = lessons.iter().map(|l| l.id).collect();
        let mut by_lesson: HashMap<LessonId, Vec<Booking>> = HashMap::new();
        for booking in self.repo.bookings_for_lessons(&lesson_ids).await? {
            by_lesson.entry(booking.lesson_id).or_default().push(booking);
        }

        let students: HashMap<StudentId, Student> = if actor.is_admin {
            let mut ids: Vec<_> = by_lesson
                .values()
                .flatten()
                .map(|b| b.student_id.clone())
                .collect();
            ids.sort_unstable();
            ids.dedup();
            self.repo
                .students_by_id(&ids)
                .await?
                .into_iter()
                .map(|s| (s.id.clone(), s))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(lessons
            .into_iter()
            .map(|lesson| {
                let mut bookings = by_lesson.remove(&lesson.id).unwrap_or_default();
                bookings.sort_unstable_by_key(Booking::rank_key);
                let mine = bookings.iter().find(|b| b.student_id == actor.id).map(|b| b.id);
                let booked = u64::try_from(bookings.len()).unwrap_or(u64::MAX);
                let listed = actor.is_admin.then(|| {
                    bookings
                        .iter()
                        .map(|b| {
                            let student = students.get(&b.student_id);
                            StudentSummary {
                                id: b.student_id.clone(),
                                booking_id: b.id,
                                name: student.map(|s| s.name.clone()).unwrap_or_default(),
                                email: student.map(|s| s.email.clone()).unwrap_or_default(),
                            }
                        })
                        .collect()
                });
                LessonOverview {
                    label: lesson.label(),
                    location: lesson.location(),
                    booked_count: count(bookings.len()),
                    spots_remaining: capacity::spots_remaining(self.rules.capacity, booked),
                    booked_by_me: mine.is_some(),
                    my_booking_id: mine,
                    students: listed,
                    lesson,
                }
            })
            .collect())
    }

    /// Lessons that have started, earliest first, with booking counts.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: caller is not an admin
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn lesson_archive(&self, actor: &Actor) -> Result<Vec<ArchivedLesson>, BookingError> {
        require_admin(actor)?;
        let lessons = self
            .repo
            .lessons_between(None, Some(self.now()), Direction::Ascending)
            .await?;
        let lesson_ids: Vec<_> = lessons.iter().map(|l| l.id).collect();
        let mut counts: HashMap<LessonId, u32> = HashMap::new();
        for booking in self.repo.bookings_for_lessons(&lesson_ids).await? {
            *counts.entry(booking.lesson_id).or_default() += 1;
        }

        Ok(lessons
            .into_iter()
            .map(|lesson| ArchivedLesson {
                label: lesson.label(),
                booking_count: counts.get(&lesson.id).copied().unwrap_or(0),
                lesson,
            })
            .collect())
    }

    /// Book a lesson for a first-time guest without consuming a credit.
    ///
    /// A guest student named `"<name> (trial)"` is created for the booking.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: caller is not an admin
    /// - [`BookingError::Validation`]: empty name or email
    /// - [`BookingError::NotFound`]: unknown lesson
    /// - [`BookingError::LessonInPast`], [`BookingError::LessonFull`]: capacity check failed
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor, request), fields(actor = %actor.id, lesson = %request.lesson_id))]
    pub async fn book_trial_lesson(&self, actor: &Actor, request: TrialRequest) -> Result<TrialBooking, BookingError> {
        require_admin(actor)?;
        let name = request.name.trim();
        let email = request.email.trim();
        if name.is_empty() {
            return Err(BookingError::validation("Name is required"));
        }
        if email.is_empty() {
            return Err(BookingError::validation("Email is required"));
        }

        let lesson = self.require_lesson(request.lesson_id).await?;
        let now = self.now();
        let occupancy = Occupancy {
            booked: self.repo.count_bookings(lesson.id).await?,
            already_booked: false,
        };
        capacity::check(&lesson, occupancy, now, self.rules.capacity)?;

        let student = Student {
            id: StudentId::new(format!("trial-{}", Uuid::new_v4())),
            name: format!("{name} (trial)"),
            email: email.to_string(),
            phone: None,
            date_of_birth: None,
            legacy_credits: None,
            created_at: now,
        };
        self.repo.insert_student(&student).await?;

        let booking = Booking {
            id: BookingId::new(),
            lesson_id: lesson.id,
            student_id: student.id.clone(),
            created_at: now,
        };
        self.repo.insert_booking(&booking).await?;
        let spots_remaining = self.confirm_capacity(&booking, None, occupancy.booked).await?;

        info!(booking = %booking.id, student = %student.id, "Trial lesson booked");
        self.notify(Notification::BookingConfirmed {
            recipient: Recipient {
                name: student.name.clone(),
                email: student.email.clone(),
            },
            lesson: LessonNotice::from(&lesson),
        });

        Ok(TrialBooking {
            student,
            booking,
            spots_remaining,
        })
    }

    /// Bookings of a student with their lessons, soonest lesson first.
    ///
    /// Bookings whose lesson no longer exists are left out.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: non-admin listing someone else's bookings
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn student_bookings(
        &self,
        actor: &Actor,
        student_id: Option<StudentId>,
    ) -> Result<Vec<BookingView>, BookingError> {
        let student_id = resolve_student(actor, student_id)?;
        let bookings = self.repo.bookings_for_student(&student_id).await?;
        let lesson_ids: Vec<_> = bookings.iter().map(|b| b.lesson_id).collect();
        let lessons: HashMap<_, _> = self
            .repo
            .lessons_by_id(&lesson_ids)
            .await?
            .into_iter()
            .map(|l| (l.id, l))
            .collect();

        let mut views: Vec<_> = bookings
            .into_iter()
            .filter_map(|booking| {
                let lesson = lessons.get(&booking.lesson_id)?;
                Some(BookingView {
                    booking_id: booking.id,
                    created_at: booking.created_at,
                    lesson: LessonSummary::from(lesson),
                    location: lesson.location(),
                })
            })
            .collect();
        views.sort_by_key(|view| (view.lesson.starts_at, view.booking_id));
        Ok(views)
    }
}
