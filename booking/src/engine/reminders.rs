//! Lesson reminders for booked students.

use super::BookingEngine;
use crate::error::BookingError;
use crate::notify::{LessonNotice, Notification, Recipient};
use chrono::Duration;
use serde::Serialize;
use std::collections::HashMap;
use studio_core::document_store::Direction;
use tracing::{info, instrument, warn};

/// Start of the reminder window, relative to now.
const WINDOW_START_HOURS: i64 = 24;
/// End of the reminder window, relative to now.
const WINDOW_END_HOURS: i64 = 48;

/// What a reminder run dispatched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderReport {
    /// Lessons in the window
    pub lessons: u32,
    /// Reminders handed to the notifier
    pub notifications: u32,
}

impl BookingEngine {
    /// Remind every booked student of lessons starting 24 to 48 hours from now.
    ///
    /// Delivery is fire-and-forget; the report counts dispatched reminders.
    /// Bookings whose student record is gone are skipped.
    ///
    /// # Errors
    ///
    /// [`BookingError::Store`] if the lessons or bookings cannot be read.
    #[instrument(skip(self))]
    pub async fn send_lesson_reminders(&self) -> Result<ReminderReport, BookingError> {
        let now = self.now();
        let lessons = self
            .repo
            .lessons_between(
                Some(now + Duration::hours(WINDOW_START_HOURS)),
                Some(now + Duration::hours(WINDOW_END_HOURS)),
                Direction::Ascending,
            )
            .await?;

        let mut report = ReminderReport {
            lessons: u32::try_from(lessons.len()).unwrap_or(u32::MAX),
            notifications: 0,
        };
        if lessons.is_empty() {
            return Ok(report);
        }

        let lesson_ids: Vec<_> = lessons.iter().map(|l| l.id).collect();
        let bookings = self.repo.bookings_for_lessons(&lesson_ids).await?;
        let mut student_ids: Vec<_> = bookings.iter().map(|b| b.student_id.clone()).collect();
        student_ids.sort_unstable();
        student_ids.dedup();
        let students: HashMap<_, _> = self
            .repo
            .students_by_id(&student_ids)
            .await?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        let lessons: HashMap<_, _> = lessons.iter().map(|l| (l.id, l)).collect();

        for booking in &bookings {
            let (Some(lesson), Some(student)) =
                (lessons.get(&booking.lesson_id), students.get(&booking.student_id))
            else {
                warn!(booking = %booking.id, "Reminder skipped, student record missing");
                continue;
            };
            self.notify(Notification::LessonReminder {
                recipient: Recipient {
                    name: student.name.clone(),
                    email: student.email.clone(),
                },
                lesson: LessonNotice::from(*lesson),
            });
            report.notifications += 1;
        }

        info!(
            lessons = report.lessons,
            notifications = report.notifications,
            "Lesson reminders dispatched"
        );
        Ok(report)
    }
}
