//! Outbound notifications for booking events.
//!
//! Notifications are sent after the transaction that caused them has
//! committed. [`dispatch`] runs delivery on its own task; a failed delivery
//! is logged and counted, and never changes the operation's result.

use crate::types::{Lesson, LessonId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

/// Future returned by [`Notifier::send`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Notification delivery errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The provider rejected or could not deliver the message.
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Who receives a notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Recipient {
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

/// Lesson details rendered into a notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonNotice {
    /// Lesson id
    pub lesson_id: LessonId,
    /// Display label
    pub label: String,
    /// Address
    pub location: &'static str,
    /// Start time
    pub starts_at: DateTime<Utc>,
}

impl From<&Lesson> for LessonNotice {
    fn from(lesson: &Lesson) -> Self {
        Self {
            lesson_id: lesson.id,
            label: lesson.label(),
            location: lesson.location(),
            starts_at: lesson.starts_at,
        }
    }
}

/// A message to a student about one lesson.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A booking was made
    BookingConfirmed {
        /// Student
        recipient: Recipient,
        /// Booked lesson
        lesson: LessonNotice,
    },
    /// A booking was cancelled
    BookingCancelled {
        /// Student
        recipient: Recipient,
        /// Lesson that was booked
        lesson: LessonNotice,
    },
    /// A booked lesson is coming up
    LessonReminder {
        /// Student
        recipient: Recipient,
        /// Upcoming lesson
        lesson: LessonNotice,
    },
}

impl Notification {
    /// The recipient.
    #[must_use]
    pub const fn recipient(&self) -> &Recipient {
        match self {
            Self::BookingConfirmed { recipient, .. }
            | Self::BookingCancelled { recipient, .. }
            | Self::LessonReminder { recipient, .. } => recipient,
        }
    }

    /// The lesson the notification is about.
    #[must_use]
    pub const fn lesson(&self) -> &LessonNotice {
        match self {
            Self::BookingConfirmed { lesson, .. }
            | Self::BookingCancelled { lesson, .. }
            | Self::LessonReminder { lesson, .. } => lesson,
        }
    }

    /// Short name for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BookingConfirmed { .. } => "booking_confirmed",
            Self::BookingCancelled { .. } => "booking_cancelled",
            Self::LessonReminder { .. } => "lesson_reminder",
        }
    }
}

/// Delivery channel for notifications.
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    fn send(&self, notification: Notification) -> NotifyFuture<'_>;
}

/// Deliver `notification` in the background.
///
/// Must be called from within a tokio runtime.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        let kind = notification.kind();
        let lesson_id = notification.lesson().lesson_id;
        match notifier.send(notification).await {
            Ok(()) => crate::metrics::record_notification(kind, true),
            Err(e) => {
                warn!(error = %e, kind, %lesson_id, "Notification delivery failed");
                crate::metrics::record_notification(kind, false);
            }
        }
    });
}

/// Notifier that writes messages to the log.
#[derive(Clone, Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    /// Create a new console notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Notifier for ConsoleNotifier {
    fn send(&self, notification: Notification) -> NotifyFuture<'_> {
        Box::pin(async move {
            let recipient = notification.recipient();
            let lesson = notification.lesson();
            info!(
                kind = notification.kind(),
                to = %recipient.email,
                lesson = %lesson.label,
                location = lesson.location,
                starts_at = %lesson.starts_at,
                "Notification (console delivery)"
            );
            Ok(())
        })
    }
}

/// Notifier that keeps every message in memory.
///
/// Used in tests to observe what would have been sent.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following delivery fail (messages are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until at least `count` messages were recorded or `timeout` passes.
    pub async fn wait_for(&self, count: usize, timeout: std::time::Duration) -> Vec<Notification> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: Notification) -> NotifyFuture<'_> {
        Box::pin(async move {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification);
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError::Delivery("recording notifier set to fail".into()));
            }
            Ok(())
        })
    }
}
