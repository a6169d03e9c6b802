//! Reservation and cancellation transactions against the in-memory store.
//!
//! Run with: `cargo test -p studio-booking --test reserve_cancel`

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use chrono::Duration;
use common::{Harness, admin, booking_store};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use studio_booking::config::BookingRules;
use studio_booking::repository::{BOOKINGS, CREDIT_UNITS};
use studio_booking::types::{BookingId, CreditKind, CreditUnit, CreditUnitId, LessonId, StudentId};
use studio_booking::{BookingError, Notification};
use studio_core::document_store::{
    Collection, Document, DocumentId, DocumentStore, DocumentStoreError, Filter, Patch, Query,
    StoreFuture,
};
use studio_testing::{InMemoryDocumentStore, StoreOp};

const NOTIFY_WAIT: std::time::Duration = std::time::Duration::from_secs(1);

fn database_error() -> DocumentStoreError {
    DocumentStoreError::Database("injected failure".to_string())
}

// ============================================================================
// Reserve
// ============================================================================

#[tokio::test]
async fn test_reserve_takes_last_spot() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let unit = h.credit(&sam, CreditKind::FivePack, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    h.fill(&lesson, 8).await;

    let reservation = h.engine.reserve(&sam, lesson.id, None).await.expect("reserve");

    assert_eq!(reservation.spots_remaining, 0);
    assert_eq!(reservation.lesson, lesson);
    assert_eq!(reservation.booking.student_id, sam.id);
    assert_eq!(h.booking_count(), 9);

    let claimed = h.unit(unit.id).await;
    assert_eq!(claimed.consumed_by, Some(reservation.booking.id));
    assert_eq!(claimed.consumed_at, Some(h.now()));
    assert_eq!(reservation.credit_unit, Some(claimed));
}

#[tokio::test]
async fn test_full_lesson_is_rejected_without_writes() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let unit = h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    h.fill(&lesson, 9).await;

    let err = h.engine.reserve(&sam, lesson.id, None).await.unwrap_err();

    assert_eq!(err, BookingError::LessonFull);
    assert_eq!(h.booking_count(), 9);
    assert_eq!(h.unit(unit.id).await.consumed_by, None);
    assert_eq!(h.store.call_count(StoreOp::Update), 0);
}

#[tokio::test]
async fn test_reserve_without_credit_is_rejected() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    // Expired an hour ago
    h.credit(&sam, CreditKind::Single, Duration::hours(-1)).await;

    let err = h.engine.reserve(&sam, lesson.id, None).await.unwrap_err();

    assert_eq!(err, BookingError::InsufficientCredits);
    assert_eq!(h.booking_count(), 0);
}

#[tokio::test]
async fn test_reserve_consumes_soonest_expiring_unit() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let later = h.credit(&sam, CreditKind::TenPack, Duration::days(60)).await;
    let soonest = h.credit(&sam, CreditKind::FivePack, Duration::days(10)).await;
    let middle = h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;

    let reservation = h.engine.reserve(&sam, lesson.id, None).await.unwrap();

    assert_eq!(reservation.credit_unit.map(|u| u.id), Some(soonest.id));
    assert_eq!(h.unit(later.id).await.consumed_by, None);
    assert_eq!(h.unit(middle.id).await.consumed_by, None);
    assert_eq!(h.available(&sam).await, 2);
}

#[tokio::test]
async fn test_duplicate_and_past_lessons_are_rejected() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    h.credit(&sam, CreditKind::FivePack, Duration::days(30)).await;
    h.credit(&sam, CreditKind::FivePack, Duration::days(30)).await;

    let lesson = h.lesson_in(Duration::days(2)).await;
    h.engine.reserve(&sam, lesson.id, None).await.unwrap();
    let err = h.engine.reserve(&sam, lesson.id, None).await.unwrap_err();
    assert_eq!(err, BookingError::DuplicateBooking);

    let started = h.lesson_in(Duration::zero()).await;
    let err = h.engine.reserve(&sam, started.id, None).await.unwrap_err();
    assert_eq!(err, BookingError::LessonInPast);

    assert_eq!(h.available(&sam).await, 1);
}

#[tokio::test]
async fn test_unknown_lesson_or_student() {
    let h = Harness::new();
    let sam = h.student("sam").await;

    let err = h.engine.reserve(&sam, LessonId::new(), None).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound { resource: "Lesson", .. }));

    let lesson = h.lesson_in(Duration::days(2)).await;
    let stranger = studio_booking::Actor::student("ghost", "Ghost", "ghost@example.com");
    let err = h.engine.reserve(&stranger, lesson.id, None).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound { resource: "Student", .. }));
}

#[tokio::test]
async fn test_acting_for_another_student_requires_admin() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let kim = h.student("kim").await;
    h.credit(&kim, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;

    let err = h
        .engine
        .reserve(&sam, lesson.id, Some(kim.id.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));

    let reservation = h
        .engine
        .reserve(&admin(), lesson.id, Some(kim.id.clone()))
        .await
        .expect("admin reserves for kim");
    assert_eq!(reservation.booking.student_id, kim.id);
    assert_eq!(h.available(&kim).await, 0);
}

#[tokio::test]
async fn test_reserve_notifies_the_student() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;

    h.engine.reserve(&sam, lesson.id, None).await.unwrap();

    let sent = h.notifier.wait_for(1, NOTIFY_WAIT).await;
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0], Notification::BookingConfirmed { .. }));
    assert_eq!(sent[0].recipient().email, sam.email);
    assert_eq!(sent[0].lesson().lesson_id, lesson.id);
}

#[tokio::test]
async fn test_failed_delivery_keeps_reservation() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    h.notifier.set_failing(true);

    let reservation = h.engine.reserve(&sam, lesson.id, None).await;

    assert!(reservation.is_ok());
    assert_eq!(h.notifier.wait_for(1, NOTIFY_WAIT).await.len(), 1);
    assert_eq!(h.booking_count(), 1);
}

#[tokio::test]
async fn test_custom_capacity() {
    let h = Harness::with_rules(BookingRules {
        capacity: 2,
        ..BookingRules::default()
    });
    let sam = h.student("sam").await;
    h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    h.fill(&lesson, 2).await;

    let err = h.engine.reserve(&sam, lesson.id, None).await.unwrap_err();
    assert_eq!(err, BookingError::LessonFull);
}

// ============================================================================
// Claim races and compensation
// ============================================================================

#[tokio::test]
async fn test_lost_claim_reallocates() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let unit = h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    h.store.fail_next_in(
        StoreOp::Update,
        CREDIT_UNITS,
        DocumentStoreError::PreconditionFailed {
            collection: CREDIT_UNITS,
            id: DocumentId::new(unit.id.to_string()),
        },
    );

    let reservation = h.engine.reserve(&sam, lesson.id, None).await.expect("second claim wins");

    assert_eq!(reservation.credit_unit.map(|u| u.id), Some(unit.id));
    assert_eq!(h.store.call_count(StoreOp::Update), 2);
}

#[tokio::test]
async fn test_timed_out_claim_that_did_not_apply_fails_cleanly() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let unit = h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    h.store
        .fail_next_in(StoreOp::Update, CREDIT_UNITS, DocumentStoreError::Timeout(50));

    let err = h.engine.reserve(&sam, lesson.id, None).await.unwrap_err();

    assert_eq!(err, BookingError::Store(DocumentStoreError::Timeout(50)));
    assert_eq!(h.unit(unit.id).await.consumed_by, None);
    assert_eq!(h.booking_count(), 0);
}

#[tokio::test]
async fn test_failed_booking_write_releases_credit() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let unit = h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    h.store.fail_next_in(StoreOp::Create, BOOKINGS, database_error());

    let err = h.engine.reserve(&sam, lesson.id, None).await.unwrap_err();

    assert_eq!(err, BookingError::Store(database_error()));
    assert_eq!(h.booking_count(), 0);
    assert_eq!(h.unit(unit.id).await.consumed_by, None);
    assert!(h.notifier.wait_for(1, std::time::Duration::from_millis(50)).await.is_empty());
}

#[tokio::test]
async fn test_failed_compensation_is_reported_inconsistent() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let unit = h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    h.store.fail_next_in(StoreOp::Create, BOOKINGS, database_error());
    // The claim goes through, the release after the failed create does not
    h.store
        .fail_nth_in(StoreOp::Update, CREDIT_UNITS, 1, database_error());

    let err = h.engine.reserve(&sam, lesson.id, None).await.unwrap_err();

    assert!(matches!(err, BookingError::Inconsistent(_)));
    assert!(!err.is_rejection());
    assert_eq!(h.booking_count(), 0);
    assert!(h.unit(unit.id).await.consumed_by.is_some());
}

/// Store whose first booking count is stale, as if concurrent reservations
/// landed between the capacity check and the write.
struct StaleBookingCount {
    inner: InMemoryDocumentStore,
    stale: AtomicBool,
}

impl DocumentStore for StaleBookingCount {
    fn get(&self, collection: Collection, id: DocumentId) -> StoreFuture<'_, Option<Document>> {
        self.inner.get(collection, id)
    }

    fn list(&self, collection: Collection, query: Query) -> StoreFuture<'_, Vec<Document>> {
        self.inner.list(collection, query)
    }

    fn count(&self, collection: Collection, filters: Vec<Filter>) -> StoreFuture<'_, u64> {
        if collection == BOOKINGS && self.stale.swap(false, Ordering::SeqCst) {
            return Box::pin(async { Ok(0) });
        }
        self.inner.count(collection, filters)
    }

    fn create(&self, collection: Collection, document: Document) -> StoreFuture<'_, Document> {
        self.inner.create(collection, document)
    }

    fn update(
        &self,
        collection: Collection,
        id: DocumentId,
        patch: Patch,
        precondition: Vec<Filter>,
    ) -> StoreFuture<'_, Document> {
        self.inner.update(collection, id, patch, precondition)
    }

    fn delete(&self, collection: Collection, id: DocumentId) -> StoreFuture<'_, ()> {
        self.inner.delete(collection, id)
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        self.inner.ping()
    }
}

#[tokio::test]
async fn test_overfilled_lesson_rolls_back_latest_booking() {
    let store = booking_store();
    let backend = Arc::new(StaleBookingCount {
        inner: store.clone(),
        stale: AtomicBool::new(true),
    });
    let h = Harness::over(backend, store, BookingRules::default());
    let sam = h.student("sam").await;
    let unit = h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    let earlier = h.fill(&lesson, 9).await;

    let err = h.engine.reserve(&sam, lesson.id, None).await.unwrap_err();

    assert_eq!(err, BookingError::LessonFull);
    assert_eq!(h.booking_count(), 9);
    let remaining = h.engine.repository().bookings_for_lesson(lesson.id).await.unwrap();
    assert!(remaining.iter().all(|b| earlier.contains(b)));
    assert_eq!(h.unit(unit.id).await.consumed_by, None);
}

// ============================================================================
// Cancel
// ============================================================================

#[tokio::test]
async fn test_cancel_returns_credit() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let unit = h.credit(&sam, CreditKind::FivePack, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(3)).await;
    let reservation = h.engine.reserve(&sam, lesson.id, None).await.unwrap();
    assert_eq!(h.available(&sam).await, 0);

    let cancellation = h
        .engine
        .cancel(&sam, reservation.booking.id, None)
        .await
        .expect("cancel");

    assert!(cancellation.credit_released);
    assert_eq!(cancellation.lesson_id, lesson.id);
    assert_eq!(h.booking_count(), 0);
    let released = h.unit(unit.id).await;
    assert_eq!(released.consumed_by, None);
    assert_eq!(released.consumed_at, None);
    assert_eq!(h.available(&sam).await, 1);

    let sent = h.notifier.wait_for(2, NOTIFY_WAIT).await;
    assert!(sent.iter().any(|n| matches!(n, Notification::BookingCancelled { .. })));
}

#[tokio::test]
async fn test_cancel_after_credit_expiry_releases_but_does_not_restore() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let unit = h.credit(&sam, CreditKind::Single, Duration::days(3)).await;
    let lesson = h.lesson_in(Duration::days(10)).await;
    let reservation = h.engine.reserve(&sam, lesson.id, None).await.unwrap();
    assert_eq!(reservation.credit_unit.map(|u| u.id), Some(unit.id));

    h.clock.advance(Duration::days(4));
    let cancellation = h
        .engine
        .cancel(&sam, reservation.booking.id, None)
        .await
        .expect("cancel");

    assert!(cancellation.credit_released);
    assert_eq!(h.booking_count(), 0);
    let released = h.unit(unit.id).await;
    assert_eq!(released.consumed_by, None);
    assert!(released.valid_to < h.now());
    assert_eq!(h.available(&sam).await, 0);

    let other = h.lesson_in(Duration::days(2)).await;
    let err = h.engine.reserve(&sam, other.id, None).await.unwrap_err();
    assert_eq!(err, BookingError::InsufficientCredits);
}

#[tokio::test]
async fn test_unknown_credit_kind_survives_reserve_and_cancel() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let unit = CreditUnit::issue_until(
        CreditUnitId::new(),
        sam.id.clone(),
        CreditKind::Other,
        h.now(),
        h.now() + Duration::days(30),
    );
    let mut document = Document::encode(unit.id.into(), &unit).unwrap();
    document
        .data
        .insert("kind".to_string(), serde_json::Value::from("credit_gift"));
    h.store.create(CREDIT_UNITS, document).await.unwrap();
    let lesson = h.lesson_in(Duration::days(3)).await;

    let reservation = h.engine.reserve(&sam, lesson.id, None).await.unwrap();
    assert_eq!(reservation.credit_unit.map(|u| u.kind), Some(CreditKind::Other));
    h.engine
        .cancel(&sam, reservation.booking.id, None)
        .await
        .expect("cancel");

    let stored = h.store.documents(CREDIT_UNITS);
    assert_eq!(stored.len(), 1);
    assert_eq!(
        stored[0].field("kind").and_then(serde_json::Value::as_str),
        Some("credit_gift")
    );
    assert_eq!(h.available(&sam).await, 1);
}

#[tokio::test]
async fn test_cancellation_window_boundary() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    h.credit(&sam, CreditKind::TenPack, Duration::days(30)).await;
    h.credit(&sam, CreditKind::TenPack, Duration::days(30)).await;

    let open = h.lesson_in(Duration::hours(24) + Duration::minutes(1)).await;
    let closed = h.lesson_in(Duration::hours(23) + Duration::minutes(59)).await;
    let open_booking = h.engine.reserve(&sam, open.id, None).await.unwrap().booking;
    let closed_booking = h.engine.reserve(&sam, closed.id, None).await.unwrap().booking;

    h.engine
        .cancel(&sam, open_booking.id, None)
        .await
        .expect("outside the window");

    let err = h.engine.cancel(&sam, closed_booking.id, None).await.unwrap_err();
    assert_eq!(err, BookingError::CancellationWindowClosed { hours: 24 });
    assert_eq!(h.booking_count(), 1);
}

#[tokio::test]
async fn test_admin_cancels_inside_window() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::hours(2)).await;
    let booking = h.engine.reserve(&sam, lesson.id, None).await.unwrap().booking;

    let cancellation = h
        .engine
        .cancel(&admin(), booking.id, Some(sam.id.clone()))
        .await
        .expect("admin override");

    assert!(cancellation.credit_released);
    assert_eq!(h.available(&sam).await, 1);
}

#[tokio::test]
async fn test_cancel_someone_elses_booking_is_forbidden() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let kim = h.student("kim").await;
    h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(3)).await;
    let booking = h.engine.reserve(&sam, lesson.id, None).await.unwrap().booking;

    let err = h.engine.cancel(&kim, booking.id, None).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));

    // An admin naming the wrong student does not get the override
    let err = h
        .engine
        .cancel(&admin(), booking.id, Some(StudentId::new("kim")))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));
    assert_eq!(h.booking_count(), 1);
}

#[tokio::test]
async fn test_cancel_unknown_booking() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let err = h.engine.cancel(&sam, BookingId::new(), None).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound { resource: "Booking", .. }));
}

#[tokio::test]
async fn test_cancel_trial_booking_without_credit() {
    let h = Harness::new();
    let lesson = h.lesson_in(Duration::days(3)).await;
    let trial = h
        .engine
        .book_trial_lesson(
            &admin(),
            studio_booking::engine::TrialRequest {
                name: "Tess".to_string(),
                email: "tess@example.com".to_string(),
                lesson_id: lesson.id,
            },
        )
        .await
        .unwrap();

    let cancellation = h
        .engine
        .cancel(&admin(), trial.booking.id, None)
        .await
        .unwrap();

    assert!(!cancellation.credit_released);
    assert_eq!(h.booking_count(), 0);
}

#[tokio::test]
async fn test_failed_delete_reclaims_credit() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let unit = h.credit(&sam, CreditKind::Single, Duration::days(30)).await;
    let lesson = h.lesson_in(Duration::days(3)).await;
    let booking = h.engine.reserve(&sam, lesson.id, None).await.unwrap().booking;
    h.store.fail_next_in(StoreOp::Delete, BOOKINGS, database_error());

    let err = h.engine.cancel(&sam, booking.id, None).await.unwrap_err();

    assert_eq!(err, BookingError::Store(database_error()));
    assert_eq!(h.booking_count(), 1);
    assert_eq!(h.unit(unit.id).await.consumed_by, Some(booking.id));
}

#[tokio::test]
async fn test_reserve_cancel_round_trip_keeps_credit_count() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    for days in [5, 10, 20] {
        h.credit(&sam, CreditKind::FivePack, Duration::days(days)).await;
    }
    let lessons = [
        h.lesson_in(Duration::days(2)).await,
        h.lesson_in(Duration::days(3)).await,
    ];

    let mut bookings = Vec::new();
    for lesson in &lessons {
        bookings.push(h.engine.reserve(&sam, lesson.id, None).await.unwrap().booking);
    }
    assert_eq!(h.available(&sam).await, 1);

    for booking in &bookings {
        h.engine.cancel(&sam, booking.id, None).await.unwrap();
    }
    assert_eq!(h.available(&sam).await, 3);
    assert_eq!(h.booking_count(), 0);
}
