//! Revenue report over reservations made through the engine.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use chrono::Duration;
use common::{Harness, admin};
use studio_booking::engine::{Bucket, TrialRequest};
use studio_booking::types::{CreditKind, Money};
use studio_booking::{Actor, BookingError, Lesson};

/// Two lessons a week apart: three paid bookings and one trial.
async fn booked_week(h: &Harness) -> (Lesson, Lesson, Actor) {
    let sam = h.student("sam").await;
    let kim = h.student("kim").await;
    h.credit(&sam, CreditKind::FivePack, Duration::days(20)).await;
    h.credit(&sam, CreditKind::TenPack, Duration::days(40)).await;
    h.credit(&kim, CreditKind::FivePack, Duration::days(20)).await;

    // 2025-01-03 and 2025-01-09
    let first = h.lesson_in(Duration::days(2)).await;
    let second = h.lesson_in(Duration::days(8)).await;
    h.engine.reserve(&sam, first.id, None).await.unwrap();
    h.engine.reserve(&kim, first.id, None).await.unwrap();
    h.engine.reserve(&sam, second.id, None).await.unwrap();
    h.engine
        .book_trial_lesson(
            &admin(),
            TrialRequest {
                name: "Tess".to_string(),
                email: "tess@example.com".to_string(),
                lesson_id: second.id,
            },
        )
        .await
        .unwrap();
    (first, second, sam)
}

#[tokio::test]
async fn test_weekly_revenue_uses_price_table() {
    let h = Harness::new();
    booked_week(&h).await;

    let report = h
        .engine
        .revenue(&admin(), h.now(), h.now() + Duration::days(30), Bucket::Week)
        .await
        .unwrap();

    assert_eq!(report.cost_per_lesson, Money::from_cents(5_000));
    assert_eq!(report.revenue_per_booking, Money::from_cents(1_400));
    assert_eq!(report.data.len(), 2);

    let w1 = &report.data[0];
    assert_eq!(w1.key, "2025-W01");
    assert_eq!(w1.label, "2025 wk 01");
    assert_eq!(w1.revenue, Money::from_cents(2 * 1_450));
    assert_eq!(w1.cost, Money::from_cents(5_000));
    assert_eq!(w1.profit, Money::from_cents(2_900 - 5_000));
    assert_eq!((w1.booking_count, w1.lesson_count), (2, 1));

    // Ten-pack price plus the fallback for the credit-less trial
    let w2 = &report.data[1];
    assert_eq!(w2.key, "2025-W02");
    assert_eq!(w2.revenue, Money::from_cents(1_350 + 1_400));
    assert_eq!(w2.booking_count, 2);
}

#[tokio::test]
async fn test_monthly_revenue_and_range() {
    let h = Harness::new();
    let (_, second, _) = booked_week(&h).await;

    let month = h
        .engine
        .revenue(&admin(), h.now(), h.now() + Duration::days(30), Bucket::Month)
        .await
        .unwrap();
    assert_eq!(month.data.len(), 1);
    assert_eq!(month.data[0].key, "2025-01");
    assert_eq!(month.data[0].label, "jan 2025");
    assert_eq!(month.data[0].revenue, Money::from_cents(2_900 + 2_750));
    assert_eq!(month.data[0].cost, Money::from_cents(10_000));

    // Range ending before the second lesson
    let first_only = h
        .engine
        .revenue(&admin(), h.now(), second.starts_at - Duration::seconds(1), Bucket::Day)
        .await
        .unwrap();
    assert_eq!(first_only.data.len(), 1);
    assert_eq!(first_only.data[0].key, "2025-01-03");
    assert_eq!(first_only.data[0].label, "3 jan 2025");
}

#[tokio::test]
async fn test_cancelled_bookings_leave_the_report() {
    let h = Harness::new();
    let (first, _, sam) = booked_week(&h).await;
    let mine = h
        .engine
        .student_bookings(&sam, None)
        .await
        .unwrap()
        .into_iter()
        .find(|view| view.lesson.id == first.id)
        .unwrap();
    h.engine.cancel(&sam, mine.booking_id, None).await.unwrap();

    let report = h
        .engine
        .revenue(&admin(), h.now(), h.now() + Duration::days(4), Bucket::Year)
        .await
        .unwrap();

    assert_eq!(report.data[0].key, "2025");
    assert_eq!(report.data[0].revenue, Money::from_cents(1_450));
    assert_eq!(report.data[0].booking_count, 1);
}

#[tokio::test]
async fn test_retired_twenty_pack_keeps_its_price() {
    let h = Harness::new();
    let ana = h.student("ana").await;
    h.credit(&ana, CreditKind::TwentyPack, Duration::days(60)).await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    let reservation = h.engine.reserve(&ana, lesson.id, None).await.unwrap();
    assert_eq!(
        reservation.credit_unit.map(|u| u.kind),
        Some(CreditKind::TwentyPack)
    );

    let report = h
        .engine
        .revenue(&admin(), h.now(), h.now() + Duration::days(4), Bucket::Year)
        .await
        .unwrap();
    assert_eq!(report.data[0].revenue, Money::from_cents(1_250));
}

#[tokio::test]
async fn test_revenue_rules() {
    let h = Harness::new();
    let sam = h.student("sam").await;

    let err = h
        .engine
        .revenue(&sam, h.now(), h.now(), Bucket::Week)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));

    let err = h
        .engine
        .revenue(&admin(), h.now(), h.now() - Duration::days(1), Bucket::Week)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    let empty = h
        .engine
        .revenue(&admin(), h.now(), h.now() + Duration::days(1), Bucket::Week)
        .await
        .unwrap();
    assert!(empty.data.is_empty());
}
