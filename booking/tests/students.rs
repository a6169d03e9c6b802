//! Student registration, profile updates and per-student figures.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use chrono::{Duration, NaiveDate};
use common::{Harness, admin};
use studio_booking::engine::{ProfileUpdate, RegisterStudent};
use studio_booking::repository::STUDENTS;
use studio_booking::types::{CreditKind, Money, StudentId};
use studio_booking::{Actor, BookingError};

fn newcomer() -> Actor {
    Actor::student("nova", "Nova", "nova@example.com")
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let h = Harness::new();
    let details = RegisterStudent {
        phone: Some("0612345678".to_string()),
        date_of_birth: NaiveDate::from_ymd_opt(1992, 5, 17),
    };

    let first = h.engine.register_student(&newcomer(), details).await.unwrap();
    assert!(first.created);
    assert_eq!(first.student.email, "nova@example.com");
    assert_eq!(first.student.phone.as_deref(), Some("0612345678"));

    let second = h
        .engine
        .register_student(&newcomer(), RegisterStudent::default())
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.student, first.student);
    assert_eq!(h.store.len(STUDENTS), 1);
}

#[tokio::test]
async fn test_profile_update_registers_missing_record() {
    let h = Harness::new();

    let student = h
        .engine
        .update_profile(
            &newcomer(),
            ProfileUpdate {
                phone: Some("0611111111".to_string()),
                date_of_birth: Some("1990-04-02".to_string()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(student.name, "Nova");
    assert_eq!(student.phone.as_deref(), Some("0611111111"));
    assert_eq!(student.date_of_birth, NaiveDate::from_ymd_opt(1990, 4, 2));
}

#[tokio::test]
async fn test_profile_update_clears_and_renames() {
    let h = Harness::new();
    h.engine
        .register_student(
            &newcomer(),
            RegisterStudent {
                phone: Some("0612345678".to_string()),
                date_of_birth: None,
            },
        )
        .await
        .unwrap();

    let student = h
        .engine
        .update_profile(
            &newcomer(),
            ProfileUpdate {
                name: Some("Nova Star".to_string()),
                phone: Some(String::new()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(student.name, "Nova Star");
    assert_eq!(student.phone, None);
    assert_eq!(student.email, "nova@example.com");
}

#[tokio::test]
async fn test_profile_update_of_others() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let rename = |id: &str| ProfileUpdate {
        student_id: Some(StudentId::new(id)),
        name: Some("Renamed".to_string()),
        ..ProfileUpdate::default()
    };

    let err = h.engine.update_profile(&newcomer(), rename("sam")).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));

    let updated = h.engine.update_profile(&admin(), rename("sam")).await.unwrap();
    assert_eq!(updated.id, sam.id);
    assert_eq!(updated.name, "Renamed");

    let err = h.engine.update_profile(&admin(), rename("ghost")).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound { .. }));
}

#[tokio::test]
async fn test_student_stats() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    h.credit(&sam, CreditKind::Single, Duration::days(10)).await;
    h.credit(&sam, CreditKind::TenPack, Duration::days(20)).await;
    h.credit(&sam, CreditKind::Legacy, Duration::days(30)).await;
    h.credit(&sam, CreditKind::Single, Duration::hours(-1)).await;
    for days in [2, 3] {
        let lesson = h.lesson_in(Duration::days(days)).await;
        h.engine.reserve(&sam, lesson.id, None).await.unwrap();
    }

    let stats = h.engine.student_stats(&admin(), sam.id.clone()).await.unwrap();

    assert_eq!(stats.bookings, 2);
    assert_eq!(stats.used_credits, 2);
    assert_eq!(stats.available_credits, 1);
    assert_eq!(stats.revenue, Money::from_cents(1_600 + 1_350));

    let err = h.engine.student_stats(&sam, sam.id.clone()).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));
}
