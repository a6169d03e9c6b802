//! Credit ledger operations: top-ups, welcome grant, history, summary and
//! legacy migration.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{Harness, admin};
use studio_booking::BookingError;
use studio_booking::engine::CreditStatus;
use studio_booking::repository::CREDIT_UNITS;
use studio_booking::types::{Actor, CreditKind, CreditUnit, CreditUnitId, StudentId};
use studio_core::document_store::DocumentStoreError;
use studio_testing::StoreOp;

#[tokio::test]
async fn test_top_up_creates_units_with_calendar_validity() {
    let h = Harness::new();
    let kim = h.student("kim").await;

    let five = h
        .engine
        .add_credits(&admin(), kim.id.clone(), CreditKind::FivePack)
        .await
        .expect("five-pack");
    let ten = h
        .engine
        .add_credits(&admin(), kim.id.clone(), CreditKind::TenPack)
        .await
        .expect("ten-pack");

    assert_eq!(five.len(), 5);
    assert_eq!(ten.len(), 10);
    let april = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
    let july = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
    assert!(five.iter().all(|u| u.valid_to == april && u.kind == CreditKind::FivePack));
    assert!(ten.iter().all(|u| u.valid_to == july && u.consumed_by.is_none()));
    assert_eq!(h.available(&kim).await, 15);
}

#[tokio::test]
async fn test_top_up_rules() {
    let h = Harness::new();
    let kim = h.student("kim").await;

    let err = h
        .engine
        .add_credits(&kim, kim.id.clone(), CreditKind::Single)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));

    let err = h
        .engine
        .add_credits(&admin(), kim.id.clone(), CreditKind::Welcome)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    let err = h
        .engine
        .add_credits(&admin(), kim.id.clone(), CreditKind::TwentyPack)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    let err = h
        .engine
        .add_credits(&admin(), StudentId::new("nobody"), CreditKind::Single)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::NotFound { .. }));
    assert_eq!(h.store.len(CREDIT_UNITS), 0);
}

#[tokio::test]
async fn test_partial_top_up_is_inconsistent() {
    let h = Harness::new();
    let kim = h.student("kim").await;
    h.store.fail_nth_in(
        StoreOp::Create,
        CREDIT_UNITS,
        2,
        DocumentStoreError::Database("disk full".to_string()),
    );

    let err = h
        .engine
        .add_credits(&admin(), kim.id.clone(), CreditKind::FivePack)
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::Inconsistent(_)));
    assert_eq!(h.store.len(CREDIT_UNITS), 2);
}

#[tokio::test]
async fn test_welcome_is_granted_once() {
    let h = Harness::new();
    let sam = h.student("sam").await;

    let first = h.engine.grant_welcome(&sam, sam.id.clone()).await.unwrap();
    assert!(first.success);
    let unit = first.unit.expect("granted unit");
    assert_eq!(unit.kind, CreditKind::Welcome);
    assert_eq!(unit.id, CreditUnitId::welcome(&sam.id));
    assert_eq!(unit.valid_to, Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap());

    let second = h.engine.grant_welcome(&sam, sam.id.clone()).await.unwrap();
    assert!(!second.success);
    assert!(second.reason.is_some());
    assert_eq!(h.available(&sam).await, 1);
}

#[tokio::test]
async fn test_welcome_refused_for_existing_customers() {
    let h = Harness::new();
    let kim = h.student("kim").await;
    h.credit(&kim, CreditKind::Single, Duration::hours(-1)).await;

    let outcome = h.engine.grant_welcome(&admin(), kim.id.clone()).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(h.store.len(CREDIT_UNITS), 1);
}

#[tokio::test]
async fn test_welcome_for_someone_else_requires_admin() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let kim = h.student("kim").await;

    let err = h.engine.grant_welcome(&sam, kim.id.clone()).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));

    let outcome = h.engine.grant_welcome(&admin(), kim.id.clone()).await.unwrap();
    assert!(outcome.success);
}

#[tokio::test]
async fn test_history_links_lessons_and_states() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let used = h.credit(&sam, CreditKind::FivePack, Duration::days(5)).await;
    h.clock.advance(Duration::minutes(1));
    let spare = h.credit(&sam, CreditKind::FivePack, Duration::days(50)).await;
    h.clock.advance(Duration::minutes(1));
    let expired = h.credit(&sam, CreditKind::Single, Duration::zero()).await;
    let lesson = h.lesson_in(Duration::days(2)).await;
    h.engine.reserve(&sam, lesson.id, None).await.unwrap();

    let history = h.engine.credit_history(&sam, None).await.unwrap();

    let ids: Vec<_> = history.entries.iter().map(|e| e.unit.id).collect();
    assert_eq!(ids, vec![expired.id, spare.id, used.id], "newest first");
    assert_eq!(history.available, 1);

    let statuses: Vec<_> = history.entries.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![CreditStatus::Expired, CreditStatus::Available, CreditStatus::Used]
    );
    let linked = history.entries[2].lesson.as_ref().expect("lesson of used unit");
    assert_eq!(linked.id, lesson.id);
    assert_eq!(linked.label, "Hatha Yoga");
    assert!(history.entries[1].lesson.is_none());
}

#[tokio::test]
async fn test_history_of_another_student_requires_admin() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let kim = h.student("kim").await;
    h.credit(&kim, CreditKind::Single, Duration::days(5)).await;

    let err = h
        .engine
        .credit_history(&sam, Some(kim.id.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));

    let history = h.engine.credit_history(&admin(), Some(kim.id.clone())).await.unwrap();
    assert_eq!(history.entries.len(), 1);
}

#[tokio::test]
async fn test_summary_counts_available_units_per_student() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let kim = h.student("kim").await;
    let lou = h.student("lou").await;
    h.credit(&sam, CreditKind::Single, Duration::days(5)).await;
    h.credit(&sam, CreditKind::Single, Duration::days(5)).await;
    h.credit(&kim, CreditKind::Single, Duration::days(5)).await;
    h.credit(&lou, CreditKind::Single, Duration::hours(-1)).await;

    let summary = h.engine.credit_summary(&admin()).await.unwrap();

    assert_eq!(summary.len(), 2);
    assert_eq!(summary.get(&sam.id), Some(&2));
    assert_eq!(summary.get(&kim.id), Some(&1));
    assert!(!summary.contains_key(&lou.id));

    let err = h.engine.credit_summary(&sam).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));
}

#[tokio::test]
async fn test_legacy_migration_is_idempotent() {
    let h = Harness::new();
    let old = Actor::student("old", "Olga", "olga@example.com");
    h.insert_student(&old, Some(3)).await;
    let none = Actor::student("new", "Nina", "nina@example.com");
    h.insert_student(&none, Some(0)).await;

    let first = h.engine.migrate_legacy_credits(&admin()).await.unwrap();
    assert_eq!(first.migrated_students, 1);
    assert_eq!(first.created_units, 3);
    assert_eq!(first.skipped_students, 0);
    assert_eq!(h.available(&old).await, 3);

    let units = h.engine.repository().units_for_student(&old.id).await.unwrap();
    assert!(units.iter().all(|u| u.kind == CreditKind::Legacy));
    assert!(units.iter().all(|u| u.valid_to == h.now() + Duration::days(365)));

    let second = h.engine.migrate_legacy_credits(&admin()).await.unwrap();
    assert_eq!(second.created_units, 0);
    assert_eq!(second.skipped_students, 1);
    assert_eq!(h.store.len(CREDIT_UNITS), 3);
}

#[tokio::test]
async fn test_legacy_migration_completes_interrupted_run() {
    let h = Harness::new();
    let old = Actor::student("old", "Olga", "olga@example.com");
    h.insert_student(&old, Some(4)).await;
    let earlier = CreditUnit::issue_until(
        CreditUnitId::legacy(&old.id, 0),
        old.id.clone(),
        CreditKind::Legacy,
        h.now(),
        h.now() + Duration::days(365),
    );
    h.engine.repository().insert_unit(&earlier).await.unwrap();

    let report = h.engine.migrate_legacy_credits(&admin()).await.unwrap();

    assert_eq!(report.created_units, 3);
    assert_eq!(h.available(&old).await, 4);
}

#[tokio::test]
async fn test_legacy_migration_requires_admin() {
    let h = Harness::new();
    let sam = h.student("sam").await;
    let err = h.engine.migrate_legacy_credits(&sam).await.unwrap_err();
    assert!(matches!(err, BookingError::Forbidden(_)));
}
