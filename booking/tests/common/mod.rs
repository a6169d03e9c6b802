//! Shared fixtures for the booking integration tests.

#![allow(dead_code)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use studio_booking::config::BookingRules;
use studio_booking::repository::BOOKINGS;
use studio_booking::types::{
    Actor, Booking, BookingId, CreditKind, CreditUnit, CreditUnitId, Lesson, LessonId, LessonKind,
    Student, StudentId, fields,
};
use studio_booking::{BookingEngine, RecordingNotifier};
use studio_core::document_store::DocumentStore;
use studio_testing::{FixedClock, InMemoryDocumentStore, test_clock};

/// An engine over an in-memory store with a fixed clock.
pub struct Harness {
    pub engine: BookingEngine,
    pub store: InMemoryDocumentStore,
    pub clock: FixedClock,
    pub notifier: RecordingNotifier,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_rules(BookingRules::default())
    }

    pub fn with_rules(rules: BookingRules) -> Self {
        let store = booking_store();
        Self::over(Arc::new(store.clone()), store, rules)
    }

    /// Run the engine over `backend`, seeding and inspecting through `store`.
    pub fn over(backend: Arc<dyn DocumentStore>, store: InMemoryDocumentStore, rules: BookingRules) -> Self {
        let clock = test_clock();
        let notifier = RecordingNotifier::new();
        let engine = BookingEngine::new(
            backend,
            Arc::new(clock.clone()),
            Arc::new(notifier.clone()),
            rules,
        );
        Self {
            engine,
            store,
            clock,
            notifier,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use studio_core::environment::Clock;
        self.clock.now()
    }

    /// Insert a standard lesson starting `offset` from now.
    pub async fn lesson_in(&self, offset: Duration) -> Lesson {
        let lesson = Lesson {
            id: LessonId::new(),
            starts_at: self.now() + offset,
            kind: LessonKind::Standard,
            teacher: None,
        };
        self.engine
            .repository()
            .insert_lesson(&lesson)
            .await
            .expect("insert lesson");
        lesson
    }

    /// Register a student record and return them as a non-admin actor.
    pub async fn student(&self, id: &str) -> Actor {
        let actor = Actor::student(id, format!("Student {id}"), format!("{id}@example.com"));
        self.insert_student(&actor, None).await;
        actor
    }

    pub async fn insert_student(&self, actor: &Actor, legacy_credits: Option<u32>) -> Student {
        let student = Student {
            id: actor.id.clone(),
            name: actor.name.clone(),
            email: actor.email.clone(),
            phone: None,
            date_of_birth: None,
            legacy_credits,
            created_at: self.now(),
        };
        self.engine
            .repository()
            .insert_student(&student)
            .await
            .expect("insert student");
        student
    }

    /// Give `student` one available unit valid for `valid_for` from now.
    pub async fn credit(&self, student: &Actor, kind: CreditKind, valid_for: Duration) -> CreditUnit {
        let unit = CreditUnit::issue_until(
            CreditUnitId::new(),
            student.id.clone(),
            kind,
            self.now(),
            self.now() + valid_for,
        );
        self.engine
            .repository()
            .insert_unit(&unit)
            .await
            .expect("insert unit");
        unit
    }

    /// Fill `lesson` with `count` bookings by other students, made an hour ago.
    pub async fn fill(&self, lesson: &Lesson, count: usize) -> Vec<Booking> {
        let mut bookings = Vec::with_capacity(count);
        for i in 0..count {
            let booking = Booking {
                id: BookingId::new(),
                lesson_id: lesson.id,
                student_id: StudentId::new(format!("filler-{}-{i}", lesson.id)),
                created_at: self.now() - Duration::hours(1),
            };
            self.engine
                .repository()
                .insert_booking(&booking)
                .await
                .expect("insert booking");
            bookings.push(booking);
        }
        bookings
    }

    pub async fn unit(&self, id: CreditUnitId) -> CreditUnit {
        self.engine
            .repository()
            .unit(id)
            .await
            .expect("read unit")
            .expect("unit exists")
    }

    pub async fn available(&self, student: &Actor) -> u64 {
        self.engine
            .repository()
            .count_available_units(&student.id, self.now())
            .await
            .expect("count units")
    }

    pub fn booking_count(&self) -> usize {
        self.store.len(BOOKINGS)
    }
}

/// In-memory store with the booking uniqueness index.
pub fn booking_store() -> InMemoryDocumentStore {
    InMemoryDocumentStore::new().with_unique_index(BOOKINGS, &[fields::LESSON_ID, fields::STUDENT_ID])
}

pub fn admin() -> Actor {
    Actor::admin("admin-1", "Ada Admin", "ada@example.com")
}
