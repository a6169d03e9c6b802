//! Typed access to the four booking collections.
//!
//! Every method is a single store call (or a paged sequence of reads) and
//! returns raw [`DocumentStoreError`]s; the engine decides what a failure
//! means for the transaction in progress.

use crate::types::{
    Booking, BookingId, CreditKind, CreditUnit, CreditUnitId, Lesson, LessonId, Student,
    StudentId, fields,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use studio_core::document_store::{
    Collection, Direction, Document, DocumentId, DocumentStore, DocumentStoreError, FieldValue,
    Filter, Patch, Query, timestamp,
};

/// Students, keyed by auth identity.
pub const STUDENTS: Collection = Collection::new("students");
/// Scheduled lessons.
pub const LESSONS: Collection = Collection::new("lessons");
/// Bookings linking a student to a lesson.
pub const BOOKINGS: Collection = Collection::new("bookings");
/// Credit ledger.
pub const CREDIT_UNITS: Collection = Collection::new("credit_units");

/// Page size used when reading whole result sets.
const PAGE_SIZE: usize = 100;
/// Maximum number of values in one `In` filter.
const IN_CHUNK: usize = 100;

/// Typed repository over a [`DocumentStore`].
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
}

impl Repository {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Generic helpers
    // ------------------------------------------------------------------

    async fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        id: DocumentId,
    ) -> Result<Option<T>, DocumentStoreError> {
        self.store
            .get(collection, id)
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }

    async fn list<T: DeserializeOwned>(
        &self,
        collection: Collection,
        query: Query,
    ) -> Result<Vec<T>, DocumentStoreError> {
        self.store
            .list(collection, query)
            .await?
            .iter()
            .map(Document::decode)
            .collect()
    }

    /// Read every matching document, one page at a time.
    async fn list_all<T: DeserializeOwned>(
        &self,
        collection: Collection,
        query: Query,
    ) -> Result<Vec<T>, DocumentStoreError> {
        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .list(collection, query.clone().limit(PAGE_SIZE).offset(offset))
                .await?;
            let fetched = page.len();
            for doc in &page {
                out.push(doc.decode()?);
            }
            if fetched < PAGE_SIZE {
                return Ok(out);
            }
            offset += fetched;
        }
    }

    /// Read every document whose `field` is one of `values`, in chunks.
    async fn list_in<T: DeserializeOwned>(
        &self,
        collection: Collection,
        field: &str,
        values: Vec<FieldValue>,
    ) -> Result<Vec<T>, DocumentStoreError> {
        let mut out = Vec::new();
        for chunk in values.chunks(IN_CHUNK) {
            let query = Query::new().one_of(field, chunk.to_vec());
            out.extend(self.list_all(collection, query).await?);
        }
        Ok(out)
    }

    async fn insert<T: Serialize>(
        &self,
        collection: Collection,
        id: DocumentId,
        model: &T,
    ) -> Result<(), DocumentStoreError> {
        let document = Document::encode(id, model)?;
        self.store.create(collection, document).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lessons
    // ------------------------------------------------------------------

    /// Load a lesson.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn lesson(&self, id: LessonId) -> Result<Option<Lesson>, DocumentStoreError> {
        self.get(LESSONS, id.into()).await
    }

    /// Insert a lesson.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn insert_lesson(&self, lesson: &Lesson) -> Result<(), DocumentStoreError> {
        self.insert(LESSONS, lesson.id.into(), lesson).await
    }

    /// Delete a lesson document (no cascade).
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; propagates store failures.
    pub async fn delete_lesson(&self, id: LessonId) -> Result<(), DocumentStoreError> {
        self.store.delete(LESSONS, id.into()).await
    }

    /// Lessons starting in `[from, to]`, either bound optional.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn lessons_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        direction: Direction,
    ) -> Result<Vec<Lesson>, DocumentStoreError> {
        let mut query = Query::new();
        if let Some(from) = from {
            query = query.gte(fields::STARTS_AT, from);
        }
        if let Some(to) = to {
            query = query.lte(fields::STARTS_AT, to);
        }
        query = match direction {
            Direction::Ascending => query.order_asc(fields::STARTS_AT),
            Direction::Descending => query.order_desc(fields::STARTS_AT),
        };
        self.list_all(LESSONS, query).await
    }

    /// Lessons by id; missing ids are skipped.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn lessons_by_id(&self, ids: &[LessonId]) -> Result<Vec<Lesson>, DocumentStoreError> {
        let values = ids.iter().map(|id| FieldValue::from(*id)).collect();
        self.list_in(LESSONS, fields::ID, values).await
    }

    // ------------------------------------------------------------------
    // Students
    // ------------------------------------------------------------------

    /// Load a student.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn student(&self, id: &StudentId) -> Result<Option<Student>, DocumentStoreError> {
        self.get(STUDENTS, id.into()).await
    }

    /// Insert a student.
    ///
    /// # Errors
    ///
    /// `Conflict` if the id is taken; propagates store failures.
    pub async fn insert_student(&self, student: &Student) -> Result<(), DocumentStoreError> {
        self.insert(STUDENTS, (&student.id).into(), student).await
    }

    /// Merge `patch` into a student record.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; propagates store failures.
    pub async fn patch_student(
        &self,
        id: &StudentId,
        patch: Patch,
    ) -> Result<Student, DocumentStoreError> {
        self.store
            .update(STUDENTS, id.into(), patch, Vec::new())
            .await?
            .decode()
    }

    /// Students that still carry a positive legacy counter.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn students_with_legacy_credits(&self) -> Result<Vec<Student>, DocumentStoreError> {
        let query = Query::new().gt(fields::LEGACY_CREDITS, 0_i64);
        self.list_all(STUDENTS, query).await
    }

    /// Students by id; missing ids are skipped.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn students_by_id(&self, ids: &[StudentId]) -> Result<Vec<Student>, DocumentStoreError> {
        let values = ids.iter().map(FieldValue::from).collect();
        self.list_in(STUDENTS, fields::ID, values).await
    }

    // ------------------------------------------------------------------
    // Bookings
    // ------------------------------------------------------------------

    /// Load a booking.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn booking(&self, id: BookingId) -> Result<Option<Booking>, DocumentStoreError> {
        self.get(BOOKINGS, id.into()).await
    }

    /// Insert a booking.
    ///
    /// # Errors
    ///
    /// `Conflict` on a duplicate id or a second booking of the same
    /// (lesson, student) pair; propagates store failures.
    pub async fn insert_booking(&self, booking: &Booking) -> Result<(), DocumentStoreError> {
        self.insert(BOOKINGS, booking.id.into(), booking).await
    }

    /// Bookings by id; missing ids are skipped.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn bookings_by_id(&self, ids: &[BookingId]) -> Result<Vec<Booking>, DocumentStoreError> {
        let values = ids.iter().map(|id| FieldValue::from(*id)).collect();
        self.list_in(BOOKINGS, fields::ID, values).await
    }

    /// Delete a booking document.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; propagates store failures.
    pub async fn delete_booking(&self, id: BookingId) -> Result<(), DocumentStoreError> {
        self.store.delete(BOOKINGS, id.into()).await
    }

    /// Number of bookings of a lesson.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn count_bookings(&self, lesson: LessonId) -> Result<u64, DocumentStoreError> {
        self.store
            .count(BOOKINGS, vec![Filter::eq(fields::LESSON_ID, lesson)])
            .await
    }

    /// The booking of `student` for `lesson`, if any.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn find_booking(
        &self,
        lesson: LessonId,
        student: &StudentId,
    ) -> Result<Option<Booking>, DocumentStoreError> {
        let query = Query::new()
            .eq(fields::LESSON_ID, lesson)
            .eq(fields::STUDENT_ID, student)
            .limit(1);
        Ok(self.list(BOOKINGS, query).await?.into_iter().next())
    }

    /// All bookings of a lesson, earliest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn bookings_for_lesson(&self, lesson: LessonId) -> Result<Vec<Booking>, DocumentStoreError> {
        let query = Query::new()
            .eq(fields::LESSON_ID, lesson)
            .order_asc(fields::CREATED_AT);
        self.list_all(BOOKINGS, query).await
    }

    /// All bookings of any of `lessons`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn bookings_for_lessons(&self, lessons: &[LessonId]) -> Result<Vec<Booking>, DocumentStoreError> {
        let values = lessons.iter().map(|id| FieldValue::from(*id)).collect();
        self.list_in(BOOKINGS, fields::LESSON_ID, values).await
    }

    /// All bookings of a student.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn bookings_for_student(&self, student: &StudentId) -> Result<Vec<Booking>, DocumentStoreError> {
        let query = Query::new().eq(fields::STUDENT_ID, student);
        self.list_all(BOOKINGS, query).await
    }

    // ------------------------------------------------------------------
    // Credit units
    // ------------------------------------------------------------------

    /// Load a credit unit.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn unit(&self, id: CreditUnitId) -> Result<Option<CreditUnit>, DocumentStoreError> {
        self.get(CREDIT_UNITS, id.into()).await
    }

    /// Insert a credit unit.
    ///
    /// # Errors
    ///
    /// `Conflict` if the id is taken; propagates store failures.
    pub async fn insert_unit(&self, unit: &CreditUnit) -> Result<(), DocumentStoreError> {
        self.insert(CREDIT_UNITS, unit.id.into(), unit).await
    }

    fn available_filters(student: &StudentId, now: DateTime<Utc>) -> Vec<Filter> {
        vec![
            Filter::eq(fields::STUDENT_ID, student),
            Filter::is_null(fields::CONSUMED_BY),
            Filter::Gt(fields::VALID_TO.to_string(), now.into()),
        ]
    }

    /// Up to `limit` available units of a student, soonest expiry first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn available_units(
        &self,
        student: &StudentId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CreditUnit>, DocumentStoreError> {
        let query = Self::available_filters(student, now)
            .into_iter()
            .fold(Query::new(), Query::filter)
            .order_asc(fields::VALID_TO)
            .limit(limit);
        self.list(CREDIT_UNITS, query).await
    }

    /// Number of available units of a student.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn count_available_units(
        &self,
        student: &StudentId,
        now: DateTime<Utc>,
    ) -> Result<u64, DocumentStoreError> {
        self.store
            .count(CREDIT_UNITS, Self::available_filters(student, now))
            .await
    }

    /// Number of units of a student, optionally of one kind, in any state.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn count_units(
        &self,
        student: &StudentId,
        kind: Option<CreditKind>,
    ) -> Result<u64, DocumentStoreError> {
        let mut filters = vec![Filter::eq(fields::STUDENT_ID, student)];
        if let Some(kind) = kind {
            filters.push(Filter::eq(fields::KIND, kind.as_str()));
        }
        self.store.count(CREDIT_UNITS, filters).await
    }

    /// Every unit of a student, newest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn units_for_student(&self, student: &StudentId) -> Result<Vec<CreditUnit>, DocumentStoreError> {
        let query = Query::new()
            .eq(fields::STUDENT_ID, student)
            .order_desc(fields::CREATED_AT);
        self.list_all(CREDIT_UNITS, query).await
    }

    /// Every available unit of every student.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn all_available_units(&self, now: DateTime<Utc>) -> Result<Vec<CreditUnit>, DocumentStoreError> {
        let query = Query::new()
            .is_null(fields::CONSUMED_BY)
            .gt(fields::VALID_TO, now);
        self.list_all(CREDIT_UNITS, query).await
    }

    /// Units consumed by a booking (at most one unless data is damaged).
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn units_consumed_by(&self, booking: BookingId) -> Result<Vec<CreditUnit>, DocumentStoreError> {
        let query = Query::new().eq(fields::CONSUMED_BY, booking);
        self.list(CREDIT_UNITS, query).await
    }

    /// Units consumed by any of `bookings`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn units_consumed_by_any(
        &self,
        bookings: &[BookingId],
    ) -> Result<Vec<CreditUnit>, DocumentStoreError> {
        let values = bookings.iter().map(|id| FieldValue::from(*id)).collect();
        self.list_in(CREDIT_UNITS, fields::CONSUMED_BY, values).await
    }

    /// Mark a unit consumed by `booking`, only if it is still unconsumed.
    ///
    /// # Errors
    ///
    /// `PreconditionFailed` if another booking claimed it first; `NotFound`
    /// if the unit is gone; propagates store failures.
    pub async fn claim_unit(
        &self,
        unit: CreditUnitId,
        booking: BookingId,
        now: DateTime<Utc>,
    ) -> Result<CreditUnit, DocumentStoreError> {
        let mut patch = Patch::new();
        patch.insert(fields::CONSUMED_BY.to_string(), Value::String(booking.to_string()));
        patch.insert(
            fields::CONSUMED_AT.to_string(),
            Value::String(timestamp::canonical(&now)),
        );
        self.store
            .update(
                CREDIT_UNITS,
                unit.into(),
                patch,
                vec![Filter::is_null(fields::CONSUMED_BY)],
            )
            .await?
            .decode()
    }

    /// Clear the consumption of a unit, only if `booking` still holds it.
    ///
    /// # Errors
    ///
    /// `PreconditionFailed` if the unit is not consumed by `booking`;
    /// `NotFound` if the unit is gone; propagates store failures.
    pub async fn release_unit(
        &self,
        unit: CreditUnitId,
        booking: BookingId,
    ) -> Result<CreditUnit, DocumentStoreError> {
        let mut patch = Patch::new();
        patch.insert(fields::CONSUMED_BY.to_string(), Value::Null);
        patch.insert(fields::CONSUMED_AT.to_string(), Value::Null);
        self.store
            .update(
                CREDIT_UNITS,
                unit.into(),
                patch,
                vec![Filter::eq(fields::CONSUMED_BY, booking)],
            )
            .await?
            .decode()
    }
}
