//! Credit ledger operations: top-ups, the welcome grant, history, summary
//! and the one-time migration of legacy counters.
//!
//! Units are only ever created here. Claiming and releasing belong to the
//! reserve and cancel transactions.

use super::lessons::LessonSummary;
use super::{BookingEngine, require_admin, resolve_student};
use crate::error::BookingError;
use crate::metrics;
use crate::types::{Actor, CreditKind, CreditUnit, CreditUnitId, Student, StudentId};
use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use studio_core::document_store::DocumentStoreError;
use tracing::{debug, error, info, instrument, warn};

/// Validity of the welcome unit, in calendar months.
const WELCOME_VALID_MONTHS: u32 = 6;
/// Validity of migrated legacy units, in days.
const LEGACY_VALID_DAYS: i64 = 365;

/// Result of a welcome grant. A refused grant is not an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeOutcome {
    /// Whether a unit was created
    pub success: bool,
    /// Why nothing was granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The granted unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<CreditUnit>,
}

impl WelcomeOutcome {
    fn refused(reason: &str) -> Self {
        Self {
            success: false,
            reason: Some(reason.to_string()),
            unit: None,
        }
    }
}

/// State of a unit at the time of the query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditStatus {
    /// Unconsumed and valid
    Available,
    /// Consumed by a booking
    Used,
    /// Unconsumed past its validity
    Expired,
}

impl CreditStatus {
    fn of(unit: &CreditUnit, now: DateTime<Utc>) -> Self {
        if unit.consumed_by.is_some() {
            Self::Used
        } else if unit.valid_to > now {
            Self::Available
        } else {
            Self::Expired
        }
    }
}

/// One unit in a student's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditHistoryEntry {
    /// The unit
    #[serde(flatten)]
    pub unit: CreditUnit,
    /// Its state now
    pub status: CreditStatus,
    /// Lesson of the consuming booking, when it still exists
    pub lesson: Option<LessonSummary>,
}

/// A student's credit ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditHistory {
    /// Units, newest first
    pub entries: Vec<CreditHistoryEntry>,
    /// Number of available units
    pub available: u64,
}

/// Totals of a legacy migration run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Students that received units in this run
    pub migrated_students: u32,
    /// Units created in this run
    pub created_units: u32,
    /// Students already fully migrated
    pub skipped_students: u32,
    /// One line per student touched
    pub details: Vec<String>,
}

impl BookingEngine {
    /// Sell a top-up of `kind` to `student`.
    ///
    /// Creates the kind's fixed quantity of units, each valid for the
    /// kind's number of calendar months.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: caller is not an admin
    /// - [`BookingError::Validation`]: `kind` is not sold as a top-up
    /// - [`BookingError::NotFound`]: unknown student
    /// - [`BookingError::Inconsistent`]: only part of the batch was written
    /// - [`BookingError::Store`]: the store failed before anything was written
    #[instrument(skip(self, actor), fields(actor = %actor.id, student = %student_id, kind = %kind))]
    pub async fn add_credits(
        &self,
        actor: &Actor,
        student_id: StudentId,
        kind: CreditKind,
    ) -> Result<Vec<CreditUnit>, BookingError> {
        require_admin(actor)?;
        let Some(top_up) = kind.top_up() else {
            return Err(BookingError::validation(format!(
                "{kind} cannot be sold as a top-up"
            )));
        };
        self.require_student(&student_id).await?;

        let now = self.now();
        let mut created = Vec::with_capacity(top_up.quantity as usize);
        for _ in 0..top_up.quantity {
            let unit = CreditUnit::issue(student_id.clone(), kind, now, top_up.valid_months)
                .ok_or_else(|| BookingError::validation("Validity period out of range"))?;
            if let Err(e) = self.repo.insert_unit(&unit).await {
                return Err(Self::partial_batch(&student_id, kind, &created, top_up.quantity, e));
            }
            created.push(unit);
        }

        metrics::record_credits_granted(kind, top_up.quantity);
        info!(quantity = top_up.quantity, "Credits added");
        Ok(created)
    }

    fn partial_batch(
        student: &StudentId,
        kind: CreditKind,
        created: &[CreditUnit],
        quantity: u32,
        cause: DocumentStoreError,
    ) -> BookingError {
        if created.is_empty() {
            return cause.into();
        }
        metrics::record_inconsistency("add_credits");
        error!(
            student = %student,
            kind = %kind,
            created = created.len(),
            expected = quantity,
            units = ?created.iter().map(|u| u.id).collect::<Vec<_>>(),
            error = %cause,
            "Top-up partially written"
        );
        BookingError::Inconsistent(format!(
            "{} of {quantity} {kind} units created for {student}",
            created.len()
        ))
    }

    /// Grant the one-time welcome unit.
    ///
    /// Only granted while the student holds no units at all. A student may
    /// claim their own; admins may grant to anyone.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: non-admin granting to someone else
    /// - [`BookingError::NotFound`]: unknown student
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor), fields(actor = %actor.id, student = %student_id))]
    pub async fn grant_welcome(
        &self,
        actor: &Actor,
        student_id: StudentId,
    ) -> Result<WelcomeOutcome, BookingError> {
        let student_id = resolve_student(actor, Some(student_id))?;
        self.require_student(&student_id).await?;

        if self.repo.count_units(&student_id, None).await? > 0 {
            debug!("Student already holds credits, welcome refused");
            return Ok(WelcomeOutcome::refused("Student already has credits"));
        }

        let now = self.now();
        let valid_to = now
            .checked_add_months(Months::new(WELCOME_VALID_MONTHS))
            .ok_or_else(|| BookingError::validation("Validity period out of range"))?;
        let unit = CreditUnit::issue_until(
            CreditUnitId::welcome(&student_id),
            student_id,
            CreditKind::Welcome,
            now,
            valid_to,
        );

        match self.repo.insert_unit(&unit).await {
            Ok(()) => {
                metrics::record_credits_granted(CreditKind::Welcome, 1);
                info!(unit = %unit.id, "Welcome credit granted");
                Ok(WelcomeOutcome {
                    success: true,
                    reason: None,
                    unit: Some(unit),
                })
            }
            Err(DocumentStoreError::Conflict { .. }) => {
                debug!("Concurrent welcome grant won");
                Ok(WelcomeOutcome::refused("Welcome credit already granted"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A student's units with the lesson each consumed unit paid for.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: non-admin reading someone else's history
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn credit_history(
        &self,
        actor: &Actor,
        student_id: Option<StudentId>,
    ) -> Result<CreditHistory, BookingError> {
        let student_id = resolve_student(actor, student_id)?;
        let now = self.now();
        let units = self.repo.units_for_student(&student_id).await?;

        let booking_ids: Vec<_> = units.iter().filter_map(|u| u.consumed_by).collect();
        let bookings = self.repo.bookings_by_id(&booking_ids).await?;
        let lesson_ids: Vec<_> = bookings.iter().map(|b| b.lesson_id).collect();
        let lessons: HashMap<_, _> = self
            .repo
            .lessons_by_id(&lesson_ids)
            .await?
            .into_iter()
            .map(|lesson| (lesson.id, lesson))
            .collect();
        let lesson_of_booking: HashMap<_, _> = bookings
            .iter()
            .filter_map(|b| lessons.get(&b.lesson_id).map(|lesson| (b.id, lesson)))
            .collect();

        let entries: Vec<_> = units
            .into_iter()
            .map(|unit| CreditHistoryEntry {
                status: CreditStatus::of(&unit, now),
                lesson: unit
                    .consumed_by
                    .and_then(|booking| lesson_of_booking.get(&booking))
                    .map(|lesson| LessonSummary::from(*lesson)),
                unit,
            })
            .collect();
        let available = entries
            .iter()
            .filter(|entry| entry.status == CreditStatus::Available)
            .count() as u64;

        Ok(CreditHistory { entries, available })
    }

    /// Available unit count of every student holding at least one.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: caller is not an admin
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn credit_summary(&self, actor: &Actor) -> Result<BTreeMap<StudentId, u64>, BookingError> {
        require_admin(actor)?;
        let units = self.repo.all_available_units(self.now()).await?;
        let mut summary = BTreeMap::new();
        for unit in units {
            *summary.entry(unit.student_id).or_insert(0) += 1;
        }
        Ok(summary)
    }

    /// Convert legacy credit counters into `credit_legacy` units valid one year.
    ///
    /// Unit ids are derived from the student and the unit's index, so a
    /// rerun creates only what an earlier, interrupted run missed.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: caller is not an admin
    /// - [`BookingError::Store`]: the store failed; units created so far stay
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn migrate_legacy_credits(&self, actor: &Actor) -> Result<MigrationReport, BookingError> {
        require_admin(actor)?;
        let now = self.now();
        let valid_to = now + Duration::days(LEGACY_VALID_DAYS);
        let mut report = MigrationReport::default();

        for student in self.repo.students_with_legacy_credits().await? {
            let wanted = student.legacy_credits.unwrap_or(0);
            let existing = self
                .repo
                .count_units(&student.id, Some(CreditKind::Legacy))
                .await?;
            if existing >= u64::from(wanted) {
                report.skipped_students += 1;
                report.details.push(format!("{}: already migrated", display_name(&student)));
                continue;
            }

            let created = self.migrate_student(&student, wanted, now, valid_to).await?;
            if created > 0 {
                metrics::record_credits_granted(CreditKind::Legacy, created);
                report.migrated_students += 1;
                report.created_units += created;
                report.details.push(format!(
                    "{}: {created} credits migrated",
                    display_name(&student)
                ));
            } else {
                report.skipped_students += 1;
            }
        }

        info!(
            migrated = report.migrated_students,
            units = report.created_units,
            skipped = report.skipped_students,
            "Legacy credit migration finished"
        );
        Ok(report)
    }

    async fn migrate_student(
        &self,
        student: &Student,
        wanted: u32,
        now: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> Result<u32, BookingError> {
        let mut created = 0;
        for index in 0..wanted {
            let unit = CreditUnit::issue_until(
                CreditUnitId::legacy(&student.id, index),
                student.id.clone(),
                CreditKind::Legacy,
                now,
                valid_to,
            );
            match self.repo.insert_unit(&unit).await {
                Ok(()) => created += 1,
                Err(DocumentStoreError::Conflict { .. }) => {}
                Err(e) => {
                    warn!(student = %student.id, created, error = %e, "Legacy migration interrupted");
                    return Err(e.into());
                }
            }
        }
        Ok(created)
    }
}

fn display_name(student: &Student) -> &str {
    if student.name.is_empty() {
        &student.email
    } else {
        &student.name
    }
}
