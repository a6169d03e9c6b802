//! Student records: registration, profile updates and per-student stats.

use super::{BookingEngine, require_admin, resolve_student};
use crate::error::BookingError;
use crate::types::{Actor, Money, Student, StudentId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use studio_core::document_store::{DocumentStoreError, Patch};
use tracing::{debug, info, instrument};

/// Optional profile fields supplied at registration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterStudent {
    /// Phone number
    #[serde(default)]
    pub phone: Option<String>,
    /// Date of birth
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
}

/// Outcome of a registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Whether the record was created by this call
    pub created: bool,
    /// The stored record
    pub student: Student,
}

/// A partial profile update. Absent fields are left alone; an empty
/// `phone` or `dateOfBirth` clears the field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    /// Student to update, admins only
    #[serde(default)]
    pub student_id: Option<StudentId>,
    /// New name
    #[serde(default)]
    pub name: Option<String>,
    /// New phone number
    #[serde(default)]
    pub phone: Option<String>,
    /// New date of birth, `YYYY-MM-DD`
    #[serde(default)]
    pub date_of_birth: Option<String>,
}

impl ProfileUpdate {
    fn into_patch(self) -> Result<Patch, BookingError> {
        let mut patch = Patch::new();
        if let Some(name) = self.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(BookingError::validation("Name must not be empty"));
            }
            patch.insert("name".to_string(), Value::String(name.to_string()));
        }
        if let Some(phone) = self.phone {
            let phone = phone.trim();
            let value = if phone.is_empty() {
                Value::Null
            } else {
                Value::String(phone.to_string())
            };
            patch.insert("phone".to_string(), value);
        }
        if let Some(dob) = self.date_of_birth {
            let dob = dob.trim();
            let value = if dob.is_empty() {
                Value::Null
            } else {
                let date = NaiveDate::parse_from_str(dob, "%Y-%m-%d")
                    .map_err(|_| BookingError::validation("dateOfBirth must be YYYY-MM-DD"))?;
                Value::String(date.to_string())
            };
            patch.insert("dateOfBirth".to_string(), value);
        }
        Ok(patch)
    }
}

/// Per-student figures for the admin overview.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    /// Bookings held
    pub bookings: u64,
    /// Units available now
    pub available_credits: u64,
    /// Units consumed
    pub used_credits: u64,
    /// Revenue of the student's bookings
    pub revenue: Money,
}

impl BookingEngine {
    /// Create the student record of the calling identity.
    ///
    /// Registering twice returns the existing record.
    ///
    /// # Errors
    ///
    /// [`BookingError::Store`] if the store failed.
    #[instrument(skip(self, actor, details), fields(actor = %actor.id))]
    pub async fn register_student(
        &self,
        actor: &Actor,
        details: RegisterStudent,
    ) -> Result<Registration, BookingError> {
        if let Some(student) = self.repo.student(&actor.id).await? {
            debug!("Student already registered");
            return Ok(Registration {
                created: false,
                student,
            });
        }

        let student = Student {
            id: actor.id.clone(),
            name: actor.name.clone(),
            email: actor.email.clone(),
            phone: details.phone.filter(|p| !p.trim().is_empty()),
            date_of_birth: details.date_of_birth,
            legacy_credits: None,
            created_at: self.now(),
        };

        match self.repo.insert_student(&student).await {
            Ok(()) => {
                info!("Student registered");
                Ok(Registration {
                    created: true,
                    student,
                })
            }
            Err(DocumentStoreError::Conflict { .. }) => {
                let student = self.require_student(&actor.id).await?;
                Ok(Registration {
                    created: false,
                    student,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Update name, phone or date of birth.
    ///
    /// A caller updating their own missing record gets one created from
    /// their identity first.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: non-admin updating someone else
    /// - [`BookingError::Validation`]: malformed field
    /// - [`BookingError::NotFound`]: admin updating an unknown student
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor, update), fields(actor = %actor.id))]
    pub async fn update_profile(&self, actor: &Actor, update: ProfileUpdate) -> Result<Student, BookingError> {
        let student_id = resolve_student(actor, update.student_id.clone())?;
        let patch = update.into_patch()?;

        if student_id == actor.id && self.repo.student(&student_id).await?.is_none() {
            self.register_student(actor, RegisterStudent::default()).await?;
        }
        if patch.is_empty() {
            return self.require_student(&student_id).await;
        }

        match self.repo.patch_student(&student_id, patch).await {
            Ok(student) => {
                info!(student = %student_id, "Profile updated");
                Ok(student)
            }
            Err(DocumentStoreError::NotFound { .. }) => Err(BookingError::not_found("Student", &student_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Booking, credit and revenue figures of one student.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: caller is not an admin
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor), fields(actor = %actor.id, student = %student_id))]
    pub async fn student_stats(&self, actor: &Actor, student_id: StudentId) -> Result<StudentStats, BookingError> {
        require_admin(actor)?;
        let now = self.now();
        let bookings = self.repo.bookings_for_student(&student_id).await?;
        let units = self.repo.units_for_student(&student_id).await?;

        let consumed: HashMap<_, _> = units
            .iter()
            .filter_map(|unit| unit.consumed_by.map(|booking| (booking, unit)))
            .collect();
        let revenue = bookings
            .iter()
            .map(|booking| self.prices.booking_revenue(consumed.get(&booking.id).copied()))
            .sum();

        Ok(StudentStats {
            bookings: bookings.len() as u64,
            available_credits: units.iter().filter(|u| u.is_available(now)).count() as u64,
            used_credits: consumed.len() as u64,
            revenue,
        })
    }
}
