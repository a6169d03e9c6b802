//! Credit allocation: soonest-expiring available unit first.
//!
//! Selection never writes. The reserve transaction claims the selected unit
//! with a conditional update and comes back here if it lost the claim.

use super::BookingEngine;
use crate::error::BookingError;
use crate::types::{CreditUnit, StudentId};
use chrono::{DateTime, Utc};

/// Candidates fetched per allocation.
const ALLOCATION_WINDOW: usize = 5;

/// The available unit with the smallest `validTo` (ties broken by id).
#[must_use]
pub fn select(units: &[CreditUnit], now: DateTime<Utc>) -> Option<&CreditUnit> {
    units
        .iter()
        .filter(|unit| unit.is_available(now))
        .min_by_key(|unit| (unit.valid_to, unit.id))
}

impl BookingEngine {
    /// Pick the unit a reservation for `student` would consume.
    ///
    /// # Errors
    ///
    /// [`BookingError::InsufficientCredits`] when the student has no
    /// available unit; store failures otherwise.
    pub async fn allocate(
        &self,
        student: &StudentId,
        now: DateTime<Utc>,
    ) -> Result<CreditUnit, BookingError> {
        let candidates = self
            .repo
            .available_units(student, now, ALLOCATION_WINDOW)
            .await?;
        select(&candidates, now)
            .cloned()
            .ok_or(BookingError::InsufficientCredits)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{BookingId, CreditKind, CreditUnitId};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn unit(valid_for_hours: i64, consumed: bool) -> CreditUnit {
        let mut unit = CreditUnit::issue_until(
            CreditUnitId::new(),
            StudentId::new("s1"),
            CreditKind::FivePack,
            now() - Duration::days(30),
            now() + Duration::hours(valid_for_hours),
        );
        if consumed {
            unit.consumed_by = Some(BookingId::new());
            unit.consumed_at = Some(now());
        }
        unit
    }

    #[test]
    fn picks_soonest_expiring() {
        let units = vec![unit(48, false), unit(24, false), unit(72, false)];
        assert_eq!(select(&units, now()).unwrap().id, units[1].id);
    }

    #[test]
    fn skips_consumed_and_expired() {
        let units = vec![unit(1, true), unit(0, false), unit(-5, false), unit(10, false)];
        assert_eq!(select(&units, now()).unwrap().id, units[3].id);
        assert!(select(&units[..3], now()).is_none());
    }

    proptest! {
        #[test]
        fn selection_is_minimal_available(
            specs in proptest::collection::vec((-100_i64..100, any::<bool>()), 0..20)
        ) {
            let units: Vec<_> = specs.iter().map(|(h, c)| unit(*h, *c)).collect();
            let available: Vec<_> = units.iter().filter(|u| u.is_available(now())).collect();

            match select(&units, now()) {
                None => prop_assert!(available.is_empty()),
                Some(chosen) => {
                    prop_assert!(chosen.is_available(now()));
                    prop_assert!(available.iter().all(|u| chosen.valid_to <= u.valid_to));
                }
            }
        }
    }
}
