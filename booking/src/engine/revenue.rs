//! Revenue reporting.
//!
//! Read-only: lessons in a date range are joined with their bookings and the
//! credit units those bookings consumed, priced through the shared
//! [`PriceTable`], and grouped into UTC calendar buckets.

use super::{BookingEngine, PriceTable, require_admin};
use crate::error::BookingError;
use crate::types::{Actor, Booking, BookingId, CreditUnit, Lesson, Money};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use studio_core::document_store::Direction;
use tracing::{debug, instrument};

/// Time grouping of a revenue report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Calendar day
    Day,
    /// ISO week
    #[default]
    Week,
    /// Calendar month
    Month,
    /// Calendar year
    Year,
}

impl Bucket {
    /// Sortable key of the bucket containing `at`.
    #[must_use]
    pub fn key(self, at: DateTime<Utc>) -> String {
        match self {
            Self::Day => at.format("%Y-%m-%d").to_string(),
            Self::Week => {
                let week = at.iso_week();
                format!("{:04}-W{:02}", week.year(), week.week())
            }
            Self::Month => at.format("%Y-%m").to_string(),
            Self::Year => format!("{:04}", at.year()),
        }
    }

    /// Display label of the bucket containing `at`.
    #[must_use]
    pub fn label(self, at: DateTime<Utc>) -> String {
        match self {
            Self::Day => format!("{} {}", at.day(), Self::month_label(at)),
            Self::Week => {
                let week = at.iso_week();
                format!("{} wk {:02}", week.year(), week.week())
            }
            Self::Month => Self::month_label(at),
            Self::Year => at.year().to_string(),
        }
    }

    fn month_label(at: DateTime<Utc>) -> String {
        format!("{} {}", at.format("%b").to_string().to_lowercase(), at.year())
    }
}

/// Figures for one bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueBucket {
    /// Sortable key (`2025-W02`, `2025-01`, ...)
    pub key: String,
    /// Display label
    pub label: String,
    /// Sum of booking revenue
    pub revenue: Money,
    /// Sum of lesson cost
    pub cost: Money,
    /// `revenue - cost`
    pub profit: Money,
    /// Bookings counted
    pub booking_count: u32,
    /// Lessons counted
    pub lesson_count: u32,
}

/// A bucketed revenue report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueReport {
    /// Buckets in chronological order
    pub data: Vec<RevenueBucket>,
    /// Fallback revenue per booking used for unpriced credits
    pub revenue_per_booking: Money,
    /// Cost attributed to each lesson
    pub cost_per_lesson: Money,
}

/// Group `lessons` into buckets and price their bookings.
///
/// Bookings of lessons not in `lessons` are ignored. A booking without a
/// consumed unit in `units` earns the table's fallback revenue.
#[must_use]
pub fn aggregate(
    lessons: &[Lesson],
    bookings: &[Booking],
    units: &[CreditUnit],
    bucket: Bucket,
    prices: &PriceTable,
    cost_per_lesson: Money,
) -> Vec<RevenueBucket> {
    let unit_by_booking: HashMap<BookingId, &CreditUnit> = units
        .iter()
        .filter_map(|unit| unit.consumed_by.map(|booking| (booking, unit)))
        .collect();

    let mut bookings_by_lesson: HashMap<_, Vec<&Booking>> = HashMap::new();
    for booking in bookings {
        bookings_by_lesson.entry(booking.lesson_id).or_default().push(booking);
    }

    let mut buckets: BTreeMap<String, RevenueBucket> = BTreeMap::new();
    for lesson in lessons {
        let key = bucket.key(lesson.starts_at);
        let entry = buckets.entry(key.clone()).or_insert_with(|| RevenueBucket {
            key,
            label: bucket.label(lesson.starts_at),
            revenue: Money::ZERO,
            cost: Money::ZERO,
            profit: Money::ZERO,
            booking_count: 0,
            lesson_count: 0,
        });

        let lesson_bookings = bookings_by_lesson.get(&lesson.id).map_or(&[][..], Vec::as_slice);
        let revenue: Money = lesson_bookings
            .iter()
            .map(|booking| prices.booking_revenue(unit_by_booking.get(&booking.id).copied()))
            .sum();

        entry.revenue += revenue;
        entry.cost += cost_per_lesson;
        entry.booking_count += u32::try_from(lesson_bookings.len()).unwrap_or(u32::MAX);
        entry.lesson_count += 1;
        entry.profit = entry.revenue - entry.cost;
    }

    buckets.into_values().collect()
}

impl BookingEngine {
    /// Revenue of lessons starting in `[from, to]`, grouped by `bucket`.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`]: caller is not an admin
    /// - [`BookingError::Validation`]: `from` is after `to`
    /// - [`BookingError::Store`]: the store failed
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn revenue(
        &self,
        actor: &Actor,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        bucket: Bucket,
    ) -> Result<RevenueReport, BookingError> {
        require_admin(actor)?;
        if from > to {
            return Err(BookingError::validation("`from` must not be after `to`"));
        }

        let lessons = self
            .repo
            .lessons_between(Some(from), Some(to), Direction::Ascending)
            .await?;
        let lesson_ids: Vec<_> = lessons.iter().map(|l| l.id).collect();
        let bookings = self.repo.bookings_for_lessons(&lesson_ids).await?;
        let booking_ids: Vec<_> = bookings.iter().map(|b| b.id).collect();
        let units = self.repo.units_consumed_by_any(&booking_ids).await?;

        debug!(
            lessons = lessons.len(),
            bookings = bookings.len(),
            units = units.len(),
            "Aggregating revenue"
        );

        Ok(RevenueReport {
            data: aggregate(
                &lessons,
                &bookings,
                &units,
                bucket,
                &self.prices,
                self.rules.cost_per_lesson,
            ),
            revenue_per_booking: self.prices.default_revenue(),
            cost_per_lesson: self.rules.cost_per_lesson,
        })
    }
}
