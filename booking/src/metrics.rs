//! Business metrics for the booking engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `booking_reservations_total{outcome}` - Reserve attempts by outcome
//! - `booking_cancellations_total{outcome}` - Cancel attempts by outcome
//! - `booking_credits_granted_total{kind}` - Credit units created
//! - `booking_inconsistencies_total{operation}` - Partial writes left for manual repair
//! - `booking_claim_conflicts_total` - Credit claims lost to a concurrent reservation
//! - `booking_capacity_rollbacks_total` - Bookings undone by the post-create capacity check
//! - `booking_notifications_total{kind, outcome}` - Notification deliveries
//!
//! ## Histograms
//! - `booking_reserve_duration_seconds` - Time taken by a reserve attempt
//! - `booking_cancel_duration_seconds` - Time taken by a cancel attempt

use crate::error::BookingError;
use crate::types::CreditKind;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Register all business metric descriptions.
///
/// Call once at startup, after the recorder is installed.
pub fn register_business_metrics() {
    describe_counter!(
        "booking_reservations_total",
        "Total number of reservation attempts by outcome"
    );
    describe_histogram!(
        "booking_reserve_duration_seconds",
        "Time taken by a reservation attempt"
    );
    describe_counter!(
        "booking_cancellations_total",
        "Total number of cancellation attempts by outcome"
    );
    describe_histogram!(
        "booking_cancel_duration_seconds",
        "Time taken by a cancellation attempt"
    );
    describe_counter!(
        "booking_credits_granted_total",
        "Total number of credit units created, by kind"
    );
    describe_counter!(
        "booking_inconsistencies_total",
        "Partial writes that could not be compensated"
    );
    describe_counter!(
        "booking_claim_conflicts_total",
        "Credit claims lost to a concurrent reservation"
    );
    describe_counter!(
        "booking_capacity_rollbacks_total",
        "Bookings rolled back because the lesson overfilled"
    );
    describe_counter!(
        "booking_notifications_total",
        "Notification deliveries by kind and outcome"
    );

    tracing::info!("Business metrics registered");
}

fn outcome<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.label(),
    }
}

/// Record a finished reservation attempt.
pub fn record_reservation<T>(result: &Result<T, BookingError>, elapsed: Duration) {
    counter!("booking_reservations_total", "outcome" => outcome(result)).increment(1);
    histogram!("booking_reserve_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record a finished cancellation attempt.
pub fn record_cancellation<T>(result: &Result<T, BookingError>, elapsed: Duration) {
    counter!("booking_cancellations_total", "outcome" => outcome(result)).increment(1);
    histogram!("booking_cancel_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record newly created credit units.
pub fn record_credits_granted(kind: CreditKind, quantity: u32) {
    counter!("booking_credits_granted_total", "kind" => kind.as_str()).increment(u64::from(quantity));
}

/// Record an uncompensated partial write.
pub fn record_inconsistency(operation: &'static str) {
    counter!("booking_inconsistencies_total", "operation" => operation).increment(1);
}

/// Record a lost credit claim race.
pub fn record_claim_conflict() {
    counter!("booking_claim_conflicts_total").increment(1);
}

/// Record a booking undone by the capacity re-check.
pub fn record_capacity_rollback() {
    counter!("booking_capacity_rollbacks_total").increment(1);
}

/// Record a notification delivery.
pub fn record_notification(kind: &'static str, delivered: bool) {
    let outcome = if delivered { "delivered" } else { "failed" };
    counter!("booking_notifications_total", "kind" => kind, "outcome" => outcome).increment(1);
}
