//! The single credit price table used by every revenue figure.

use crate::types::{CreditKind, CreditUnit, Money};

/// Maps a consumed credit unit to the revenue of the booking it paid for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceTable {
    default_revenue: Money,
}

impl PriceTable {
    /// Create a table with the fallback revenue for unpriced bookings.
    #[must_use]
    pub const fn new(default_revenue: Money) -> Self {
        Self { default_revenue }
    }

    /// Fixed per-lesson price of a credit kind, if it has one.
    #[must_use]
    pub const fn price_of(kind: CreditKind) -> Option<Money> {
        match kind {
            CreditKind::Single => Some(Money::from_cents(1_600)),
            CreditKind::FivePack => Some(Money::from_cents(1_450)),
            CreditKind::TenPack => Some(Money::from_cents(1_350)),
            CreditKind::TwentyPack => Some(Money::from_cents(1_250)),
            CreditKind::Welcome => Some(Money::ZERO),
            CreditKind::Legacy | CreditKind::Other => None,
        }
    }

    /// Fallback revenue per booking.
    #[must_use]
    pub const fn default_revenue(&self) -> Money {
        self.default_revenue
    }

    /// Revenue of one booking, given the unit it consumed (if any).
    #[must_use]
    pub fn booking_revenue(&self, unit: Option<&CreditUnit>) -> Money {
        unit.and_then(|unit| Self::price_of(unit.kind))
            .unwrap_or(self.default_revenue)
    }
}
