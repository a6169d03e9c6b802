//! # Studio Testing
//!
//! Testing utilities for the studio booking engine.
//!
//! This crate provides:
//! - A settable clock for deterministic time
//! - An in-memory [`DocumentStore`](studio_core::document_store::DocumentStore)
//!   with unique indexes, injected latency and fault injection
//! - proptest strategies for times and amounts
//!
//! ## Example
//!
//! ```ignore
//! use studio_testing::{test_clock, InMemoryDocumentStore};
//!
//! #[tokio::test]
//! async fn reserve_consumes_one_credit() {
//!     let store = Arc::new(InMemoryDocumentStore::new());
//!     let clock = Arc::new(test_clock());
//!     let notifier = Arc::new(RecordingNotifier::new());
//!     let engine = BookingEngine::new(store, clock, notifier, BookingRules::default());
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use studio_core::environment::Clock;

mod document_mocks;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    pub use crate::document_mocks::{InMemoryDocumentStore, StoreOp};

    /// Settable clock for deterministic tests
    ///
    /// Returns the same time until moved with [`FixedClock::set`] or
    /// [`FixedClock::advance`]. Clones share the same time.
    ///
    /// # Example
    ///
    /// ```
    /// use studio_testing::mocks::FixedClock;
    /// use studio_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::hours(1));
    /// assert_eq!(clock.now() - before, Duration::hours(1));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            if let Ok(mut guard) = self.time.write() {
                *guard = time;
            }
        }

        /// Move the clock forward by `by`
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut guard) = self.time.write() {
                *guard += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time.read().map_or_else(|poisoned| **poisoned.get_ref(), |t| *t)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers.
pub mod helpers {
    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    /// Instants between 2024-01-01 and 2027-01-01, at millisecond precision.
    pub fn instant() -> impl Strategy<Value = DateTime<Utc>> {
        (1_704_067_200_000_i64..1_798_761_600_000_i64)
            .prop_map(|ms| Utc.timestamp_millis_opt(ms).single().unwrap_or_default())
    }

    /// Offsets between -30 and +30 days, at second precision.
    pub fn offset() -> impl Strategy<Value = Duration> {
        (-2_592_000_i64..2_592_000_i64).prop_map(Duration::seconds)
    }

    /// Euro amounts in cents up to €100.
    pub fn cents() -> impl Strategy<Value = i64> {
        0_i64..10_000
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, InMemoryDocumentStore, StoreOp, test_clock};
