//! # Studio Core
//!
//! Core traits and types shared by every crate of the studio booking engine.
//!
//! The booking engine runs on top of a managed document store that only offers
//! per-document atomic writes. This crate defines that collaborator as a trait
//! so the engine can be exercised against an in-memory store in tests and a
//! `PostgreSQL` store in production.
//!
//! ## Core Concepts
//!
//! - **Clock**: Injected time source, so cancellation windows and credit expiry
//!   are deterministic under test
//! - **`DocumentStore`**: Per-document CRUD, filtered listing and a
//!   compare-and-set update (the only concurrency primitive available)
//! - **Query**: Conjunction of field filters with optional ordering and paging
//!
//! ## Example
//!
//! ```ignore
//! use studio_core::document_store::{Collection, DocumentStore, Query};
//!
//! async fn soonest_expiring(store: &dyn DocumentStore) {
//!     let query = Query::new()
//!         .eq("studentId", "student-1")
//!         .is_null("consumedBy")
//!         .order_asc("validTo")
//!         .limit(1);
//!     let units = store.list(Collection::new("credit_units"), query).await;
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod document_store;

/// Environment module - Dependency injection traits
///
/// All external dependencies of the engine are abstracted behind traits and
/// injected at construction time. Time is the one every transaction needs.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
