//! # Studio booking
//!
//! Booking and credit allocation engine for a yoga studio, with its HTTP
//! API.
//!
//! Students reserve places in fixed-capacity lessons with prepaid,
//! individually expiring credit units. The engine decides whether a
//! reservation may proceed, which unit it consumes (soonest expiry first),
//! how a cancellation returns that unit and how consumed units turn into
//! revenue.
//!
//! ## Modules
//!
//! - [`types`]: persisted model (students, lessons, bookings, credit units)
//! - [`repository`]: typed queries over the document store
//! - [`engine`]: the multi-document transactions and reports
//! - [`notify`]: confirmation, cancellation and reminder notices
//! - [`auth`]: session verification and the auth extractors
//! - [`api`] and [`server`]: the axum surface
//! - [`config`]: environment configuration
//! - [`metrics`]: business metrics
//!
//! ## Consistency
//!
//! The store offers single-document atomicity only. Credit claims are
//! conditional updates, so two reservations never consume the same unit.
//! Capacity is checked before writing and re-checked after; a booking that
//! lands beyond capacity is rolled back. A failed compensation ends in
//! [`BookingError::Inconsistent`] and an `error!` log naming every id.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod repository;
pub mod server;
pub mod types;

pub use auth::{RemoteSessionVerifier, SessionVerifier, StaticSessionVerifier};
pub use config::{BookingRules, Config};
pub use engine::BookingEngine;
pub use error::BookingError;
pub use notify::{ConsoleNotifier, Notification, Notifier, RecordingNotifier};
pub use server::{AppState, build_router};
pub use types::{
    Actor, Booking, BookingId, CreditKind, CreditUnit, CreditUnitId, Lesson, LessonId,
    LessonKind, Money, Student, StudentId,
};
