//! Credit ledger endpoints.
//!
//! - `POST /api/credits/add` (admin)
//! - `POST /api/credits/welcome`
//! - `POST /api/credits/history`
//! - `GET /api/credits/summary` (admin)
//! - `POST /api/credits/migrate` (admin)

use super::body;
use crate::auth::{RequireAdmin, SessionUser};
use crate::engine::{CreditHistory, MigrationReport, WelcomeOutcome};
use crate::server::AppState;
use crate::types::{CreditKind, CreditUnit, StudentId};
use axum::{Json, extract::State, extract::rejection::JsonRejection, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use studio_web::AppError;

/// Body of `POST /credits/add`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCreditsRequest {
    /// Receiving student
    pub student_id: StudentId,
    /// Top-up kind (`credit_1`, `credit_5`, `credit_10`)
    pub kind: CreditKind,
}

/// Response of `POST /credits/add`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCreditsResponse {
    /// Units created
    pub count: usize,
    /// The units
    pub units: Vec<CreditUnit>,
}

/// Body of `POST /credits/welcome`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeRequest {
    /// Student to welcome
    pub student_id: StudentId,
}

/// Body of `POST /credits/history`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    /// Student whose history to read (admins only)
    #[serde(default)]
    pub student_id: Option<StudentId>,
}

/// Response of `GET /credits/summary`.
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    /// Available units per student
    pub summary: BTreeMap<StudentId, u64>,
}

/// Sell a top-up.
///
/// # Errors
///
/// Validation, auth, not-found and store errors.
pub async fn add(
    State(state): State<AppState>,
    RequireAdmin(actor): RequireAdmin,
    payload: Result<Json<AddCreditsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AddCreditsResponse>), AppError> {
    let request = body(payload)?;
    let units = state
        .engine
        .add_credits(&actor, request.student_id, request.kind)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AddCreditsResponse {
            count: units.len(),
            units,
        }),
    ))
}

/// Grant the one-time welcome credit.
///
/// # Errors
///
/// Validation, auth, not-found and store errors. A refused grant is a
/// `200` with `success: false`.
pub async fn welcome(
    State(state): State<AppState>,
    SessionUser(actor): SessionUser,
    payload: Result<Json<WelcomeRequest>, JsonRejection>,
) -> Result<Json<WelcomeOutcome>, AppError> {
    let request = body(payload)?;
    Ok(Json(state.engine.grant_welcome(&actor, request.student_id).await?))
}

/// A student's credit history.
///
/// # Errors
///
/// Validation, auth and store errors.
pub async fn history(
    State(state): State<AppState>,
    SessionUser(actor): SessionUser,
    payload: Result<Json<HistoryRequest>, JsonRejection>,
) -> Result<Json<CreditHistory>, AppError> {
    let request = body(payload)?;
    Ok(Json(state.engine.credit_history(&actor, request.student_id).await?))
}

/// Available credit count per student.
///
/// # Errors
///
/// Auth and store errors.
pub async fn summary(
    State(state): State<AppState>,
    RequireAdmin(actor): RequireAdmin,
) -> Result<Json<SummaryResponse>, AppError> {
    let summary = state.engine.credit_summary(&actor).await?;
    Ok(Json(SummaryResponse { summary }))
}

/// Migrate legacy credit counters.
///
/// # Errors
///
/// Auth and store errors.
pub async fn migrate(
    State(state): State<AppState>,
    RequireAdmin(actor): RequireAdmin,
) -> Result<Json<MigrationReport>, AppError> {
    Ok(Json(state.engine.migrate_legacy_credits(&actor).await?))
}
