//! `GET /api/revenue?from&to&bucket` (admin).

use super::query;
use crate::auth::RequireAdmin;
use crate::engine::{Bucket, RevenueReport};
use crate::server::AppState;
use axum::{Json, extract::Query, extract::State, extract::rejection::QueryRejection};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use studio_web::AppError;

/// Query string of `GET /revenue`.
#[derive(Debug, Deserialize)]
pub struct RevenueQuery {
    /// Start of the range, RFC 3339 or `YYYY-MM-DD`
    pub from: String,
    /// End of the range, RFC 3339 or `YYYY-MM-DD` (whole day included)
    pub to: String,
    /// Grouping, `week` when absent
    #[serde(default)]
    pub bucket: Bucket,
}

/// Parse a range bound. A bare date means the start of that day, or its
/// last instant when `end_of_day` is set.
fn parse_bound(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)?
    } else {
        NaiveTime::MIN
    };
    Some(date.and_time(time).and_utc())
}

/// Bucketed revenue, cost and profit.
///
/// # Errors
///
/// `400` for missing or malformed bounds or `from > to`; auth and store errors.
pub async fn revenue(
    State(state): State<AppState>,
    RequireAdmin(actor): RequireAdmin,
    params: Result<Query<RevenueQuery>, QueryRejection>,
) -> Result<Json<RevenueReport>, AppError> {
    let params = query(params)?;
    let from = parse_bound(&params.from, false)
        .ok_or_else(|| AppError::bad_request("`from` must be a date or RFC 3339 timestamp"))?;
    let to = parse_bound(&params.to, true)
        .ok_or_else(|| AppError::bad_request("`to` must be a date or RFC 3339 timestamp"))?;

    Ok(Json(state.engine.revenue(&actor, from, to, params.bucket).await?))
}
