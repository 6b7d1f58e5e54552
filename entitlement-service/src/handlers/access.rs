//! User entitlement endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;

use crate::{dtos::AccessQuery, services::AccessSummary, startup::AppState};

/// Does the user currently hold paid access.
///
/// A store failure surfaces as an error response; it is never reported as
/// access granted.
pub async fn get_user_access(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<AccessQuery>,
) -> Result<Json<AccessSummary>, AppError> {
    let persist = query.persist.unwrap_or(true);
    let now = state.clock.now();

    tracing::info!(user_id = %user_id, persist, "Checking user access");

    let summary = state
        .evaluator
        .check_user_access(&user_id, now, persist)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Access check failed");
            AppError::from(e)
        })?;

    Ok(Json(summary))
}
