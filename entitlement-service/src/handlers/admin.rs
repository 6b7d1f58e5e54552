use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::{dtos::SweepResponse, services::run_sweep_once, startup::AppState};

/// Trigger the expiry sweep on demand.
pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepResponse>, AppError> {
    let ran_at = state.clock.now();
    let expired = run_sweep_once(&state.evaluator, state.clock.as_ref()).await?;
    Ok(Json(SweepResponse { expired, ran_at }))
}
