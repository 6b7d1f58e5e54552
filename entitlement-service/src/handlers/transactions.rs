//! Transaction lifecycle endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{ConfirmPaymentRequest, ConfirmPaymentResponse, TransactionResponse},
    models::NewTransaction,
    startup::AppState,
};

/// Record a pending transaction when a checkout session is opened.
pub async fn create_transaction(
    State(state): State<AppState>,
    Json(payload): Json<NewTransaction>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let now = state.clock.now();
    let transaction = state.transactions.create_transaction(payload, now).await?;
    let remaining = state.evaluator.remaining_days(&transaction, now);

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse::new(transaction, remaining)),
    ))
}

/// Fetch a transaction. A lapsed record is expired on read.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionResponse>, AppError> {
    let now = state.clock.now();
    let transaction = state.transactions.get_transaction(&transaction_id).await?;
    let decision = state.evaluator.check_access(transaction, now, true).await?;
    let remaining = state.evaluator.remaining_days(&decision.transaction, now);

    Ok(Json(TransactionResponse::new(decision.transaction, remaining)))
}

/// Apply the payment gateway's verification result for a checkout session.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmPaymentResponse>, AppError> {
    tracing::info!(
        session_id = %payload.session_id,
        payment_status = %payload.confirmation.payment_status,
        "Confirming payment"
    );

    let now = state.clock.now();
    let outcome = state
        .transactions
        .confirm_payment(&payload.session_id, payload.confirmation, now)
        .await?;
    let remaining = state.evaluator.remaining_days(&outcome.transaction, now);

    Ok(Json(ConfirmPaymentResponse {
        transaction: TransactionResponse::new(outcome.transaction, remaining),
        subscription: outcome.subscription.map(Into::into),
    }))
}

pub async fn cancel_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionResponse>, AppError> {
    let now = state.clock.now();
    let transaction = state
        .transactions
        .cancel_transaction(&transaction_id, now)
        .await?;

    Ok(Json(TransactionResponse::new(transaction, 0)))
}
