use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Subscription, Transaction, TransactionStatus};
use crate::services::PaymentConfirmation;

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub session_id: String,
    #[serde(flatten)]
    pub confirmation: PaymentConfirmation,
}

#[derive(Debug, Deserialize, Default)]
pub struct AccessQuery {
    /// Set to false to evaluate without writing lazy expiries.
    #[serde(default)]
    pub persist: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: String,
    pub user_id: String,
    pub customer_email: String,
    pub stripe_session_id: String,
    pub product_id: String,
    pub product_name: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub access_start_date: Option<DateTime<Utc>>,
    pub access_end_date: Option<DateTime<Utc>>,
    pub access_period_days: u32,
    pub remaining_days: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionResponse {
    pub fn new(transaction: Transaction, remaining_days: u32) -> Self {
        Self {
            id: transaction.id,
            user_id: transaction.user_id,
            customer_email: transaction.customer_email,
            stripe_session_id: transaction.stripe_session_id,
            product_id: transaction.product_id,
            product_name: transaction.product_name,
            amount: transaction.amount,
            currency: transaction.currency,
            status: transaction.status,
            access_start_date: transaction.access_start_date,
            access_end_date: transaction.access_end_date,
            access_period_days: transaction.access_period_days,
            remaining_days,
            created_at: transaction.created_at,
            updated_at: transaction.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub id: String,
    pub transaction_id: String,
    pub user_id: String,
    pub product_id: String,
    pub start_date: Option<DateTime<Utc>>,
    pub status: String,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(subscription: Subscription) -> Self {
        Self {
            id: subscription.id,
            transaction_id: subscription.transaction_id,
            user_id: subscription.user_id,
            product_id: subscription.product_id,
            start_date: subscription.start_date,
            status: subscription.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmPaymentResponse {
    pub transaction: TransactionResponse,
    pub subscription: Option<SubscriptionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SweepResponse {
    pub expired: u64,
    pub ran_at: DateTime<Utc>,
}
