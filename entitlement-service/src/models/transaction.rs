//! Payment transaction model and its state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::opt_chrono_datetime_as_bson_datetime;
use super::Product;
use crate::error::{EntitlementError, Result};

/// Transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Failed,
    Canceled,
    Expired,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Paid => "paid",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Canceled => "canceled",
            TransactionStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Failed | TransactionStatus::Canceled | TransactionStatus::Expired
        )
    }

    /// pending -> paid | failed | canceled, paid -> expired.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (
                TransactionStatus::Pending,
                TransactionStatus::Paid | TransactionStatus::Failed | TransactionStatus::Canceled
            ) | (TransactionStatus::Paid, TransactionStatus::Expired)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One payment attempt, keyed by the gateway's checkout session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub customer_email: String,
    pub stripe_session_id: String,
    pub product_id: String,
    /// Copied from the product at creation so history survives catalog edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub access_start_date: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub access_end_date: Option<DateTime<Utc>>,
    pub access_period_days: u32,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Derive `access_end_date` from the start date and period when it is
    /// missing. Never overwrites an end date that is already set, and leaves
    /// it unset when the sum overflows.
    pub fn fill_access_window(&mut self) -> bool {
        match (self.access_start_date, self.access_end_date) {
            (Some(start), None) => match access_window_end(start, self.access_period_days) {
                Some(end) => {
                    self.access_end_date = Some(end);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    pub fn transition_to(&mut self, next: TransactionStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EntitlementError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Gateway confirmed payment: open the access window at `now` unless a
    /// start date was already recorded. Leaves the record untouched when the
    /// window cannot be represented.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(TransactionStatus::Paid) {
            return Err(EntitlementError::InvalidTransition {
                from: self.status,
                to: TransactionStatus::Paid,
            });
        }
        let start = self.access_start_date.unwrap_or(now);
        if self.access_end_date.is_none()
            && access_window_end(start, self.access_period_days).is_none()
        {
            return Err(EntitlementError::InvalidInput(format!(
                "access period of {} days from {} is out of range",
                self.access_period_days, start
            )));
        }

        self.transition_to(TransactionStatus::Paid, now)?;
        self.access_start_date = Some(start);
        self.fill_access_window();
        Ok(())
    }

    pub fn has_access(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::Paid
            && self.access_end_date.is_some_and(|end| now <= end)
    }

    /// Paid, but the access window closed before `now`.
    pub fn access_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::Paid
            && self.access_end_date.is_some_and(|end| now > end)
    }
}

/// Values applied when neither the caller nor the catalog supplies them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDefaults {
    pub currency: String,
    pub access_period_days: u32,
}

impl Default for TransactionDefaults {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            access_period_days: 30,
        }
    }
}

/// Longest access period a caller may request.
pub const MAX_ACCESS_PERIOD_DAYS: u32 = 36_500;

/// `start + days`, or `None` past the representable date range.
pub fn access_window_end(start: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    start.checked_add_signed(Duration::days(i64::from(days)))
}

/// Draft of a transaction as submitted when a checkout session is opened.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_access_window"))]
pub struct NewTransaction {
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
    #[serde(default)]
    #[validate(email(message = "Invalid customer email"))]
    pub customer_email: Option<String>,
    #[validate(length(min = 1, message = "stripe_session_id is required"))]
    pub stripe_session_id: String,
    #[validate(length(min = 1, message = "product_id is required"))]
    pub product_id: String,
    #[validate(range(min = 0, message = "amount must not be negative"))]
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    #[validate(range(
        min = 1,
        max = 36500,
        message = "access_period_days must be between 1 and 36500"
    ))]
    pub access_period_days: Option<u32>,
    #[serde(default)]
    pub access_start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_end_date: Option<DateTime<Utc>>,
}

/// A start date with no explicit end must leave room for the longest period.
fn validate_access_window(draft: &NewTransaction) -> std::result::Result<(), ValidationError> {
    if let (Some(start), None) = (draft.access_start_date, draft.access_end_date) {
        let days = draft.access_period_days.unwrap_or(MAX_ACCESS_PERIOD_DAYS);
        if access_window_end(start, days).is_none() {
            let mut err = ValidationError::new("access_window");
            err.message = Some("access_start_date is out of range".into());
            return Err(err);
        }
    }
    Ok(())
}

impl NewTransaction {
    /// Build the pending record. Caller-supplied fields always win; the
    /// product (when it resolved) fills the name and period, the defaults
    /// fill whatever is still missing.
    pub fn into_transaction(
        self,
        product: Option<&Product>,
        defaults: &TransactionDefaults,
        now: DateTime<Utc>,
    ) -> Transaction {
        let product_name = self
            .product_name
            .or_else(|| product.map(|p| p.name.clone()));

        let access_period_days = self
            .access_period_days
            .or_else(|| product.and_then(Product::subscription_duration_days))
            .unwrap_or(defaults.access_period_days);

        let currency = self
            .currency
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| defaults.currency.clone())
            .to_uppercase();

        let mut transaction = Transaction {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id,
            customer_email: self.customer_email.unwrap_or_default(),
            stripe_session_id: self.stripe_session_id,
            product_id: self.product_id,
            product_name,
            amount: self.amount,
            currency,
            status: TransactionStatus::Pending,
            access_start_date: self.access_start_date,
            access_end_date: self.access_end_date,
            access_period_days,
            created_at: now,
            updated_at: now,
        };
        transaction.fill_access_window();
        transaction
    }
}
