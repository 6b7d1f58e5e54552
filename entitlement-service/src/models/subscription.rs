//! Subscription (user grant) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::opt_chrono_datetime_as_bson_datetime;
use super::{Product, Transaction};

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BillingCycle {
    #[default]
    OneTime,
    Monthly,
    Yearly,
}

/// Access grant created from a paid transaction of a subscription product.
///
/// End date and activity are not stored; they are derived from the referenced
/// product's duration each time they are needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: String,
    pub transaction_id: String,
    pub user_id: String,
    pub product_id: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub auto_renew: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub next_renewal_date: Option<DateTime<Utc>>,
    pub status: SubscriptionStatus,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Grant for a transaction confirmed at `confirmed_at`.
    pub fn for_paid_transaction(transaction: &Transaction, confirmed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            transaction_id: transaction.id.clone(),
            user_id: transaction.user_id.clone(),
            product_id: transaction.product_id.clone(),
            start_date: Some(confirmed_at),
            billing_cycle: BillingCycle::OneTime,
            auto_renew: false,
            next_renewal_date: None,
            status: SubscriptionStatus::Active,
            created_at: confirmed_at,
            updated_at: confirmed_at,
        }
    }

    /// `None` when the product did not resolve, is not a subscription
    /// product, has no duration, or the grant has no start date.
    pub fn end_date(&self, product: Option<&Product>) -> Option<DateTime<Utc>> {
        let start = self.start_date?;
        product?.end_date(start)
    }

    /// Active strictly between the start date and the derived end date.
    pub fn is_active(&self, product: Option<&Product>, now: DateTime<Utc>) -> bool {
        let Some(start) = self.start_date else {
            return false;
        };
        if self.status != SubscriptionStatus::Active {
            return false;
        }
        match self.end_date(product) {
            Some(end) => now > start && now < end,
            None => false,
        }
    }
}
