//! Catalog product model.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SUBSCRIPTION_DURATION_DAYS: u32 = 30;

/// Product discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Subscription,
    Physical,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Subscription => "subscription",
            ProductKind::Physical => "physical",
        }
    }
}

/// Plan tier of a subscription product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Basic,
    Premium,
    Enterprise,
}

/// Catalog entry. Read-only from the entitlement core's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    #[serde(rename = "type")]
    pub kind: ProductKind,
    /// Only carried by subscription products.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanTier>,
}

impl Product {
    pub fn subscription(
        id: impl Into<String>,
        name: impl Into<String>,
        price: Decimal,
        currency: impl Into<String>,
        duration_days: Option<u32>,
        plan: PlanTier,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            currency: currency.into().to_uppercase(),
            kind: ProductKind::Subscription,
            duration_days: Some(
                duration_days
                    .unwrap_or(DEFAULT_SUBSCRIPTION_DURATION_DAYS)
                    .max(1),
            ),
            plan: Some(plan),
        }
    }

    pub fn physical(
        id: impl Into<String>,
        name: impl Into<String>,
        price: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            currency: currency.into().to_uppercase(),
            kind: ProductKind::Physical,
            duration_days: None,
            plan: None,
        }
    }

    pub fn is_subscription(&self) -> bool {
        self.kind == ProductKind::Subscription
    }

    /// Duration in days, present only for subscription products that carry one.
    pub fn subscription_duration_days(&self) -> Option<u32> {
        if !self.is_subscription() {
            return None;
        }
        self.duration_days.filter(|days| *days >= 1)
    }

    pub fn end_date(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.subscription_duration_days()
            .and_then(|days| start.checked_add_signed(Duration::days(i64::from(days))))
    }

    /// Active strictly between `start` and `start + duration`; both boundary
    /// instants are inactive.
    pub fn is_active(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.end_date(start) {
            Some(end) => now > start && now < end,
            None => false,
        }
    }
}
