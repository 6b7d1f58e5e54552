//! Domain models for entitlement-service.

mod product;
mod subscription;
mod transaction;

pub use product::{PlanTier, Product, ProductKind, DEFAULT_SUBSCRIPTION_DURATION_DAYS};
pub use subscription::{BillingCycle, Subscription, SubscriptionStatus};
pub use transaction::{
    access_window_end, NewTransaction, Transaction, TransactionDefaults, TransactionStatus,
    MAX_ACCESS_PERIOD_DAYS,
};

// Helper module for optional DateTime<Utc> as BSON DateTime
pub(crate) mod opt_chrono_datetime_as_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(dt) => bson::DateTime::from_chrono(*dt).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<bson::DateTime> = Option::deserialize(deserializer)?;
        Ok(opt.map(|dt| dt.to_chrono()))
    }
}
