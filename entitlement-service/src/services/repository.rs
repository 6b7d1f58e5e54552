//! Storage seams for the entitlement core.
//!
//! The host application owns the connection lifecycle and injects an
//! implementation of these traits; the core never reaches for a global handle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Product, Subscription, Transaction, TransactionStatus};

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_product_by_id(&self, id: &str) -> Result<Option<Product>>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Fails with `Conflict` when the session id is already recorded.
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()>;

    /// Replace the stored document with the same id.
    async fn save_transaction(&self, transaction: &Transaction) -> Result<()>;

    async fn find_transaction_by_id(&self, id: &str) -> Result<Option<Transaction>>;

    async fn find_transaction_by_session_id(&self, session_id: &str)
        -> Result<Option<Transaction>>;

    /// The user's transactions, latest access end date first.
    async fn find_transactions_for_user(
        &self,
        user_id: &str,
        status: Option<TransactionStatus>,
    ) -> Result<Vec<Transaction>>;

    /// Replace the stored document only while its status is still
    /// `expected`. Returns whether a document was replaced.
    async fn save_transaction_if_status(
        &self,
        transaction: &Transaction,
        expected: TransactionStatus,
    ) -> Result<bool>;

    /// Atomic server-side expiry of one record, matching only while it is
    /// paid with an access end date before `now`. Returns the updated record,
    /// or `None` when nothing matched.
    async fn expire_lapsed_transaction(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>>;

    /// Set-based expiry of every paid transaction whose access ended before
    /// `now`. Returns the number of documents modified.
    async fn expire_overdue_transactions(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Fails with `Conflict` when a grant already exists for the transaction.
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;

    async fn find_subscription_by_id(&self, id: &str) -> Result<Option<Subscription>>;

    async fn find_subscription_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Subscription>>;

    async fn find_subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>>;
}
