//! In-process repositories with the same filter semantics as the MongoDB
//! store. Used by tests and local runs without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::repository::{ProductRepository, SubscriptionRepository, TransactionRepository};
use crate::error::{EntitlementError, Result};
use crate::models::{Product, Subscription, Transaction, TransactionStatus};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    products: RwLock<HashMap<String, Product>>,
    transactions: RwLock<HashMap<String, Transaction>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        for product in products {
            store.upsert_product(product).await;
        }
        store
    }

    pub async fn upsert_product(&self, product: Product) {
        self.products
            .write()
            .await
            .insert(product.id.clone(), product);
    }

    /// Simulate an outage: every subsequent call fails with a store error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EntitlementError::Store(anyhow::anyhow!(
                "in-memory store marked unavailable"
            )));
        }
        Ok(())
    }
}

fn is_overdue(transaction: &Transaction, now: DateTime<Utc>) -> bool {
    transaction.status == TransactionStatus::Paid
        && transaction.access_end_date.is_some_and(|end| end < now)
}

#[async_trait]
impl ProductRepository for InMemoryStore {
    async fn find_product_by_id(&self, id: &str) -> Result<Option<Product>> {
        self.check_available()?;
        Ok(self.products.read().await.get(id).cloned())
    }
}

#[async_trait]
impl TransactionRepository for InMemoryStore {
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.check_available()?;
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&transaction.id)
            || transactions
                .values()
                .any(|t| t.stripe_session_id == transaction.stripe_session_id)
        {
            return Err(EntitlementError::Conflict(format!(
                "transaction already exists for session {}",
                transaction.stripe_session_id
            )));
        }
        transactions.insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn save_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.check_available()?;
        let mut transactions = self.transactions.write().await;
        match transactions.get_mut(&transaction.id) {
            Some(stored) => {
                *stored = transaction.clone();
                Ok(())
            }
            None => Err(EntitlementError::not_found("transaction", &transaction.id)),
        }
    }

    async fn find_transaction_by_id(&self, id: &str) -> Result<Option<Transaction>> {
        self.check_available()?;
        Ok(self.transactions.read().await.get(id).cloned())
    }

    async fn find_transaction_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<Transaction>> {
        self.check_available()?;
        Ok(self
            .transactions
            .read()
            .await
            .values()
            .find(|t| t.stripe_session_id == session_id)
            .cloned())
    }

    async fn find_transactions_for_user(
        &self,
        user_id: &str,
        status: Option<TransactionStatus>,
    ) -> Result<Vec<Transaction>> {
        self.check_available()?;
        let mut found: Vec<Transaction> = self
            .transactions
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id)
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        // Descending; Option orders None first, so missing end dates sort last
        found.sort_by(|a, b| {
            b.access_end_date
                .cmp(&a.access_end_date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(found)
    }

    async fn save_transaction_if_status(
        &self,
        transaction: &Transaction,
        expected: TransactionStatus,
    ) -> Result<bool> {
        self.check_available()?;
        let mut transactions = self.transactions.write().await;
        match transactions.get_mut(&transaction.id) {
            Some(stored) if stored.status == expected => {
                *stored = transaction.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_lapsed_transaction(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>> {
        self.check_available()?;
        let mut transactions = self.transactions.write().await;
        Ok(transactions
            .get_mut(id)
            .filter(|stored| is_overdue(stored, now))
            .map(|stored| {
                stored.status = TransactionStatus::Expired;
                stored.updated_at = now;
                stored.clone()
            }))
    }

    async fn expire_overdue_transactions(&self, now: DateTime<Utc>) -> Result<u64> {
        self.check_available()?;
        let mut modified = 0;
        for stored in self.transactions.write().await.values_mut() {
            if is_overdue(stored, now) {
                stored.status = TransactionStatus::Expired;
                stored.updated_at = now;
                modified += 1;
            }
        }
        Ok(modified)
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.check_available()?;
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions
            .values()
            .any(|s| s.transaction_id == subscription.transaction_id)
        {
            return Err(EntitlementError::Conflict(format!(
                "subscription already exists for transaction {}",
                subscription.transaction_id
            )));
        }
        subscriptions.insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn find_subscription_by_id(&self, id: &str) -> Result<Option<Subscription>> {
        self.check_available()?;
        Ok(self.subscriptions.read().await.get(id).cloned())
    }

    async fn find_subscription_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Subscription>> {
        self.check_available()?;
        Ok(self
            .subscriptions
            .read()
            .await
            .values()
            .find(|s| s.transaction_id == transaction_id)
            .cloned())
    }

    async fn find_subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        self.check_available()?;
        let mut found: Vec<Subscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(found)
    }
}
