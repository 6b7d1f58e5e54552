//! Subscription lifecycle: grants derived from paid transactions and their
//! catalog-driven end date and activity.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use super::metrics;
use super::repository::{ProductRepository, SubscriptionRepository};
use crate::error::{EntitlementError, Result};
use crate::models::{Product, Subscription, Transaction, TransactionStatus};

#[derive(Clone)]
pub struct SubscriptionLifecycle {
    products: Arc<dyn ProductRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
}

impl SubscriptionLifecycle {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
    ) -> Self {
        Self {
            products,
            subscriptions,
        }
    }

    /// Create the grant for a paid transaction of a subscription product.
    /// Returns the existing grant when one is already recorded, and `None`
    /// for physical or unresolvable products. An expired transaction only
    /// reports its existing grant.
    pub async fn grant_for_transaction(
        &self,
        transaction: &Transaction,
        confirmed_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        if !matches!(
            transaction.status,
            TransactionStatus::Paid | TransactionStatus::Expired
        ) {
            return Ok(None);
        }

        let Some(product) = self
            .products
            .find_product_by_id(&transaction.product_id)
            .await?
        else {
            tracing::warn!(
                transaction_id = %transaction.id,
                product_id = %transaction.product_id,
                "Product not found, no subscription granted"
            );
            return Ok(None);
        };

        if !product.is_subscription() {
            tracing::debug!(
                transaction_id = %transaction.id,
                product_id = %product.id,
                kind = product.kind.as_str(),
                "Product is not a subscription, no grant"
            );
            return Ok(None);
        }

        if let Some(existing) = self
            .subscriptions
            .find_subscription_by_transaction_id(&transaction.id)
            .await?
        {
            return Ok(Some(existing));
        }
        if transaction.status != TransactionStatus::Paid {
            return Ok(None);
        }

        let subscription = Subscription::for_paid_transaction(transaction, confirmed_at);
        match self.subscriptions.insert_subscription(&subscription).await {
            Ok(()) => {}
            // Lost a race with a concurrent confirmation of the same session
            Err(EntitlementError::Conflict(_)) => {
                return self
                    .subscriptions
                    .find_subscription_by_transaction_id(&transaction.id)
                    .await;
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            subscription_id = %subscription.id,
            transaction_id = %transaction.id,
            user_id = %subscription.user_id,
            product_id = %subscription.product_id,
            "Subscription granted"
        );
        metrics::record_subscription_created(&subscription.product_id);

        Ok(Some(subscription))
    }

    pub async fn get_subscription(&self, id: &str) -> Result<Subscription> {
        self.subscriptions
            .find_subscription_by_id(id)
            .await?
            .ok_or_else(|| EntitlementError::not_found("subscription", id))
    }

    /// `None` when the product is missing, not a subscription, or has no
    /// duration. Store failures propagate.
    pub async fn end_date(&self, subscription: &Subscription) -> Result<Option<DateTime<Utc>>> {
        let product = self
            .products
            .find_product_by_id(&subscription.product_id)
            .await?;
        Ok(subscription.end_date(product.as_ref()))
    }

    pub async fn is_active(&self, subscription: &Subscription, now: DateTime<Utc>) -> Result<bool> {
        let product = self
            .products
            .find_product_by_id(&subscription.product_id)
            .await?;
        Ok(subscription.is_active(product.as_ref(), now))
    }

    pub async fn active_subscriptions_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.find_subscriptions_for_user(user_id).await?;

        let mut catalog: HashMap<String, Option<Product>> = HashMap::new();
        let mut active = Vec::new();
        for subscription in subscriptions {
            if !catalog.contains_key(&subscription.product_id) {
                let product = self
                    .products
                    .find_product_by_id(&subscription.product_id)
                    .await?;
                catalog.insert(subscription.product_id.clone(), product);
            }
            let product = catalog.get(&subscription.product_id).and_then(Option::as_ref);
            if subscription.is_active(product, now) {
                active.push(subscription);
            }
        }
        Ok(active)
    }
}
