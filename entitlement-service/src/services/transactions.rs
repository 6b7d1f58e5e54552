//! Transaction lifecycle: creation with catalog enrichment, payment
//! confirmation, failure and cancellation.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::repository::{ProductRepository, TransactionRepository};
use super::subscriptions::SubscriptionLifecycle;
use crate::error::{EntitlementError, Result};
use crate::models::{
    NewTransaction, Product, Subscription, Transaction, TransactionDefaults, TransactionStatus,
};

pub const PAYMENT_STATUS_PAID: &str = "paid";

/// Result of a checkout session as reported by the payment gateway.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PaymentConfirmation {
    pub payment_status: String,
    #[serde(default)]
    #[validate(range(min = 0, message = "amount_total must not be negative"))]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    #[validate(email(message = "Invalid customer email"))]
    pub customer_email: Option<String>,
}

impl PaymentConfirmation {
    pub fn is_paid(&self) -> bool {
        self.payment_status.eq_ignore_ascii_case(PAYMENT_STATUS_PAID)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    pub transaction: Transaction,
    /// Present when the product is a subscription product.
    pub subscription: Option<Subscription>,
}

#[derive(Clone)]
pub struct TransactionLifecycle {
    products: Arc<dyn ProductRepository>,
    transactions: Arc<dyn TransactionRepository>,
    subscriptions: SubscriptionLifecycle,
    defaults: TransactionDefaults,
}

impl TransactionLifecycle {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        transactions: Arc<dyn TransactionRepository>,
        subscriptions: SubscriptionLifecycle,
        defaults: TransactionDefaults,
    ) -> Self {
        Self {
            products,
            transactions,
            subscriptions,
            defaults,
        }
    }

    pub fn defaults(&self) -> &TransactionDefaults {
        &self.defaults
    }

    /// Product lookup used for denormalisation. A miss or a failing catalog
    /// does not block the ledger entry.
    async fn lookup_product_lenient(&self, product_id: &str) -> Option<Product> {
        match self.products.find_product_by_id(product_id).await {
            Ok(Some(product)) => Some(product),
            Ok(None) => {
                tracing::warn!(
                    product_id = %product_id,
                    "Product not found, creating transaction without catalog fields"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    product_id = %product_id,
                    error = %e,
                    "Product lookup failed, creating transaction without catalog fields"
                );
                None
            }
        }
    }

    /// Record a pending transaction for a freshly opened checkout session.
    pub async fn create_transaction(
        &self,
        draft: NewTransaction,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        draft.validate()?;

        let product = self.lookup_product_lenient(&draft.product_id).await;

        if let (Some(requested), Some(catalog)) = (
            draft.access_period_days,
            product.as_ref().and_then(Product::subscription_duration_days),
        ) {
            if requested != catalog {
                tracing::warn!(
                    product_id = %draft.product_id,
                    requested_days = requested,
                    catalog_days = catalog,
                    "Access period differs from product duration"
                );
            }
        }

        let transaction = draft.into_transaction(product.as_ref(), &self.defaults, now);
        self.transactions.insert_transaction(&transaction).await?;

        tracing::info!(
            transaction_id = %transaction.id,
            user_id = %transaction.user_id,
            product_id = %transaction.product_id,
            session_id = %transaction.stripe_session_id,
            amount = transaction.amount,
            currency = %transaction.currency,
            "Created pending transaction"
        );

        Ok(transaction)
    }

    /// Persist `transaction`, deriving a missing access end date first.
    pub async fn save(&self, transaction: &mut Transaction, now: DateTime<Utc>) -> Result<()> {
        transaction.fill_access_window();
        transaction.updated_at = now;
        self.transactions.save_transaction(transaction).await
    }

    pub async fn get_transaction(&self, id: &str) -> Result<Transaction> {
        self.transactions
            .find_transaction_by_id(id)
            .await?
            .ok_or_else(|| EntitlementError::not_found("transaction", id))
    }

    /// Apply the gateway's verdict for `session_id`. A `paid` verdict moves
    /// the transaction to paid and grants a subscription for subscription
    /// products. Re-delivered confirmations are idempotent, and also repair a
    /// grant that was lost between the two writes.
    pub async fn confirm_payment(
        &self,
        session_id: &str,
        confirmation: PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome> {
        confirmation.validate()?;

        let mut transaction = self
            .transactions
            .find_transaction_by_session_id(session_id)
            .await?
            .ok_or_else(|| EntitlementError::not_found("transaction", session_id))?;

        if !confirmation.is_paid() {
            tracing::info!(
                transaction_id = %transaction.id,
                session_id = %session_id,
                payment_status = %confirmation.payment_status,
                "Payment not completed, transaction left unchanged"
            );
            return Ok(PaymentOutcome {
                transaction,
                subscription: None,
            });
        }

        let mut confirmed_at = now;
        if transaction.status == TransactionStatus::Pending {
            transaction.mark_paid(now)?;
            if let Some(email) = confirmation.customer_email {
                transaction.customer_email = email;
            }
            if let Some(amount) = confirmation.amount_total {
                transaction.amount = amount;
            }
            if let Some(currency) = confirmation.currency.filter(|c| !c.is_empty()) {
                transaction.currency = currency.to_uppercase();
            }
            transaction.updated_at = now;

            if self
                .transactions
                .save_transaction_if_status(&transaction, TransactionStatus::Pending)
                .await?
            {
                tracing::info!(
                    transaction_id = %transaction.id,
                    user_id = %transaction.user_id,
                    access_start_date = ?transaction.access_start_date,
                    access_end_date = ?transaction.access_end_date,
                    "Transaction marked paid"
                );
            } else {
                // A concurrent writer settled the record first
                transaction = self.get_transaction(&transaction.id).await?;
                tracing::info!(
                    transaction_id = %transaction.id,
                    status = %transaction.status,
                    "Transaction settled concurrently"
                );
                confirmed_at = Self::already_confirmed_at(&transaction, now)?;
            }
        } else {
            tracing::info!(
                transaction_id = %transaction.id,
                session_id = %session_id,
                status = %transaction.status,
                "Payment already confirmed"
            );
            confirmed_at = Self::already_confirmed_at(&transaction, now)?;
        }

        let subscription = self
            .subscriptions
            .grant_for_transaction(&transaction, confirmed_at)
            .await?;

        Ok(PaymentOutcome {
            transaction,
            subscription,
        })
    }

    /// Confirmation instant of a record some earlier call already moved past
    /// pending, so that a repaired grant starts with its access window.
    fn already_confirmed_at(
        transaction: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        match transaction.status {
            TransactionStatus::Paid | TransactionStatus::Expired => {
                Ok(transaction.access_start_date.unwrap_or(now))
            }
            status => Err(EntitlementError::InvalidTransition {
                from: status,
                to: TransactionStatus::Paid,
            }),
        }
    }

    pub async fn fail_transaction(&self, id: &str, now: DateTime<Utc>) -> Result<Transaction> {
        self.finish_pending(id, TransactionStatus::Failed, now).await
    }

    pub async fn cancel_transaction(&self, id: &str, now: DateTime<Utc>) -> Result<Transaction> {
        self.finish_pending(id, TransactionStatus::Canceled, now).await
    }

    async fn finish_pending(
        &self,
        id: &str,
        status: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let mut transaction = self.get_transaction(id).await?;
        let expected = transaction.status;
        transaction.transition_to(status, now)?;

        if !self
            .transactions
            .save_transaction_if_status(&transaction, expected)
            .await?
        {
            let current = self.get_transaction(id).await?;
            return Err(EntitlementError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        tracing::info!(
            transaction_id = %transaction.id,
            status = %status,
            "Transaction closed"
        );
        Ok(transaction)
    }
}
