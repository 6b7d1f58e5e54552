//! MongoDB-backed repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, DateTime as BsonDateTime},
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument},
    Client as MongoClient, Collection, Database, IndexModel,
};
use secrecy::{ExposeSecret, Secret};

use super::repository::{ProductRepository, SubscriptionRepository, TransactionRepository};
use crate::error::{EntitlementError, Result};
use crate::models::{Product, Subscription, Transaction, TransactionStatus};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &Secret<String>, database: &str) -> Result<Self> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to MongoDB: {}", e);
                EntitlementError::from(e)
            })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { db })
    }

    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn products(&self) -> Collection<Product> {
        self.db.collection("products")
    }

    fn transactions(&self) -> Collection<Transaction> {
        self.db.collection("transactions")
    }

    fn subscriptions(&self) -> Collection<Subscription> {
        self.db.collection("subscriptions")
    }

    pub async fn initialize_indexes(&self) -> Result<()> {
        tracing::info!("Creating MongoDB indexes for entitlement-service");

        // One transaction per checkout session
        let session_index = IndexModel::builder()
            .keys(doc! { "stripe_session_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("stripe_session_id_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        // Backs the expiry sweep filter
        let expiry_index = IndexModel::builder()
            .keys(doc! { "status": 1, "access_end_date": 1 })
            .options(
                IndexOptions::builder()
                    .name("status_access_end_idx".to_string())
                    .build(),
            )
            .build();

        let user_index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "access_end_date": -1 })
            .options(
                IndexOptions::builder()
                    .name("user_access_end_idx".to_string())
                    .build(),
            )
            .build();

        self.transactions()
            .create_indexes([session_index, expiry_index, user_index], None)
            .await?;

        // A transaction grants at most one subscription
        let transaction_ref_index = IndexModel::builder()
            .keys(doc! { "transaction_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("transaction_id_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        let subscription_user_index = IndexModel::builder()
            .keys(doc! { "user_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("subscription_user_idx".to_string())
                    .build(),
            )
            .build();

        self.subscriptions()
            .create_indexes([transaction_ref_index, subscription_user_index], None)
            .await?;

        tracing::info!("Entitlement service indexes initialized");
        Ok(())
    }

    /// Catalog seeding. Products are otherwise never written by this service.
    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        self.products()
            .replace_one(
                doc! { "_id": &product.id },
                product,
                mongodb::options::ReplaceOptions::builder()
                    .upsert(true)
                    .build(),
            )
            .await?;
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl ProductRepository for MongoStore {
    async fn find_product_by_id(&self, id: &str) -> Result<Option<Product>> {
        Ok(self.products().find_one(doc! { "_id": id }, None).await?)
    }
}

#[async_trait]
impl TransactionRepository for MongoStore {
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        match self.transactions().insert_one(transaction, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(EntitlementError::Conflict(format!(
                "transaction already exists for session {}",
                transaction.stripe_session_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_transaction(&self, transaction: &Transaction) -> Result<()> {
        let result = self
            .transactions()
            .replace_one(doc! { "_id": &transaction.id }, transaction, None)
            .await?;
        if result.matched_count == 0 {
            return Err(EntitlementError::not_found("transaction", &transaction.id));
        }
        Ok(())
    }

    async fn find_transaction_by_id(&self, id: &str) -> Result<Option<Transaction>> {
        Ok(self.transactions().find_one(doc! { "_id": id }, None).await?)
    }

    async fn find_transaction_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<Transaction>> {
        Ok(self
            .transactions()
            .find_one(doc! { "stripe_session_id": session_id }, None)
            .await?)
    }

    async fn find_transactions_for_user(
        &self,
        user_id: &str,
        status: Option<TransactionStatus>,
    ) -> Result<Vec<Transaction>> {
        let mut filter = doc! { "user_id": user_id };
        if let Some(status) = status {
            filter.insert("status", to_bson(&status)?);
        }

        let options = FindOptions::builder()
            .sort(doc! { "access_end_date": -1, "created_at": -1 })
            .build();

        let cursor = self.transactions().find(filter, Some(options)).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn save_transaction_if_status(
        &self,
        transaction: &Transaction,
        expected: TransactionStatus,
    ) -> Result<bool> {
        let result = self
            .transactions()
            .replace_one(
                doc! { "_id": &transaction.id, "status": to_bson(&expected)? },
                transaction,
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn expire_lapsed_transaction(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>> {
        let now = BsonDateTime::from_chrono(now);
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .transactions()
            .find_one_and_update(
                doc! {
                    "_id": id,
                    "status": to_bson(&TransactionStatus::Paid)?,
                    "access_end_date": { "$lt": now }
                },
                doc! {
                    "$set": {
                        "status": to_bson(&TransactionStatus::Expired)?,
                        "updated_at": now
                    }
                },
                options,
            )
            .await?;
        Ok(updated)
    }

    async fn expire_overdue_transactions(&self, now: DateTime<Utc>) -> Result<u64> {
        let now = BsonDateTime::from_chrono(now);
        let result = self
            .transactions()
            .update_many(
                doc! {
                    "status": to_bson(&TransactionStatus::Paid)?,
                    "access_end_date": { "$lt": now }
                },
                doc! {
                    "$set": {
                        "status": to_bson(&TransactionStatus::Expired)?,
                        "updated_at": now
                    }
                },
                None,
            )
            .await?;
        Ok(result.modified_count)
    }
}

#[async_trait]
impl SubscriptionRepository for MongoStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        match self.subscriptions().insert_one(subscription, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(EntitlementError::Conflict(format!(
                "subscription already exists for transaction {}",
                subscription.transaction_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_subscription_by_id(&self, id: &str) -> Result<Option<Subscription>> {
        Ok(self.subscriptions().find_one(doc! { "_id": id }, None).await?)
    }

    async fn find_subscription_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .subscriptions()
            .find_one(doc! { "transaction_id": transaction_id }, None)
            .await?)
    }

    async fn find_subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        let options = FindOptions::builder()
            .sort(doc! { "start_date": -1 })
            .build();
        let cursor = self
            .subscriptions()
            .find(doc! { "user_id": user_id }, Some(options))
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTransaction, TransactionDefaults};
    use chrono::Duration;

    async fn store() -> MongoStore {
        let uri = std::env::var("TEST_MONGODB_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let db_name = format!("entitlement_test_{}", uuid::Uuid::new_v4());
        let store = MongoStore::connect(&Secret::new(uri), &db_name)
            .await
            .expect("Failed to connect to MongoDB");
        store.initialize_indexes().await.expect("indexes");
        store
    }

    fn paid_transaction(session: &str, end: DateTime<Utc>) -> Transaction {
        let mut tx = NewTransaction {
            user_id: "user_mongo".to_string(),
            stripe_session_id: session.to_string(),
            product_id: "prod".to_string(),
            amount: 500,
            ..Default::default()
        }
        .into_transaction(None, &TransactionDefaults::default(), end - Duration::days(30));
        tx.status = TransactionStatus::Paid;
        tx.access_start_date = Some(end - Duration::days(30));
        tx.access_end_date = Some(end);
        tx
    }

    #[tokio::test]
    #[ignore] // Requires running MongoDB
    async fn sweep_expires_overdue_and_is_idempotent() {
        let store = store().await;
        let now = Utc::now();

        store
            .insert_transaction(&paid_transaction("cs_old", now - Duration::seconds(1)))
            .await
            .unwrap();
        store
            .insert_transaction(&paid_transaction("cs_new", now + Duration::days(1)))
            .await
            .unwrap();

        assert_eq!(store.expire_overdue_transactions(now).await.unwrap(), 1);
        assert_eq!(store.expire_overdue_transactions(now).await.unwrap(), 0);

        store.database().drop(None).await.ok();
    }

    #[tokio::test]
    #[ignore] // Requires running MongoDB
    async fn lazy_expiry_only_matches_overdue_paid_records() {
        let store = store().await;
        let now = Utc::now();
        let tx = paid_transaction("cs_lazy", now - Duration::seconds(1));
        store.insert_transaction(&tx).await.unwrap();

        let expired = store
            .expire_lapsed_transaction(&tx.id, now)
            .await
            .unwrap()
            .expect("overdue record matches");
        assert_eq!(expired.status, TransactionStatus::Expired);

        assert!(store
            .expire_lapsed_transaction(&tx.id, now + Duration::days(1))
            .await
            .unwrap()
            .is_none());

        store.database().drop(None).await.ok();
    }

    #[tokio::test]
    #[ignore] // Requires running MongoDB
    async fn duplicate_session_is_a_conflict() {
        let store = store().await;
        let now = Utc::now();
        let tx = paid_transaction("cs_dup", now);
        store.insert_transaction(&tx).await.unwrap();

        let mut again = paid_transaction("cs_dup", now);
        again.id = uuid::Uuid::new_v4().to_string();
        let err = store.insert_transaction(&again).await.unwrap_err();
        assert!(matches!(err, EntitlementError::Conflict(_)));

        store.database().drop(None).await.ok();
    }
}
