#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use entitlement_service::clock::FixedClock;
use entitlement_service::models::{NewTransaction, PlanTier, Product, TransactionDefaults};
use entitlement_service::services::InMemoryStore;
use entitlement_service::AppState;
use rust_decimal::Decimal;
use std::sync::Arc;

pub const TEST_USER_ID: &str = "test-user";
pub const MONTHLY_PRODUCT_ID: &str = "prod_signals_monthly";
pub const WEEKLY_PRODUCT_ID: &str = "prod_signals_weekly";
pub const PHYSICAL_PRODUCT_ID: &str = "prod_trading_journal";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

pub fn days(n: i64) -> Duration {
    Duration::days(n)
}

pub fn catalog() -> Vec<Product> {
    vec![
        Product::subscription(
            MONTHLY_PRODUCT_ID,
            "Signals Monthly",
            Decimal::new(4900, 2),
            "USD",
            Some(30),
            PlanTier::Premium,
        ),
        Product::subscription(
            WEEKLY_PRODUCT_ID,
            "Signals Weekly",
            Decimal::new(1500, 2),
            "USD",
            Some(7),
            PlanTier::Basic,
        ),
        Product::physical(
            PHYSICAL_PRODUCT_ID,
            "Trading Journal",
            Decimal::new(2500, 2),
            "USD",
        ),
    ]
}

pub fn draft(session_id: &str, product_id: &str) -> NewTransaction {
    NewTransaction {
        user_id: TEST_USER_ID.to_string(),
        customer_email: Some("trader@example.com".to_string()),
        stripe_session_id: session_id.to_string(),
        product_id: product_id.to_string(),
        amount: 4900,
        ..Default::default()
    }
}

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub state: AppState,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let store = Arc::new(InMemoryStore::with_products(catalog()).await);
        let clock = Arc::new(FixedClock::new(t0()));
        let state = AppState::from_store(
            store.clone(),
            clock.clone(),
            TransactionDefaults {
                currency: "USD".to_string(),
                access_period_days: 30,
            },
        );
        Self {
            store,
            clock,
            state,
        }
    }
}
