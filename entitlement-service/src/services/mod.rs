pub mod entitlement;
pub mod memory;
pub mod metrics;
pub mod mongo;
pub mod repository;
pub mod subscriptions;
pub mod sweeper;
pub mod transactions;

pub use entitlement::{
    evaluate_access, remaining_days, AccessDecision, AccessSummary, EntitlementEvaluator,
};
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use mongo::MongoStore;
pub use repository::{ProductRepository, SubscriptionRepository, TransactionRepository};
pub use subscriptions::SubscriptionLifecycle;
pub use sweeper::{run_sweep_once, spawn_expiry_sweeper};
pub use transactions::{PaymentConfirmation, PaymentOutcome, TransactionLifecycle};
