use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static ACCESS_CHECKS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static TRANSACTIONS_EXPIRED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static SUBSCRIPTIONS_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Install the Prometheus recorder and register the entitlement counters.
/// Recording helpers are no-ops until this has run.
pub fn init_metrics() {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }

    let registry = Registry::new();

    let access_checks = IntCounterVec::new(
        Opts::new(
            "entitlement_access_checks_total",
            "Access checks by outcome (granted, denied, lapsed)",
        ),
        &["result"],
    )
    .expect("Failed to create entitlement_access_checks_total metric");

    let expired = IntCounterVec::new(
        Opts::new(
            "entitlement_transactions_expired_total",
            "Transactions moved to expired, by path (lazy, sweep)",
        ),
        &["path"],
    )
    .expect("Failed to create entitlement_transactions_expired_total metric");

    let subscriptions = IntCounterVec::new(
        Opts::new(
            "entitlement_subscriptions_created_total",
            "Subscriptions granted from paid transactions, by product",
        ),
        &["product_id"],
    )
    .expect("Failed to create entitlement_subscriptions_created_total metric");

    registry
        .register(Box::new(access_checks.clone()))
        .expect("Failed to register entitlement_access_checks_total");
    registry
        .register(Box::new(expired.clone()))
        .expect("Failed to register entitlement_transactions_expired_total");
    registry
        .register(Box::new(subscriptions.clone()))
        .expect("Failed to register entitlement_subscriptions_created_total");

    PROMETHEUS_REGISTRY
        .set(registry)
        .expect("Failed to set prometheus registry");
    ACCESS_CHECKS_TOTAL
        .set(access_checks)
        .expect("Failed to set entitlement_access_checks_total");
    TRANSACTIONS_EXPIRED_TOTAL
        .set(expired)
        .expect("Failed to set entitlement_transactions_expired_total");
    SUBSCRIPTIONS_CREATED_TOTAL
        .set(subscriptions)
        .expect("Failed to set entitlement_subscriptions_created_total");
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

pub fn record_access_check(result: &str) {
    if let Some(counter) = ACCESS_CHECKS_TOTAL.get() {
        counter.with_label_values(&[result]).inc();
    }
}

pub fn record_expired(path: &str, count: u64) {
    if let Some(counter) = TRANSACTIONS_EXPIRED_TOTAL.get() {
        counter.with_label_values(&[path]).inc_by(count);
    }
}

pub fn record_subscription_created(product_id: &str) {
    if let Some(counter) = SUBSCRIPTIONS_CREATED_TOTAL.get() {
        counter.with_label_values(&[product_id]).inc();
    }
}
