//! Application startup and lifecycle management.

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::clock::{Clock, SystemClock};
use crate::config::EntitlementConfig;
use crate::handlers;
use crate::models::TransactionDefaults;
use crate::services::{
    spawn_expiry_sweeper, EntitlementEvaluator, MongoStore, ProductRepository,
    SubscriptionLifecycle, SubscriptionRepository, TransactionLifecycle, TransactionRepository,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub clock: Arc<dyn Clock>,
    pub evaluator: EntitlementEvaluator,
    pub transactions: TransactionLifecycle,
    pub subscriptions: SubscriptionLifecycle,
}

impl AppState {
    /// Wire the lifecycle services over a single store implementing every
    /// repository.
    pub fn from_store<S>(store: Arc<S>, clock: Arc<dyn Clock>, defaults: TransactionDefaults) -> Self
    where
        S: ProductRepository + TransactionRepository + SubscriptionRepository + 'static,
    {
        let products: Arc<dyn ProductRepository> = store.clone();
        let transactions: Arc<dyn TransactionRepository> = store.clone();
        let subscriptions_repo: Arc<dyn SubscriptionRepository> = store;

        let subscriptions = SubscriptionLifecycle::new(products.clone(), subscriptions_repo);
        Self {
            clock,
            evaluator: EntitlementEvaluator::new(transactions.clone()),
            transactions: TransactionLifecycle::new(
                products,
                transactions,
                subscriptions.clone(),
                defaults,
            ),
            subscriptions,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/users/:user_id/access", get(handlers::access::get_user_access))
        .route(
            "/transactions",
            post(handlers::transactions::create_transaction),
        )
        .route(
            "/transactions/confirm",
            post(handlers::transactions::confirm_payment),
        )
        .route(
            "/transactions/:id",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/transactions/:id/cancel",
            post(handlers::transactions::cancel_transaction),
        )
        .route("/admin/sweep", post(handlers::admin::run_sweep))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    store: MongoStore,
    sweep_interval: Option<std::time::Duration>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: EntitlementConfig) -> Result<Self, AppError> {
        let store = MongoStore::connect(&config.mongodb.uri, &config.mongodb.database).await?;
        store.initialize_indexes().await?;

        let state = AppState::from_store(
            Arc::new(store.clone()),
            Arc::new(SystemClock),
            config.billing.transaction_defaults(),
        );

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            state,
            store,
            sweep_interval: config.sweeper.interval(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn store(&self) -> &MongoStore {
        &self.store
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        let sweeper = match self.sweep_interval {
            Some(interval) => Some(spawn_expiry_sweeper(
                self.state.evaluator.clone(),
                self.state.clock.clone(),
                interval,
                self.shutdown.clone(),
            )),
            None => {
                tracing::warn!("Expiry sweeper disabled; relying on lazy expiry only");
                None
            }
        };

        tracing::info!("Listening on {}", self.listener.local_addr()?);

        let shutdown = self.shutdown.clone();
        let router = build_router(self.state);
        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.shutdown.cancel();
        if let Some(handle) = sweeper {
            handle.await.ok();
        }

        result.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            AppError::from(e)
        })
    }
}
