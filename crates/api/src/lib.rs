//! HTTP API server for storefront carts and checkout.
//!
//! Provides REST endpoints for anonymous and customer carts, login-time cart
//! merging, and checkout sessions, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use cart::{
    CartMerger, CartObserver, CartPublisher, CartStore, EphemeralCartStore,
    InMemoryDurableCartStore, ItemCountBadge, Money, PostgresCartStore,
};
use checkout::{
    CheckoutConfig, CheckoutOrchestrator, InMemoryAddressBook, InMemoryOrderMaterializer,
    InMemoryPaymentGateway, InMemoryPriceCatalog, InMemorySessionStore,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Durable cart store shared by cart routes, the merger, and checkout.
pub type DurableCarts = Arc<dyn CartStore>;

/// Checkout orchestrator wired to the in-process adapters.
pub type Checkout = CheckoutOrchestrator<
    DurableCarts,
    InMemoryPriceCatalog,
    InMemoryPaymentGateway,
    InMemoryOrderMaterializer,
    InMemoryAddressBook,
    InMemorySessionStore,
>;

/// Shared application state passed to all route handlers.
pub struct AppState {
    pub ephemeral: EphemeralCartStore,
    pub durable: DurableCarts,
    pub merger: CartMerger<EphemeralCartStore, DurableCarts>,
    pub badge: Arc<ItemCountBadge>,
    pub catalog: InMemoryPriceCatalog,
    pub addresses: InMemoryAddressBook,
    pub checkout: Checkout,
}

impl AppState {
    /// Wires the stores, the merger, and the checkout orchestrator together.
    ///
    /// Both cart stores must notify `publisher`; the item-count badge is
    /// registered on it here.
    pub async fn new(
        ephemeral: EphemeralCartStore,
        durable: DurableCarts,
        publisher: &CartPublisher,
        catalog: InMemoryPriceCatalog,
        config: CheckoutConfig,
    ) -> Self {
        let badge = Arc::new(ItemCountBadge::new());
        publisher
            .register(badge.clone() as Arc<dyn CartObserver>)
            .await;

        let addresses = InMemoryAddressBook::new();
        let checkout = CheckoutOrchestrator::with_config(
            durable.clone(),
            catalog.clone(),
            InMemoryPaymentGateway::new(),
            InMemoryOrderMaterializer::new(),
            addresses.clone(),
            InMemorySessionStore::new(),
            config,
        );

        Self {
            merger: CartMerger::new(ephemeral.clone(), durable.clone()),
            ephemeral,
            durable,
            badge,
            catalog,
            addresses,
            checkout,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/carts/{mode}/{owner}",
            get(routes::carts::get).delete(routes::carts::clear),
        )
        .route("/carts/{mode}/{owner}/items", post(routes::carts::add_item))
        .route(
            "/carts/{mode}/{owner}/items/{product_id}",
            put(routes::carts::set_quantity).delete(routes::carts::remove_item),
        )
        .route("/carts/{mode}/{owner}/badge", get(routes::carts::badge))
        .route("/carts/merge", post(routes::carts::merge))
        .route(
            "/customers/{customer_id}/address",
            put(routes::checkout::set_address),
        )
        .route("/checkout", post(routes::checkout::begin))
        .route(
            "/checkout/reconciliation",
            get(routes::checkout::pending_reconciliation),
        )
        .route("/checkout/{session_id}", get(routes::checkout::get))
        .route("/checkout/{session_id}/confirm", post(routes::checkout::confirm))
        .route(
            "/checkout/{session_id}/finalize",
            post(routes::checkout::finalize),
        )
        .route("/checkout/{session_id}/cancel", post(routes::checkout::cancel))
        .route(
            "/checkout/{session_id}/reconcile",
            post(routes::checkout::reconcile),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Products available when running without an external catalog.
pub fn demo_catalog() -> InMemoryPriceCatalog {
    InMemoryPriceCatalog::with_prices([
        ("sku-tee", Money::from_cents(1_999)),
        ("sku-mug", Money::from_cents(1_250)),
        ("sku-cap", Money::from_cents(2_400)),
        ("sku-sticker", Money::from_cents(250)),
    ])
}

/// Creates application state backed entirely by in-memory stores.
pub async fn create_in_memory_state(config: CheckoutConfig) -> Arc<AppState> {
    let publisher = CartPublisher::new();
    let ephemeral = EphemeralCartStore::with_publisher(publisher.clone());
    let durable: DurableCarts = Arc::new(InMemoryDurableCartStore::with_publisher(publisher.clone()));
    Arc::new(AppState::new(ephemeral, durable, &publisher, demo_catalog(), config).await)
}

/// Creates application state from configuration.
///
/// Durable carts live in PostgreSQL when `DATABASE_URL` is set, with pending
/// migrations applied on startup; otherwise they are kept in memory.
pub async fn create_default_state(config: &Config) -> cart::Result<Arc<AppState>> {
    let Some(url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, customer carts are kept in memory");
        return Ok(create_in_memory_state(config.checkout.clone()).await);
    };

    let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
    let publisher = CartPublisher::new();
    let store = PostgresCartStore::with_publisher(pool, publisher.clone());
    store.run_migrations().await?;
    tracing::info!("customer carts stored in postgres");

    let durable: DurableCarts = Arc::new(store);
    let ephemeral = EphemeralCartStore::with_publisher(publisher.clone());
    Ok(Arc::new(
        AppState::new(
            ephemeral,
            durable,
            &publisher,
            demo_catalog(),
            config.checkout.clone(),
        )
        .await,
    ))
}
