//! Checkout orchestration for the storefront.
//!
//! A checkout session walks through these steps:
//! 1. Snapshot and re-price the customer's durable cart
//! 2. Request a payment authorization for exactly the snapshot total
//! 3. Confirm the payment on the client, then settle it on the server
//! 4. Materialize the order and take the purchased lines out of the cart
//!
//! Every transition is recorded as a [`CheckoutEvent`]; a [`CheckoutSession`]
//! is rebuilt by replaying them. Sessions whose payment outcome cannot be
//! resolved automatically are flagged for manual reconciliation.

pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod retry;
pub mod services;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod store;

pub use config::CheckoutConfig;
pub use error::{CheckoutError, ErrorClass, Result};
pub use events::CheckoutEvent;
pub use orchestrator::{BeginCheckout, CheckoutOrchestrator, CheckoutOutcome};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use services::{
    AddressBook, AddressError, AuthorizationHandle, AuthorizationMetadata, ClientResult,
    DeliveryAddress, GatewayError, InMemoryAddressBook, InMemoryOrderMaterializer,
    InMemoryPaymentGateway, InMemoryPriceCatalog, MaterializerError, Order, OrderId,
    OrderMaterializer, PaymentGateway, PaymentMethodToken, PriceSnapshot, PricingError,
    Settlement, SettlementResult,
};
pub use session::CheckoutSession;
pub use snapshot::CartSnapshot;
pub use state::CheckoutState;
pub use store::{InMemorySessionStore, RecordedEvent, SessionStore, SessionStoreError, SessionStoreExt};
