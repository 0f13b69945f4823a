//! External collaborator traits and in-memory implementations for checkout.

pub mod address;
pub mod gateway;
pub mod materializer;
pub mod pricing;

pub use address::{AddressBook, AddressError, DeliveryAddress, InMemoryAddressBook};
pub use gateway::{
    AuthorizationHandle, AuthorizationMetadata, ClientResult, GatewayError,
    InMemoryPaymentGateway, PaymentGateway, PaymentMethodToken, Settlement, SettlementResult,
};
pub use materializer::{
    InMemoryOrderMaterializer, MaterializerError, Order, OrderId, OrderMaterializer, OrderStatus,
};
pub use pricing::{InMemoryPriceCatalog, PriceSnapshot, PricingError};
