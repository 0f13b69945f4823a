//! Identifiers shared by the cart, checkout and API crates.

pub mod types;

pub use types::{CustomerId, DeviceId, SessionId, Version};
