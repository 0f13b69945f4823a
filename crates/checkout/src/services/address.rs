//! Address book trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::CustomerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where an order is shipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

impl DeliveryAddress {
    /// Creates a single-line address.
    pub fn new(
        recipient: impl Into<String>,
        line1: impl Into<String>,
        city: impl Into<String>,
        postal_code: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            line1: line1.into(),
            line2: None,
            city: city.into(),
            postal_code: postal_code.into(),
            country: country.into(),
        }
    }
}

/// Errors returned by the address book.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The address service could not be reached.
    #[error("address book unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a customer's default delivery address.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Returns the default address, or `None` if the customer has not set one.
    async fn default_address(
        &self,
        customer_id: CustomerId,
    ) -> Result<Option<DeliveryAddress>, AddressError>;
}

#[derive(Debug, Default)]
struct AddressBookState {
    defaults: HashMap<CustomerId, DeliveryAddress>,
    unavailable: bool,
}

/// In-memory address book.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAddressBook {
    state: Arc<RwLock<AddressBookState>>,
}

impl InMemoryAddressBook {
    /// Creates an empty address book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a customer's default address.
    pub fn set_default_address(&self, customer_id: CustomerId, address: DeliveryAddress) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .defaults
            .insert(customer_id, address);
    }

    /// Marks the address book reachable or unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unavailable = unavailable;
    }
}

#[async_trait]
impl AddressBook for InMemoryAddressBook {
    async fn default_address(
        &self,
        customer_id: CustomerId,
    ) -> Result<Option<DeliveryAddress>, AddressError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.unavailable {
            return Err(AddressError::Unavailable("address book offline".to_string()));
        }
        Ok(state.defaults.get(&customer_id).cloned())
    }
}
