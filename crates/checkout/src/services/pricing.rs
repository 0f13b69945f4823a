//! Price snapshot trait and in-memory catalog.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use cart::{Money, ProductId};
use thiserror::Error;

/// Errors returned by the price service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PricingError {
    /// The price service could not be reached.
    #[error("price service unavailable: {0}")]
    Unavailable(String),
}

/// Source of authoritative current unit prices.
#[async_trait]
pub trait PriceSnapshot: Send + Sync {
    /// Returns the current price of every known product in `product_ids`.
    ///
    /// Products that are no longer sold are absent from the result.
    async fn current_prices(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Money>, PricingError>;
}

#[derive(Debug, Default)]
struct CatalogState {
    prices: HashMap<ProductId, Money>,
    unavailable: bool,
}

/// In-memory price catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryPriceCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the given prices.
    pub fn with_prices<I, P>(prices: I) -> Self
    where
        I: IntoIterator<Item = (P, Money)>,
        P: Into<ProductId>,
    {
        let catalog = Self::new();
        for (product_id, price) in prices {
            catalog.set_price(product_id, price);
        }
        catalog
    }

    /// Sets the current price of a product.
    pub fn set_price(&self, product_id: impl Into<ProductId>, price: Money) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .prices
            .insert(product_id.into(), price);
    }

    /// Stops selling a product.
    pub fn remove_product(&self, product_id: &ProductId) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .prices
            .remove(product_id);
    }

    /// Marks the price service reachable or unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unavailable = unavailable;
    }
}

#[async_trait]
impl PriceSnapshot for InMemoryPriceCatalog {
    async fn current_prices(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Money>, PricingError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.unavailable {
            return Err(PricingError::Unavailable("catalog offline".to_string()));
        }

        Ok(product_ids
            .iter()
            .filter_map(|id| state.prices.get(id).map(|price| (id.clone(), *price)))
            .collect())
    }
}
