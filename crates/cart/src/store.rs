use std::sync::Arc;

use async_trait::async_trait;
use common::Version;

use crate::{
    AddItem, CartError, CartMutation, CartOwner, CartState, Money, OwnerMode, ProductId, Result,
    value_objects::CartLineItem,
};

/// Reachability of a cart store's backing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreHealth {
    /// Reads and writes are expected to succeed.
    Available,

    /// The backing cannot be reached; carries a human-readable reason.
    Unavailable(String),
}

impl StoreHealth {
    /// Returns true if the store is available.
    pub fn is_available(&self) -> bool {
        matches!(self, StoreHealth::Available)
    }
}

/// Core trait for cart store implementations.
///
/// A store serves exactly one [`OwnerMode`]. Every write for a single owner is
/// applied atomically and in arrival order; two concurrent adds for the same
/// product both land. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the owner mode this store serves.
    fn mode(&self) -> OwnerMode;

    /// Reports whether the backing is currently reachable.
    async fn health(&self) -> StoreHealth;

    /// Loads the cart for an owner.
    ///
    /// Returns an empty cart at the initial version if the owner has none.
    async fn load(&self, owner: &CartOwner) -> Result<CartState>;

    /// Applies one mutation atomically and returns the resulting cart.
    ///
    /// Observers are notified only when the contents changed.
    async fn mutate(&self, owner: &CartOwner, mutation: CartMutation) -> Result<CartState>;

    /// Replaces the whole cart if it is still at `expected`.
    ///
    /// Fails with `ConcurrencyConflict` otherwise. The stored cart ends up at
    /// `expected.next()`.
    async fn replace(
        &self,
        owner: &CartOwner,
        expected: Version,
        state: CartState,
    ) -> Result<CartState>;
}

#[async_trait]
impl<T: CartStore + ?Sized> CartStore for Arc<T> {
    fn mode(&self) -> OwnerMode {
        (**self).mode()
    }

    async fn health(&self) -> StoreHealth {
        (**self).health().await
    }

    async fn load(&self, owner: &CartOwner) -> Result<CartState> {
        (**self).load(owner).await
    }

    async fn mutate(&self, owner: &CartOwner, mutation: CartMutation) -> Result<CartState> {
        (**self).mutate(owner, mutation).await
    }

    async fn replace(
        &self,
        owner: &CartOwner,
        expected: Version,
        state: CartState,
    ) -> Result<CartState> {
        (**self).replace(owner, expected, state).await
    }
}

/// Extension trait providing the cart operations callers usually want.
#[async_trait]
pub trait CartStoreExt: CartStore {
    /// Adds a quantity delta of a product.
    async fn add(&self, owner: &CartOwner, item: AddItem) -> Result<CartState> {
        self.mutate(owner, CartMutation::Add(item)).await
    }

    /// Removes a product line.
    async fn remove(&self, owner: &CartOwner, product_id: ProductId) -> Result<CartState> {
        self.mutate(owner, CartMutation::Remove { product_id }).await
    }

    /// Sets an absolute quantity for a product already in the cart.
    async fn set_quantity(
        &self,
        owner: &CartOwner,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<CartState> {
        self.mutate(
            owner,
            CartMutation::SetQuantity {
                product_id,
                quantity,
            },
        )
        .await
    }

    /// Empties the cart.
    async fn clear(&self, owner: &CartOwner) -> Result<CartState> {
        self.mutate(owner, CartMutation::Clear).await
    }

    /// Takes the quantities of the given lines off the cart, leaving anything
    /// added since those lines were read.
    async fn subtract(&self, owner: &CartOwner, lines: &[CartLineItem]) -> Result<CartState> {
        let lines = lines
            .iter()
            .map(|line| (line.product_id.clone(), line.quantity))
            .collect();
        self.mutate(owner, CartMutation::Subtract { lines }).await
    }

    /// Returns the current line items.
    async fn list(&self, owner: &CartOwner) -> Result<Vec<CartLineItem>> {
        Ok(self.load(owner).await?.items().to_vec())
    }

    /// Returns the current total.
    async fn total(&self, owner: &CartOwner) -> Result<Money> {
        Ok(self.load(owner).await?.total())
    }
}

impl<T: CartStore + ?Sized> CartStoreExt for T {}

/// Rejects owners that do not belong to a store's mode.
pub(crate) fn check_owner_mode(store: OwnerMode, owner: &CartOwner) -> Result<()> {
    if owner.mode() != store {
        return Err(CartError::OwnerModeMismatch {
            store,
            owner: owner.mode(),
        });
    }
    Ok(())
}

/// Rejects replacement states that belong to a different owner.
pub(crate) fn check_replacement(owner: &CartOwner, state: &CartState) -> Result<()> {
    if state.owner() != owner {
        return Err(CartError::OwnerModeMismatch {
            store: owner.mode(),
            owner: state.owner_mode(),
        });
    }
    Ok(())
}
