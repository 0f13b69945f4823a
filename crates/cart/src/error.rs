//! Cart error types.

use common::Version;
use thiserror::Error;

use crate::state::{CartOwner, OwnerMode};
use crate::value_objects::{MAX_LINE_QUANTITY, MAX_UNIT_PRICE_CENTS};

/// Errors that can occur when reading or mutating a cart.
#[derive(Debug, Error)]
pub enum CartError {
    /// The backing store cannot be reached right now. No cart data was changed.
    #[error("Cart store unavailable: {0}")]
    StoreUnavailable(String),

    /// A compare-and-set write lost against a concurrent writer.
    #[error("Concurrency conflict for cart {owner}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        owner: CartOwner,
        expected: Version,
        actual: Version,
    },

    /// The owner does not belong to the mode this store serves.
    #[error("A {store} cart store cannot hold a {owner} cart")]
    OwnerModeMismatch { store: OwnerMode, owner: OwnerMode },

    /// Price hints must lie between zero and the per-line ceiling.
    #[error("Invalid price: {price} cents (must be between 0 and {max})", max = MAX_UNIT_PRICE_CENTS)]
    InvalidPrice { price: i64 },

    /// The resulting line quantity exceeds the per-line ceiling.
    #[error("Invalid quantity: {quantity} (at most {max} per line)", max = MAX_LINE_QUANTITY)]
    InvalidQuantity { quantity: i64 },

    /// The product is not in the cart.
    #[error("Item not found: {product_id}")]
    ItemNotFound { product_id: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Stored cart state could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CartError {
    /// Returns true if retrying the same call later may succeed.
    ///
    /// Callers decide whether to retry or fall back to ephemeral semantics.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CartError::StoreUnavailable(_)
                | CartError::ConcurrencyConflict { .. }
                | CartError::Database(_)
        )
    }
}

/// Result type for cart operations.
pub type Result<T> = std::result::Result<T, CartError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_and_conflict_are_recoverable() {
        assert!(CartError::StoreUnavailable("down".into()).is_recoverable());
        assert!(
            CartError::ConcurrencyConflict {
                owner: CartOwner::Device("d".into()),
                expected: Version::new(1),
                actual: Version::new(2),
            }
            .is_recoverable()
        );
        assert!(!CartError::InvalidPrice { price: -1 }.is_recoverable());
        assert!(!CartError::InvalidQuantity { quantity: 10_000 }.is_recoverable());
    }
}
