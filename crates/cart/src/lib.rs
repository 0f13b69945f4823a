//! Cart layer for the storefront.
//!
//! This crate provides:
//! - [`CartState`] and its pure mutation rules (additive adds, implicit removes)
//! - the [`CartStore`] trait with an ephemeral per-device implementation and
//!   durable per-account implementations (in-memory and PostgreSQL)
//! - [`CartPublisher`] for notifying observers such as item-count badges
//! - [`CartMerger`], which folds an anonymous cart into a customer's cart at login

pub mod commands;
pub mod error;
pub mod memory;
pub mod merge;
pub mod observer;
pub mod postgres;
pub mod state;
pub mod store;
pub mod value_objects;

pub use commands::{AddItem, CartMutation};
pub use error::{CartError, Result};
pub use memory::{EphemeralCartStore, InMemoryDurableCartStore};
pub use merge::{CartMerger, MergeOutcome, MergeStatus};
pub use observer::{CartChanged, CartObserver, CartPublisher, ItemCountBadge};
pub use postgres::PostgresCartStore;
pub use state::{CartOwner, CartState, MergeToken, OwnerMode};
pub use store::{CartStore, CartStoreExt, StoreHealth};
pub use value_objects::{
    CartLineItem, MAX_LINE_QUANTITY, MAX_UNIT_PRICE_CENTS, Money, ProductId,
};
