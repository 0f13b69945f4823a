//! Immutable, re-priced copy of a cart taken at checkout start.

use std::collections::HashMap;

use cart::{CartLineItem, CartState, Money, ProductId};
use chrono::{DateTime, Utc};
use common::Version;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};

/// The contents a checkout session charges for.
///
/// Later changes to the live cart never touch a snapshot, so the amount
/// authorized and settled is always the amount computed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    items: Vec<CartLineItem>,
    cart_version: Version,
    taken_at: DateTime<Utc>,
}

impl CartSnapshot {
    /// Copies the cart, replacing every price hint with the authoritative price.
    ///
    /// Fails with `ProductUnavailable` for the first product without a price.
    pub fn capture(cart: &CartState, prices: &HashMap<ProductId, Money>) -> Result<Self> {
        let items = cart
            .items()
            .iter()
            .map(|line| {
                let price = prices.get(&line.product_id).copied().ok_or_else(|| {
                    CheckoutError::ProductUnavailable {
                        product_id: line.product_id.to_string(),
                    }
                })?;
                Ok(CartLineItem {
                    unit_price: price,
                    ..line.clone()
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            items,
            cart_version: cart.version(),
            taken_at: Utc::now(),
        })
    }

    /// Returns the snapshot lines.
    pub fn items(&self) -> &[CartLineItem] {
        &self.items
    }

    /// Returns the version of the cart the snapshot was taken from.
    pub fn cart_version(&self) -> Version {
        self.cart_version
    }

    /// Returns when the snapshot was taken.
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Returns Σ unit_price × quantity.
    pub fn total(&self) -> Money {
        self.items.iter().map(CartLineItem::line_total).sum()
    }

    /// Returns the sum of quantities.
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|line| line.quantity).sum()
    }

    /// Returns true if both snapshots charge for the same lines at the same prices.
    pub fn same_contents(&self, other: &CartSnapshot) -> bool {
        self.priced_lines() == other.priced_lines()
    }

    fn priced_lines(&self) -> Vec<(&ProductId, u32, Money)> {
        let mut lines: Vec<_> = self
            .items
            .iter()
            .map(|line| (&line.product_id, line.quantity, line.unit_price))
            .collect();
        lines.sort();
        lines
    }
}
