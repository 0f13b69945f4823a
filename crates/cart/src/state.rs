//! Cart state and its mutation rules.

use chrono::{DateTime, Utc};
use common::{CustomerId, DeviceId, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commands::{AddItem, CartMutation};
use crate::error::{CartError, Result};
use crate::value_objects::{
    CartLineItem, MAX_LINE_QUANTITY, MAX_UNIT_PRICE_CENTS, Money, ProductId,
};

/// Number of merge tokens a durable cart remembers.
const MAX_MERGE_TOKENS: usize = 16;

/// Whether a cart belongs to an anonymous device or an authenticated account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerMode {
    /// Device-local cart of a visitor who has not logged in.
    Anonymous,

    /// Server-side cart keyed by account identity.
    Authenticated,
}

impl OwnerMode {
    /// Returns the mode name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerMode::Anonymous => "anonymous",
            OwnerMode::Authenticated => "authenticated",
        }
    }
}

impl std::fmt::Display for OwnerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The key a cart is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CartOwner {
    /// Anonymous visitor, scoped to one device or browser.
    Device(DeviceId),

    /// Authenticated customer account.
    Customer(CustomerId),
}

impl CartOwner {
    /// Returns the mode this owner implies.
    pub fn mode(&self) -> OwnerMode {
        match self {
            CartOwner::Device(_) => OwnerMode::Anonymous,
            CartOwner::Customer(_) => OwnerMode::Authenticated,
        }
    }

    /// Returns the customer ID for authenticated owners.
    pub fn customer_id(&self) -> Option<CustomerId> {
        match self {
            CartOwner::Customer(id) => Some(*id),
            CartOwner::Device(_) => None,
        }
    }

    /// Returns the string key used by persistent backings.
    pub fn storage_key(&self) -> String {
        match self {
            CartOwner::Device(id) => format!("device:{id}"),
            CartOwner::Customer(id) => format!("customer:{id}"),
        }
    }
}

impl std::fmt::Display for CartOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

/// Identifies one ephemeral cart at one version.
///
/// A durable cart records the token of every ephemeral cart merged into it,
/// so a merge that is retried after a partial failure is recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeToken {
    /// Identity of the source cart.
    pub cart_id: Uuid,

    /// Version of the source cart that was merged.
    pub version: Version,
}

/// The contents of one cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartState {
    /// Stable identity, generated when the cart is first created.
    cart_id: Uuid,

    /// Who the cart belongs to.
    owner: CartOwner,

    /// Line items in insertion order, at most one per product.
    items: Vec<CartLineItem>,

    /// Bumped by the store on every accepted write.
    version: Version,

    /// When the cart was last written.
    last_mutated_at: DateTime<Utc>,

    /// Ephemeral carts already folded into this one.
    #[serde(default)]
    merged_from: Vec<MergeToken>,
}

impl CartState {
    /// Creates an empty, never-written cart for an owner.
    pub fn empty(owner: CartOwner) -> Self {
        Self {
            cart_id: Uuid::new_v4(),
            owner,
            items: Vec::new(),
            version: Version::initial(),
            last_mutated_at: Utc::now(),
            merged_from: Vec::new(),
        }
    }

    /// Returns the cart identity.
    pub fn cart_id(&self) -> Uuid {
        self.cart_id
    }

    /// Returns the owner.
    pub fn owner(&self) -> &CartOwner {
        &self.owner
    }

    /// Returns the owner mode.
    pub fn owner_mode(&self) -> OwnerMode {
        self.owner.mode()
    }

    /// Returns the line items in insertion order.
    pub fn items(&self) -> &[CartLineItem] {
        &self.items
    }

    /// Returns the line for a product, if present.
    pub fn get(&self, product_id: &ProductId) -> Option<&CartLineItem> {
        self.items.iter().find(|line| &line.product_id == product_id)
    }

    /// Returns the current version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns when the cart was last written.
    pub fn last_mutated_at(&self) -> DateTime<Utc> {
        self.last_mutated_at
    }

    /// Returns true if the cart has no lines.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of distinct lines.
    pub fn line_count(&self) -> usize {
        self.items.len()
    }

    /// Returns the sum of all quantities, as shown on an item-count badge.
    pub fn item_count(&self) -> u32 {
        self.items
            .iter()
            .fold(0u32, |acc, line| acc.saturating_add(line.quantity))
    }

    /// Returns Σ unit_price × quantity, computed from the current lines.
    pub fn total(&self) -> Money {
        self.items.iter().map(CartLineItem::line_total).sum()
    }

    /// Returns the token identifying this cart at its current version.
    pub fn merge_token(&self) -> MergeToken {
        MergeToken {
            cart_id: self.cart_id,
            version: self.version,
        }
    }

    /// Returns true if the given source cart has already been merged here.
    pub fn has_merged(&self, token: &MergeToken) -> bool {
        self.merged_from.contains(token)
    }

    /// Returns a copy with the same identity and no lines.
    pub fn emptied(&self) -> CartState {
        CartState {
            items: Vec::new(),
            ..self.clone()
        }
    }

    /// Applies a mutation to the lines.
    ///
    /// Returns whether the contents changed. Version and timestamp are left
    /// to the store, which stamps them when the write is accepted.
    pub fn apply(&mut self, mutation: &CartMutation) -> Result<bool> {
        match mutation {
            CartMutation::Add(item) => self.add(item),
            CartMutation::Remove { product_id } => Ok(self.remove(product_id)),
            CartMutation::SetQuantity {
                product_id,
                quantity,
            } => self.set_quantity(product_id, *quantity),
            CartMutation::Clear => {
                let changed = !self.items.is_empty();
                self.items.clear();
                Ok(changed)
            }
            CartMutation::Subtract { lines } => Ok(self.subtract(lines)),
        }
    }

    /// Folds another cart's lines into this one.
    ///
    /// Overlapping products have their quantities summed, capped at
    /// [`MAX_LINE_QUANTITY`]; the incoming line's price, name and image win
    /// because they come from the most recent add.
    /// Returns the number of source lines merged.
    pub fn merge_from(&mut self, source: &CartState) -> usize {
        for incoming in &source.items {
            match self.position(&incoming.product_id) {
                Some(index) => {
                    let line = &mut self.items[index];
                    line.quantity = line
                        .quantity
                        .saturating_add(incoming.quantity)
                        .min(MAX_LINE_QUANTITY);
                    line.unit_price = incoming.unit_price;
                    line.display_name = incoming.display_name.clone();
                    if incoming.image_ref.is_some() {
                        line.image_ref = incoming.image_ref.clone();
                    }
                }
                None => self.items.push(incoming.clone()),
            }
        }

        self.merged_from.push(source.merge_token());
        if self.merged_from.len() > MAX_MERGE_TOKENS {
            let excess = self.merged_from.len() - MAX_MERGE_TOKENS;
            self.merged_from.drain(..excess);
        }

        source.items.len()
    }

    /// Records an accepted write.
    pub(crate) fn stamp(&mut self, version: Version) {
        self.version = version;
        self.last_mutated_at = Utc::now();
    }

    fn position(&self, product_id: &ProductId) -> Option<usize> {
        self.items
            .iter()
            .position(|line| &line.product_id == product_id)
    }

    fn add(&mut self, item: &AddItem) -> Result<bool> {
        if item.price_hint.is_negative() || item.price_hint.cents() > MAX_UNIT_PRICE_CENTS {
            return Err(CartError::InvalidPrice {
                price: item.price_hint.cents(),
            });
        }

        if item.quantity == 0 {
            return Ok(false);
        }

        match self.position(&item.product_id) {
            Some(index) => {
                let resulting =
                    i64::from(self.items[index].quantity).saturating_add(item.quantity);
                if resulting <= 0 {
                    self.items.remove(index);
                    return Ok(true);
                }
                let quantity = bounded_quantity(resulting)?;
                let line = &mut self.items[index];
                line.quantity = quantity;
                line.unit_price = item.price_hint;
                line.display_name = item.display_name.clone();
                if item.image_ref.is_some() {
                    line.image_ref = item.image_ref.clone();
                }
                Ok(true)
            }
            None if item.quantity < 0 => Ok(false),
            None => {
                let quantity = bounded_quantity(item.quantity)?;
                self.items.push(CartLineItem {
                    product_id: item.product_id.clone(),
                    unit_price: item.price_hint,
                    quantity,
                    display_name: item.display_name.clone(),
                    image_ref: item.image_ref.clone(),
                });
                Ok(true)
            }
        }
    }

    fn remove(&mut self, product_id: &ProductId) -> bool {
        match self.position(product_id) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    fn set_quantity(&mut self, product_id: &ProductId, quantity: i64) -> Result<bool> {
        if quantity <= 0 {
            return Ok(self.remove(product_id));
        }

        let index = self
            .position(product_id)
            .ok_or_else(|| CartError::ItemNotFound {
                product_id: product_id.to_string(),
            })?;

        let quantity = bounded_quantity(quantity)?;
        let line = &mut self.items[index];
        if line.quantity == quantity {
            return Ok(false);
        }
        line.quantity = quantity;
        Ok(true)
    }

    /// Takes the given quantities off matching lines, dropping lines that
    /// reach zero. Products no longer in the cart are skipped.
    fn subtract(&mut self, lines: &[(ProductId, u32)]) -> bool {
        let mut changed = false;
        for (product_id, quantity) in lines {
            let Some(index) = self.position(product_id) else {
                continue;
            };
            let line = &mut self.items[index];
            if line.quantity <= *quantity {
                self.items.remove(index);
            } else {
                line.quantity -= quantity;
            }
            changed = true;
        }
        changed
    }
}

/// Accepts a positive quantity no larger than [`MAX_LINE_QUANTITY`].
fn bounded_quantity(quantity: i64) -> Result<u32> {
    u32::try_from(quantity)
        .ok()
        .filter(|q| *q <= MAX_LINE_QUANTITY)
        .ok_or(CartError::InvalidQuantity { quantity })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_cart() -> CartState {
        CartState::empty(CartOwner::Device(DeviceId::new("browser-1")))
    }

    fn add(state: &mut CartState, sku: &str, qty: i64, cents: i64) {
        state
            .apply(&CartMutation::Add(AddItem::new(sku, qty, Money::from_cents(cents))))
            .unwrap();
    }

    #[test]
    fn test_empty_cart() {
        let cart = device_cart();
        assert!(cart.is_empty());
        assert_eq!(cart.total(), Money::zero());
        assert_eq!(cart.owner_mode(), OwnerMode::Anonymous);
        assert_eq!(cart.version(), Version::initial());
    }

    #[test]
    fn test_add_to_empty_cart() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 2, 1000);

        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.total(), Money::from_cents(2000));
    }

    #[test]
    fn test_repeated_add_sums_quantities() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 2, 1000);
        add(&mut cart, "sku1", 5, 1000);

        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.get(&"sku1".into()).unwrap().quantity, 7);
    }

    #[test]
    fn test_add_rehints_price() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 1, 1000);
        add(&mut cart, "sku1", 1, 1200);

        let line = cart.get(&"sku1".into()).unwrap();
        assert_eq!(line.unit_price, Money::from_cents(1200));
        assert_eq!(cart.total(), Money::from_cents(2400));
    }

    #[test]
    fn test_negative_add_to_zero_removes_line() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 2, 1000);
        add(&mut cart, "sku1", -2, 1000);

        assert!(cart.is_empty());
    }

    #[test]
    fn test_negative_add_below_zero_removes_line() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 2, 1000);
        add(&mut cart, "sku1", -9, 1000);

        assert!(cart.get(&"sku1".into()).is_none());
    }

    #[test]
    fn test_negative_add_of_absent_product_is_noop() {
        let mut cart = device_cart();
        let changed = cart
            .apply(&CartMutation::Add(AddItem::new("sku1", -1, Money::from_cents(100))))
            .unwrap();
        assert!(!changed);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_negative_price_rejected() {
        let mut cart = device_cart();
        let result = cart.apply(&CartMutation::Add(AddItem::new(
            "sku1",
            1,
            Money::from_cents(-1),
        )));
        assert!(matches!(result, Err(CartError::InvalidPrice { price: -1 })));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_price_above_ceiling_rejected() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 1, 100);
        let result = cart.apply(&CartMutation::Add(AddItem::new(
            "sku1",
            1,
            Money::from_cents(i64::MAX),
        )));
        assert!(matches!(result, Err(CartError::InvalidPrice { price: i64::MAX })));
        assert_eq!(cart.get(&"sku1".into()).unwrap().unit_price, Money::from_cents(100));
    }

    #[test]
    fn test_quantity_above_ceiling_rejected() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", i64::from(MAX_LINE_QUANTITY), MAX_UNIT_PRICE_CENTS);

        let result = cart.apply(&CartMutation::Add(AddItem::new(
            "sku1",
            1,
            Money::from_cents(MAX_UNIT_PRICE_CENTS),
        )));
        assert!(matches!(result, Err(CartError::InvalidQuantity { quantity: 10_000 })));

        let result = cart.apply(&CartMutation::Add(AddItem::new(
            "sku2",
            i64::MAX,
            Money::from_cents(100),
        )));
        assert!(matches!(result, Err(CartError::InvalidQuantity { .. })));

        let result = cart.apply(&CartMutation::set_quantity("sku1", i64::from(u32::MAX)));
        assert!(matches!(result, Err(CartError::InvalidQuantity { .. })));

        assert_eq!(cart.line_count(), 1);
        assert_eq!(
            cart.total(),
            Money::from_cents(MAX_UNIT_PRICE_CENTS * i64::from(MAX_LINE_QUANTITY))
        );
    }

    #[test]
    fn test_merge_caps_summed_quantity() {
        let mut durable = CartState::empty(CartOwner::Customer(CustomerId::new()));
        add(&mut durable, "A", i64::from(MAX_LINE_QUANTITY) - 1, 500);

        let mut ephemeral = device_cart();
        add(&mut ephemeral, "A", 5, 500);

        durable.merge_from(&ephemeral);
        assert_eq!(durable.get(&"A".into()).unwrap().quantity, MAX_LINE_QUANTITY);
    }

    #[test]
    fn test_subtract_keeps_other_lines() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 3, 1000);
        add(&mut cart, "sku2", 1, 500);
        add(&mut cart, "sku3", 4, 250);

        let changed = cart
            .apply(&CartMutation::Subtract {
                lines: vec![("sku1".into(), 3), ("sku3".into(), 1), ("gone".into(), 2)],
            })
            .unwrap();

        assert!(changed);
        assert!(cart.get(&"sku1".into()).is_none());
        assert_eq!(cart.get(&"sku2".into()).unwrap().quantity, 1);
        assert_eq!(cart.get(&"sku3".into()).unwrap().quantity, 3);
    }

    #[test]
    fn test_subtract_of_absent_lines_is_noop() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 1, 100);
        let changed = cart
            .apply(&CartMutation::Subtract {
                lines: vec![("other".into(), 1)],
            })
            .unwrap();
        assert!(!changed);
        assert_eq!(cart.line_count(), 1);
    }

    #[test]
    fn test_set_quantity_zero_removes() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 2, 1000);
        cart.apply(&CartMutation::set_quantity("sku1", 0)).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_set_quantity_absent_product_fails() {
        let mut cart = device_cart();
        let result = cart.apply(&CartMutation::set_quantity("sku1", 3));
        assert!(matches!(result, Err(CartError::ItemNotFound { .. })));
    }

    #[test]
    fn test_set_quantity_same_value_reports_no_change() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 2, 1000);
        assert!(!cart.apply(&CartMutation::set_quantity("sku1", 2)).unwrap());
        assert!(cart.apply(&CartMutation::set_quantity("sku1", 4)).unwrap());
        assert_eq!(cart.total(), Money::from_cents(4000));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut cart = device_cart();
        assert!(!cart.apply(&CartMutation::remove("missing")).unwrap());
    }

    #[test]
    fn test_items_keep_insertion_order() {
        let mut cart = device_cart();
        add(&mut cart, "b", 1, 100);
        add(&mut cart, "a", 1, 100);
        add(&mut cart, "b", 1, 100);

        let order: Vec<&str> = cart.items().iter().map(|l| l.product_id.as_str()).collect();
        assert_eq!(order, ["b", "a"]);
    }

    #[test]
    fn test_total_matches_sum_after_mixed_mutations() {
        let mut cart = device_cart();
        let mutations = [
            CartMutation::Add(AddItem::new("a", 3, Money::from_cents(250))),
            CartMutation::Add(AddItem::new("b", 1, Money::from_cents(1999))),
            CartMutation::set_quantity("a", 5),
            CartMutation::Add(AddItem::new("c", 2, Money::from_cents(10))),
            CartMutation::remove("b"),
            CartMutation::Add(AddItem::new("c", -1, Money::from_cents(12))),
        ];

        for mutation in &mutations {
            cart.apply(mutation).unwrap();
            let expected: i64 = cart
                .items()
                .iter()
                .map(|l| l.unit_price.cents() * i64::from(l.quantity))
                .sum();
            assert_eq!(cart.total().cents(), expected);
        }
        assert_eq!(cart.total(), Money::from_cents(5 * 250 + 12));
    }

    #[test]
    fn test_merge_sums_overlapping_products() {
        let mut durable = CartState::empty(CartOwner::Customer(CustomerId::new()));
        add(&mut durable, "A", 3, 500);
        add(&mut durable, "B", 1, 700);

        let mut ephemeral = device_cart();
        add(&mut ephemeral, "A", 2, 450);

        let merged = durable.merge_from(&ephemeral);

        assert_eq!(merged, 1);
        assert_eq!(durable.get(&"A".into()).unwrap().quantity, 5);
        assert_eq!(durable.get(&"A".into()).unwrap().unit_price, Money::from_cents(450));
        assert_eq!(durable.get(&"B".into()).unwrap().quantity, 1);
        assert!(durable.has_merged(&ephemeral.merge_token()));
    }

    #[test]
    fn test_merge_tokens_are_bounded() {
        let mut durable = CartState::empty(CartOwner::Customer(CustomerId::new()));
        for _ in 0..(MAX_MERGE_TOKENS + 4) {
            durable.merge_from(&device_cart());
        }
        assert_eq!(durable.merged_from.len(), MAX_MERGE_TOKENS);
    }

    #[test]
    fn test_emptied_keeps_identity() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 1, 100);
        let empty = cart.emptied();
        assert!(empty.is_empty());
        assert_eq!(empty.cart_id(), cart.cart_id());
    }

    #[test]
    fn test_serialization() {
        let mut cart = device_cart();
        add(&mut cart, "sku1", 2, 1000);
        let json = serde_json::to_string(&cart).unwrap();
        let deserialized: CartState = serde_json::from_str(&json).unwrap();
        assert_eq!(cart, deserialized);
    }
}
