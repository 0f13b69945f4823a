//! Cart mutations.

use serde::{Deserialize, Serialize};

use crate::value_objects::{Money, ProductId};

/// Adds a quantity delta of a product to the cart.
///
/// The delta may be negative; a resulting quantity of zero or less removes the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    /// The product being added.
    pub product_id: ProductId,

    /// Quantity delta.
    pub quantity: i64,

    /// Client-side price at add time. Re-validated before any charge.
    pub price_hint: Money,

    /// Display name shown in the cart.
    pub display_name: String,

    /// Image shown in the cart.
    pub image_ref: Option<String>,
}

impl AddItem {
    /// Creates a new AddItem command.
    pub fn new(product_id: impl Into<ProductId>, quantity: i64, price_hint: Money) -> Self {
        let product_id = product_id.into();
        Self {
            display_name: product_id.to_string(),
            product_id,
            quantity,
            price_hint,
            image_ref: None,
        }
    }

    /// Sets the display name.
    pub fn named(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Sets the image reference.
    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }
}

/// A single change applied atomically to one cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CartMutation {
    /// Additive quantity change.
    Add(AddItem),

    /// Removes a product line. Removing an absent product is a no-op.
    Remove { product_id: ProductId },

    /// Sets an absolute quantity. Zero or less removes the line.
    SetQuantity { product_id: ProductId, quantity: i64 },

    /// Empties the cart.
    Clear,

    /// Takes quantities off existing lines. A line reaching zero is removed;
    /// products not in the cart are skipped.
    Subtract { lines: Vec<(ProductId, u32)> },
}

impl CartMutation {
    /// Creates a Remove mutation.
    pub fn remove(product_id: impl Into<ProductId>) -> Self {
        CartMutation::Remove {
            product_id: product_id.into(),
        }
    }

    /// Creates a SetQuantity mutation.
    pub fn set_quantity(product_id: impl Into<ProductId>, quantity: i64) -> Self {
        CartMutation::SetQuantity {
            product_id: product_id.into(),
            quantity,
        }
    }

    /// Returns the mutation name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CartMutation::Add(_) => "add",
            CartMutation::Remove { .. } => "remove",
            CartMutation::SetQuantity { .. } => "set_quantity",
            CartMutation::Clear => "clear",
            CartMutation::Subtract { .. } => "subtract",
        }
    }
}

impl From<AddItem> for CartMutation {
    fn from(item: AddItem) -> Self {
        CartMutation::Add(item)
    }
}
