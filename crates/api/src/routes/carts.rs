//! Cart route handlers.
//!
//! Carts are addressed as `/carts/{mode}/{owner}` where `mode` is `device`
//! (anonymous, owner is an opaque device ID) or `customer` (authenticated,
//! owner is the customer UUID).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use cart::{
    AddItem, CartLineItem, CartOwner, CartState, CartStore, CartStoreExt, MergeStatus, Money,
    ProductId,
};
use common::{CustomerId, DeviceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: i64,
    pub price_hint_cents: i64,
    pub display_name: Option<String>,
    pub image_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub device_id: String,
    pub customer_id: Uuid,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct LineItemResponse {
    pub product_id: String,
    pub display_name: String,
    pub image_ref: Option<String>,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

impl From<&CartLineItem> for LineItemResponse {
    fn from(line: &CartLineItem) -> Self {
        Self {
            product_id: line.product_id.to_string(),
            display_name: line.display_name.clone(),
            image_ref: line.image_ref.clone(),
            quantity: line.quantity,
            unit_price_cents: line.unit_price.cents(),
            line_total_cents: line.line_total().cents(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub owner: String,
    pub mode: &'static str,
    pub version: i64,
    pub items: Vec<LineItemResponse>,
    pub item_count: u32,
    pub total_cents: i64,
    pub total: String,
}

impl From<&CartState> for CartResponse {
    fn from(cart: &CartState) -> Self {
        let total = cart.total();
        Self {
            owner: cart.owner().to_string(),
            mode: cart.owner_mode().as_str(),
            version: cart.version().as_i64(),
            items: cart.items().iter().map(LineItemResponse::from).collect(),
            item_count: cart.item_count(),
            total_cents: total.cents(),
            total: total.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BadgeResponse {
    pub owner: String,
    pub item_count: u32,
}

#[derive(Debug, Serialize)]
pub struct MergeResponse {
    pub status: &'static str,
    pub merged_lines: usize,
    pub cart: CartResponse,
}

// -- Helpers --

/// Parses the `{mode}/{owner}` path pair.
fn parse_owner(mode: &str, owner: &str) -> Result<CartOwner, ApiError> {
    match mode {
        "device" if !owner.trim().is_empty() => Ok(CartOwner::Device(DeviceId::new(owner))),
        "device" => Err(ApiError::BadRequest("device ID must not be empty".to_string())),
        "customer" => Uuid::parse_str(owner)
            .map(|id| CartOwner::Customer(CustomerId::from_uuid(id)))
            .map_err(|_| ApiError::BadRequest(format!("invalid customer ID: {owner}"))),
        other => Err(ApiError::BadRequest(format!(
            "unknown cart mode '{other}', expected 'device' or 'customer'"
        ))),
    }
}

/// Picks the store serving the owner's mode.
fn store_for<'a>(state: &'a AppState, owner: &CartOwner) -> &'a dyn CartStore {
    match owner {
        CartOwner::Device(_) => &state.ephemeral,
        CartOwner::Customer(_) => state.durable.as_ref(),
    }
}

// -- Handlers --

/// GET /carts/{mode}/{owner}: returns the cart, empty if none exists.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((mode, owner)): Path<(String, String)>,
) -> Result<Json<CartResponse>, ApiError> {
    let owner = parse_owner(&mode, &owner)?;
    let cart = store_for(&state, &owner).load(&owner).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// POST /carts/{mode}/{owner}/items: adds a quantity delta of a product.
///
/// A non-positive resulting quantity removes the line.
#[tracing::instrument(skip(state))]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    Path((mode, owner)): Path<(String, String)>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let owner = parse_owner(&mode, &owner)?;
    if req.product_id.trim().is_empty() {
        return Err(ApiError::BadRequest("product_id must not be empty".to_string()));
    }

    let mut item = AddItem::new(
        req.product_id,
        req.quantity,
        Money::from_cents(req.price_hint_cents),
    );
    if let Some(name) = req.display_name {
        item = item.named(name);
    }
    if let Some(image) = req.image_ref {
        item = item.with_image(image);
    }

    let cart = store_for(&state, &owner).add(&owner, item).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// PUT /carts/{mode}/{owner}/items/{product_id}: sets an absolute quantity.
#[tracing::instrument(skip(state))]
pub async fn set_quantity(
    State(state): State<Arc<AppState>>,
    Path((mode, owner, product_id)): Path<(String, String, String)>,
    Json(req): Json<SetQuantityRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let owner = parse_owner(&mode, &owner)?;
    let cart = store_for(&state, &owner)
        .set_quantity(&owner, ProductId::new(product_id), req.quantity)
        .await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// DELETE /carts/{mode}/{owner}/items/{product_id}: removes a line.
#[tracing::instrument(skip(state))]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path((mode, owner, product_id)): Path<(String, String, String)>,
) -> Result<Json<CartResponse>, ApiError> {
    let owner = parse_owner(&mode, &owner)?;
    let cart = store_for(&state, &owner)
        .remove(&owner, ProductId::new(product_id))
        .await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// DELETE /carts/{mode}/{owner}: empties the cart.
#[tracing::instrument(skip(state))]
pub async fn clear(
    State(state): State<Arc<AppState>>,
    Path((mode, owner)): Path<(String, String)>,
) -> Result<Json<CartResponse>, ApiError> {
    let owner = parse_owner(&mode, &owner)?;
    let cart = store_for(&state, &owner).clear(&owner).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// GET /carts/{mode}/{owner}/badge: item count as last observed by the badge.
#[tracing::instrument(skip(state))]
pub async fn badge(
    State(state): State<Arc<AppState>>,
    Path((mode, owner)): Path<(String, String)>,
) -> Result<Json<BadgeResponse>, ApiError> {
    let owner = parse_owner(&mode, &owner)?;
    let item_count = state.badge.count(&owner).await;
    Ok(Json(BadgeResponse {
        owner: owner.to_string(),
        item_count,
    }))
}

/// POST /carts/merge: folds a device cart into a customer's cart at login.
#[tracing::instrument(skip(state))]
pub async fn merge(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MergeRequest>,
) -> Result<Json<MergeResponse>, ApiError> {
    if req.device_id.trim().is_empty() {
        return Err(ApiError::BadRequest("device_id must not be empty".to_string()));
    }

    let device = DeviceId::new(req.device_id);
    let outcome = state
        .merger
        .merge(&device, CustomerId::from_uuid(req.customer_id))
        .await?;

    let (status, merged_lines) = match outcome.status {
        MergeStatus::NothingToMerge => ("nothing_to_merge", 0),
        MergeStatus::Merged { lines } => ("merged", lines),
        MergeStatus::AlreadyApplied => ("already_applied", 0),
    };

    Ok(Json(MergeResponse {
        status,
        merged_lines,
        cart: CartResponse::from(&outcome.cart),
    }))
}
