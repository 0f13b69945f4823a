//! Order materializer trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cart::{CartLineItem, Money};
use chrono::{DateTime, Utc};
use common::SessionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::address::DeliveryAddress;
use super::gateway::Settlement;
use crate::snapshot::CartSnapshot;

/// Identifier of a materialized order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Creates a new random order ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a materialized order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Paid and recorded; handed to fulfilment.
    Placed,
}

/// A durable order record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub session_id: SessionId,
    pub line_items: Vec<CartLineItem>,
    pub total_amount: Money,
    pub delivery_address: DeliveryAddress,
    pub settlement_reference: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Errors returned by the order materializer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MaterializerError {
    /// The order service could not be reached.
    #[error("order service unavailable: {0}")]
    Unavailable(String),

    /// The call timed out; the order may or may not exist.
    #[error("order service timed out")]
    Timeout,

    /// The order service refused the order.
    #[error("order rejected: {0}")]
    Rejected(String),
}

impl MaterializerError {
    /// Returns true if repeating the call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MaterializerError::Unavailable(_) | MaterializerError::Timeout
        )
    }
}

/// Trait for turning a settled checkout into an order.
#[async_trait]
pub trait OrderMaterializer: Send + Sync {
    /// Creates the order for a checkout session.
    ///
    /// `idempotency_key` is the session ID: a repeated call returns the order
    /// created by the first one instead of creating another.
    async fn create_order(
        &self,
        idempotency_key: SessionId,
        snapshot: &CartSnapshot,
        settlement: &Settlement,
        address: &DeliveryAddress,
    ) -> Result<OrderId, MaterializerError>;
}

#[derive(Debug, Default)]
struct MaterializerState {
    orders: HashMap<OrderId, Order>,
    by_session: HashMap<SessionId, OrderId>,
    fail_next: u32,
    lose_acks: u32,
    calls: u32,
}

/// In-memory order materializer for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderMaterializer {
    state: Arc<Mutex<MaterializerState>>,
}

impl InMemoryOrderMaterializer {
    /// Creates a new in-memory materializer.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MaterializerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `count` calls fail before writing anything.
    pub fn fail_next_calls(&self, count: u32) {
        self.state().fail_next = count;
    }

    /// Makes the next `count` calls write the order but report a timeout.
    pub fn lose_next_acknowledgements(&self, count: u32) {
        self.state().lose_acks = count;
    }

    /// Returns the number of orders created.
    pub fn order_count(&self) -> usize {
        self.state().orders.len()
    }

    /// Returns the number of `create_order` calls.
    pub fn call_count(&self) -> u32 {
        self.state().calls
    }

    /// Returns an order by ID.
    pub fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.state().orders.get(&order_id).cloned()
    }

    /// Returns the order created for a session, if any.
    pub fn order_for_session(&self, session_id: SessionId) -> Option<Order> {
        let state = self.state();
        state
            .by_session
            .get(&session_id)
            .and_then(|id| state.orders.get(id))
            .cloned()
    }
}

#[async_trait]
impl OrderMaterializer for InMemoryOrderMaterializer {
    async fn create_order(
        &self,
        idempotency_key: SessionId,
        snapshot: &CartSnapshot,
        settlement: &Settlement,
        address: &DeliveryAddress,
    ) -> Result<OrderId, MaterializerError> {
        let mut state = self.state();
        state.calls += 1;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(MaterializerError::Unavailable(
                "order database unreachable".to_string(),
            ));
        }

        if let Some(existing) = state.by_session.get(&idempotency_key) {
            return Ok(*existing);
        }

        let order = Order {
            order_id: OrderId::new(),
            session_id: idempotency_key,
            line_items: snapshot.items().to_vec(),
            total_amount: snapshot.total(),
            delivery_address: address.clone(),
            settlement_reference: settlement.reference.clone(),
            status: OrderStatus::Placed,
            created_at: Utc::now(),
        };
        let order_id = order.order_id;
        state.by_session.insert(idempotency_key, order_id);
        state.orders.insert(order_id, order);

        if state.lose_acks > 0 {
            state.lose_acks -= 1;
            return Err(MaterializerError::Timeout);
        }

        Ok(order_id)
    }
}
