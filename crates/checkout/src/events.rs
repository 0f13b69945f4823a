//! Checkout session events.

use cart::Money;
use chrono::{DateTime, Utc};
use common::{CustomerId, SessionId};
use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;
use crate::services::{AuthorizationHandle, DeliveryAddress, OrderId, Settlement};
use crate::snapshot::CartSnapshot;

/// Events recorded over the life of a checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CheckoutEvent {
    /// The session was created from a cart snapshot.
    SessionStarted(SessionStartedData),

    /// The gateway granted a payment hold.
    AuthorizationCreated(AuthorizationCreatedData),

    /// The client-side payment step finished (possibly with an unknown outcome).
    ClientConfirmed(ClientConfirmedData),

    /// The gateway captured the funds.
    SettlementConfirmed(SettlementConfirmedData),

    /// The order was materialized.
    OrderCommitted(OrderCommittedData),

    /// The customer's durable cart was emptied after commit.
    CartCleared(CartClearedData),

    /// The session needs manual reconciliation.
    ReconciliationEscalated(FailureData),

    /// The session failed.
    SessionFailed(FailureData),

    /// The session was cancelled before payment confirmation.
    SessionAbandoned(SessionAbandonedData),
}

impl CheckoutEvent {
    /// Returns the event type name as stored alongside the payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            CheckoutEvent::SessionStarted(_) => "SessionStarted",
            CheckoutEvent::AuthorizationCreated(_) => "AuthorizationCreated",
            CheckoutEvent::ClientConfirmed(_) => "ClientConfirmed",
            CheckoutEvent::SettlementConfirmed(_) => "SettlementConfirmed",
            CheckoutEvent::OrderCommitted(_) => "OrderCommitted",
            CheckoutEvent::CartCleared(_) => "CartCleared",
            CheckoutEvent::ReconciliationEscalated(_) => "ReconciliationEscalated",
            CheckoutEvent::SessionFailed(_) => "SessionFailed",
            CheckoutEvent::SessionAbandoned(_) => "SessionAbandoned",
        }
    }
}

/// Data for SessionStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartedData {
    pub session_id: SessionId,
    pub customer_id: CustomerId,
    pub snapshot: CartSnapshot,
    /// Always equal to the snapshot total.
    pub amount_due: Money,
    pub currency: String,
    pub delivery_address: DeliveryAddress,
    pub started_at: DateTime<Utc>,
}

/// Data for AuthorizationCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCreatedData {
    pub handle: AuthorizationHandle,
    pub authorized_at: DateTime<Utc>,
}

/// Data for ClientConfirmed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfirmedData {
    /// True if the client could not tell whether the payment went through.
    pub ambiguous: bool,
    pub confirmed_at: DateTime<Utc>,
}

/// Data for SettlementConfirmed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfirmedData {
    pub settlement: Settlement,
}

/// Data for OrderCommitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCommittedData {
    pub order_id: OrderId,
    pub committed_at: DateTime<Utc>,
}

/// Data for CartCleared event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartClearedData {
    pub cleared_at: DateTime<Utc>,
}

/// Data for ReconciliationEscalated and SessionFailed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureData {
    pub class: ErrorClass,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Data for SessionAbandoned event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAbandonedData {
    pub reason: String,
    /// False if the gateway refused to release the hold.
    pub voided: bool,
    pub abandoned_at: DateTime<Utc>,
}

// Convenience constructors
impl CheckoutEvent {
    /// Creates a SessionStarted event.
    pub fn session_started(
        session_id: SessionId,
        customer_id: CustomerId,
        snapshot: CartSnapshot,
        currency: impl Into<String>,
        delivery_address: DeliveryAddress,
    ) -> Self {
        CheckoutEvent::SessionStarted(SessionStartedData {
            session_id,
            customer_id,
            amount_due: snapshot.total(),
            snapshot,
            currency: currency.into(),
            delivery_address,
            started_at: Utc::now(),
        })
    }

    /// Creates an AuthorizationCreated event.
    pub fn authorization_created(handle: AuthorizationHandle) -> Self {
        CheckoutEvent::AuthorizationCreated(AuthorizationCreatedData {
            handle,
            authorized_at: Utc::now(),
        })
    }

    /// Creates a ClientConfirmed event.
    pub fn client_confirmed(ambiguous: bool) -> Self {
        CheckoutEvent::ClientConfirmed(ClientConfirmedData {
            ambiguous,
            confirmed_at: Utc::now(),
        })
    }

    /// Creates a SettlementConfirmed event.
    pub fn settlement_confirmed(settlement: Settlement) -> Self {
        CheckoutEvent::SettlementConfirmed(SettlementConfirmedData { settlement })
    }

    /// Creates an OrderCommitted event.
    pub fn order_committed(order_id: OrderId) -> Self {
        CheckoutEvent::OrderCommitted(OrderCommittedData {
            order_id,
            committed_at: Utc::now(),
        })
    }

    /// Creates a CartCleared event.
    pub fn cart_cleared() -> Self {
        CheckoutEvent::CartCleared(CartClearedData {
            cleared_at: Utc::now(),
        })
    }

    /// Creates a ReconciliationEscalated event.
    pub fn escalated(class: ErrorClass, reason: impl Into<String>) -> Self {
        CheckoutEvent::ReconciliationEscalated(FailureData {
            class,
            reason: reason.into(),
            at: Utc::now(),
        })
    }

    /// Creates a SessionFailed event.
    pub fn session_failed(class: ErrorClass, reason: impl Into<String>) -> Self {
        CheckoutEvent::SessionFailed(FailureData {
            class,
            reason: reason.into(),
            at: Utc::now(),
        })
    }

    /// Creates a SessionAbandoned event.
    pub fn session_abandoned(reason: impl Into<String>, voided: bool) -> Self {
        CheckoutEvent::SessionAbandoned(SessionAbandonedData {
            reason: reason.into(),
            voided,
            abandoned_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let event = CheckoutEvent::session_failed(ErrorClass::GatewayRejected, "card declined");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "SessionFailed");
        assert_eq!(json["data"]["reason"], "card declined");
        assert_eq!(event.event_type(), "SessionFailed");
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = CheckoutEvent::client_confirmed(true);
        let json = serde_json::to_string(&event).unwrap();
        let back: CheckoutEvent = serde_json::from_str(&json).unwrap();

        assert!(matches!(
            back,
            CheckoutEvent::ClientConfirmed(ClientConfirmedData { ambiguous: true, .. })
        ));
    }
}
