//! Event-sourced checkout session.

use cart::Money;
use chrono::{DateTime, Utc};
use common::{CustomerId, SessionId, Version};
use serde::Serialize;

use crate::error::ErrorClass;
use crate::events::{CheckoutEvent, SessionStartedData};
use crate::services::{AuthorizationHandle, DeliveryAddress, OrderId, Settlement};
use crate::snapshot::CartSnapshot;
use crate::state::CheckoutState;

/// A checkout session rebuilt from its events.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    id: SessionId,
    customer_id: CustomerId,
    version: Version,
    state: CheckoutState,
    snapshot: CartSnapshot,
    amount_due: Money,
    currency: String,
    delivery_address: DeliveryAddress,
    authorization: Option<AuthorizationHandle>,
    client_result_ambiguous: bool,
    settlement: Option<Settlement>,
    order_id: Option<OrderId>,
    cart_cleared: bool,
    escalated: bool,
    escalation_reason: Option<String>,
    failure: Option<(ErrorClass, String)>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Creates a Draft session from its first event.
    pub fn from_started(data: SessionStartedData) -> Self {
        Self {
            id: data.session_id,
            customer_id: data.customer_id,
            version: Version::initial(),
            state: CheckoutState::Draft,
            snapshot: data.snapshot,
            amount_due: data.amount_due,
            currency: data.currency,
            delivery_address: data.delivery_address,
            authorization: None,
            client_result_ambiguous: false,
            settlement: None,
            order_id: None,
            cart_cleared: false,
            escalated: false,
            escalation_reason: None,
            failure: None,
            started_at: data.started_at,
            updated_at: data.started_at,
        }
    }

    /// Rebuilds a session by replaying its events in order.
    ///
    /// Returns `None` if the stream is empty or does not begin with `SessionStarted`.
    pub fn replay(events: impl IntoIterator<Item = CheckoutEvent>) -> Option<Self> {
        let mut events = events.into_iter();
        let mut session = match events.next()? {
            CheckoutEvent::SessionStarted(data) => Self::from_started(data),
            _ => return None,
        };
        session.version = session.version.next();

        for event in events {
            session.apply(event);
            session.version = session.version.next();
        }
        Some(session)
    }

    /// Applies one event to the in-memory state.
    pub fn apply(&mut self, event: CheckoutEvent) {
        match event {
            CheckoutEvent::SessionStarted(_) => {
                // Only valid as the first event; see `from_started`.
            }
            CheckoutEvent::AuthorizationCreated(data) => {
                self.state = CheckoutState::AwaitingAuthorization;
                self.authorization = Some(data.handle);
                self.updated_at = data.authorized_at;
            }
            CheckoutEvent::ClientConfirmed(data) => {
                self.state = CheckoutState::AwaitingServerConfirmation;
                self.client_result_ambiguous = data.ambiguous;
                self.updated_at = data.confirmed_at;
            }
            CheckoutEvent::SettlementConfirmed(data) => {
                self.updated_at = data.settlement.settled_at;
                self.settlement = Some(data.settlement);
                self.clear_escalation();
            }
            CheckoutEvent::OrderCommitted(data) => {
                self.state = CheckoutState::Committed;
                self.order_id = Some(data.order_id);
                self.updated_at = data.committed_at;
                self.clear_escalation();
            }
            CheckoutEvent::CartCleared(data) => {
                self.cart_cleared = true;
                self.updated_at = data.cleared_at;
            }
            CheckoutEvent::ReconciliationEscalated(data) => {
                self.escalated = true;
                self.escalation_reason = Some(data.reason);
                self.updated_at = data.at;
            }
            CheckoutEvent::SessionFailed(data) => {
                self.state = CheckoutState::Failed;
                self.failure = Some((data.class, data.reason));
                self.updated_at = data.at;
                self.clear_escalation();
            }
            CheckoutEvent::SessionAbandoned(data) => {
                self.state = CheckoutState::Abandoned;
                self.updated_at = data.abandoned_at;
            }
        }
    }

    fn clear_escalation(&mut self) {
        self.escalated = false;
        self.escalation_reason = None;
    }

    /// Sets the version after a successful append.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

// Query methods
impl CheckoutSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    /// Returns the number of events recorded for this session.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn state(&self) -> CheckoutState {
        self.state
    }

    /// Returns the immutable snapshot this session charges for.
    pub fn snapshot(&self) -> &CartSnapshot {
        &self.snapshot
    }

    /// Returns the amount authorized and settled; fixed at session start.
    pub fn amount_due(&self) -> Money {
        self.amount_due
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn delivery_address(&self) -> &DeliveryAddress {
        &self.delivery_address
    }

    /// Returns the payment hold, once granted.
    pub fn authorization(&self) -> Option<&AuthorizationHandle> {
        self.authorization.as_ref()
    }

    /// Returns true if the client reported an unknown payment outcome.
    pub fn client_result_ambiguous(&self) -> bool {
        self.client_result_ambiguous
    }

    pub fn settlement(&self) -> Option<&Settlement> {
        self.settlement.as_ref()
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn cart_cleared(&self) -> bool {
        self.cart_cleared
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated
    }

    pub fn escalation_reason(&self) -> Option<&str> {
        self.escalation_reason.as_deref()
    }

    /// Returns the failure class and reason for a Failed session.
    pub fn failure(&self) -> Option<(ErrorClass, &str)> {
        self.failure
            .as_ref()
            .map(|(class, reason)| (*class, reason.as_str()))
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if the hold exists and has lapsed at `now`.
    pub fn authorization_expired(&self, now: DateTime<Utc>) -> bool {
        self.authorization
            .as_ref()
            .is_some_and(|handle| handle.is_expired(now))
    }

    /// Returns true if the session needs an operator or a `reconcile` pass.
    ///
    /// That is either an explicit escalation or a commit whose cart clear failed.
    pub fn needs_reconciliation(&self) -> bool {
        self.escalated || (self.state == CheckoutState::Committed && !self.cart_cleared)
    }
}
