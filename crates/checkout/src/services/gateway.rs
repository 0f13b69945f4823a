//! Payment gateway adapter trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cart::Money;
use chrono::{DateTime, Duration, Utc};
use common::{CustomerId, SessionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default lifetime of a payment hold.
const DEFAULT_AUTHORIZATION_TTL_MINUTES: i64 = 30;

/// Opaque token for a payment hold, scoped to one checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationHandle {
    /// Gateway-assigned identifier.
    pub id: String,

    /// Amount held.
    pub amount: Money,

    /// ISO 4217 currency code.
    pub currency: String,

    /// When the hold lapses.
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationHandle {
    /// Returns true if the hold has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Context sent with an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationMetadata {
    /// Session requesting the hold; the gateway's idempotency key.
    pub session_id: SessionId,

    /// Customer being charged.
    pub customer_id: CustomerId,
}

/// Opaque payment-method token produced by the client-side payment form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentMethodToken(String);

impl PaymentMethodToken {
    /// Wraps a token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Outcome of the client-side payment confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClientResult {
    /// The customer completed the payment step.
    Succeeded,

    /// The payment method was declined.
    Declined { reason: String },

    /// The client never learned the outcome (closed tab, network drop).
    Unknown,
}

/// Final movement of funds, as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Handle the settlement belongs to.
    pub handle_id: String,

    /// Amount captured.
    pub amount: Money,

    /// Gateway reference for the captured funds.
    pub reference: String,

    /// When the funds were captured.
    pub settled_at: DateTime<Utc>,
}

/// Outcome of server-side settlement confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementResult {
    /// Funds captured.
    Settled(Settlement),

    /// The gateway refused to capture.
    Declined { reason: String },
}

/// Errors returned by the payment gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway declined the request.
    #[error("declined: {reason}")]
    Declined { reason: String },

    /// The hold lapsed.
    #[error("authorization {handle_id} expired")]
    Expired { handle_id: String },

    /// The call timed out; the outcome is unknown.
    #[error("gateway timed out")]
    Timeout,

    /// The gateway could not be reached.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// Settlement has not been decided yet.
    #[error("settlement pending")]
    SettlementPending,

    /// The handle is not known to the gateway.
    #[error("unknown authorization {0}")]
    UnknownHandle(String),

    /// The hold was already captured and cannot be voided.
    #[error("authorization {handle_id} already settled")]
    AlreadySettled { handle_id: String },
}

impl GatewayError {
    /// Returns true if repeating the call may give a different answer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout | GatewayError::Unavailable(_) | GatewayError::SettlementPending
        )
    }

    /// Returns true if the gateway definitively refused.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GatewayError::Declined { .. } | GatewayError::Expired { .. }
        )
    }
}

/// Trait for payment gateway operations.
///
/// Only opaque tokens cross this boundary; card data never reaches the core.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Places a hold for `amount`. Repeated calls for one session return the same hold.
    async fn create_authorization(
        &self,
        amount: Money,
        currency: &str,
        metadata: &AuthorizationMetadata,
    ) -> Result<AuthorizationHandle, GatewayError>;

    /// Confirms the payment with the customer's payment method.
    async fn client_confirm(
        &self,
        handle: &AuthorizationHandle,
        token: &PaymentMethodToken,
    ) -> Result<ClientResult, GatewayError>;

    /// Asks the gateway whether the funds were captured. Idempotent.
    async fn server_confirm(
        &self,
        handle: &AuthorizationHandle,
    ) -> Result<SettlementResult, GatewayError>;

    /// Releases a hold that will not be captured.
    async fn void(&self, handle: &AuthorizationHandle) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HoldStatus {
    Authorized,
    ClientConfirmed,
    Settled(Settlement),
    Voided,
}

#[derive(Debug, Clone)]
struct Hold {
    handle: AuthorizationHandle,
    status: HoldStatus,
}

#[derive(Debug)]
struct GatewayState {
    holds: HashMap<String, Hold>,
    by_session: HashMap<SessionId, String>,
    next_id: u32,
    next_settlement: u32,
    ttl: Duration,
    create_failures: u32,
    decline_authorization: Option<String>,
    client_decline: Option<String>,
    client_timeouts: u32,
    settle_timeouts: u32,
    settle_decline: Option<String>,
    fail_on_void: bool,
    create_calls: u32,
    client_confirm_calls: u32,
    server_confirm_calls: u32,
    void_calls: u32,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self {
            holds: HashMap::new(),
            by_session: HashMap::new(),
            next_id: 0,
            next_settlement: 0,
            ttl: Duration::minutes(DEFAULT_AUTHORIZATION_TTL_MINUTES),
            create_failures: 0,
            decline_authorization: None,
            client_decline: None,
            client_timeouts: 0,
            settle_timeouts: 0,
            settle_decline: None,
            fail_on_void: false,
            create_calls: 0,
            client_confirm_calls: 0,
            server_confirm_calls: 0,
            void_calls: 0,
        }
    }
}

/// In-memory payment gateway for testing and local runs.
///
/// Faults can be injected per call type: transient failures for the next N
/// calls, declines, and expired holds (via a zero TTL).
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets how long new holds stay valid.
    pub fn set_authorization_ttl(&self, ttl: Duration) {
        self.state().ttl = ttl;
    }

    /// Makes the next `count` authorization requests fail as unavailable.
    pub fn fail_next_authorizations(&self, count: u32) {
        self.state().create_failures = count;
    }

    /// Makes authorization requests decline with the given reason.
    pub fn set_decline_authorization(&self, reason: Option<&str>) {
        self.state().decline_authorization = reason.map(str::to_string);
    }

    /// Makes client confirmations decline with the given reason.
    pub fn set_client_decline(&self, reason: Option<&str>) {
        self.state().client_decline = reason.map(str::to_string);
    }

    /// Makes the next `count` client confirmations time out.
    pub fn set_client_confirm_timeouts(&self, count: u32) {
        self.state().client_timeouts = count;
    }

    /// Makes the next `count` settlement confirmations time out.
    pub fn set_server_confirm_timeouts(&self, count: u32) {
        self.state().settle_timeouts = count;
    }

    /// Makes settlement decline with the given reason.
    pub fn set_settlement_decline(&self, reason: Option<&str>) {
        self.state().settle_decline = reason.map(str::to_string);
    }

    /// Configures voids to fail.
    pub fn set_fail_on_void(&self, fail: bool) {
        self.state().fail_on_void = fail;
    }

    /// Returns the number of holds ever created.
    pub fn authorization_count(&self) -> usize {
        self.state().holds.len()
    }

    /// Returns the number of captured holds.
    pub fn settlement_count(&self) -> usize {
        self.state()
            .holds
            .values()
            .filter(|hold| matches!(hold.status, HoldStatus::Settled(_)))
            .count()
    }

    /// Returns true if the hold was voided.
    pub fn is_voided(&self, handle_id: &str) -> bool {
        self.state()
            .holds
            .get(handle_id)
            .is_some_and(|hold| hold.status == HoldStatus::Voided)
    }

    /// Returns the number of `create_authorization` calls.
    pub fn create_calls(&self) -> u32 {
        self.state().create_calls
    }

    /// Returns the number of `client_confirm` calls.
    pub fn client_confirm_calls(&self) -> u32 {
        self.state().client_confirm_calls
    }

    /// Returns the number of `server_confirm` calls.
    pub fn server_confirm_calls(&self) -> u32 {
        self.state().server_confirm_calls
    }

    /// Returns the number of `void` calls.
    pub fn void_calls(&self) -> u32 {
        self.state().void_calls
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_authorization(
        &self,
        amount: Money,
        currency: &str,
        metadata: &AuthorizationMetadata,
    ) -> Result<AuthorizationHandle, GatewayError> {
        let mut state = self.state();
        state.create_calls += 1;

        if state.create_failures > 0 {
            state.create_failures -= 1;
            return Err(GatewayError::Unavailable(
                "authorization service unreachable".to_string(),
            ));
        }
        if let Some(reason) = state.decline_authorization.clone() {
            return Err(GatewayError::Declined { reason });
        }

        let now = Utc::now();
        let reusable = state
            .by_session
            .get(&metadata.session_id)
            .and_then(|id| state.holds.get(id))
            .filter(|hold| hold.status == HoldStatus::Authorized && !hold.handle.is_expired(now))
            .map(|hold| hold.handle.clone());
        if let Some(handle) = reusable {
            return Ok(handle);
        }

        state.next_id += 1;
        let handle = AuthorizationHandle {
            id: format!("AUTH-{:06}", state.next_id),
            amount,
            currency: currency.to_string(),
            expires_at: now + state.ttl,
        };
        state
            .by_session
            .insert(metadata.session_id, handle.id.clone());
        state.holds.insert(
            handle.id.clone(),
            Hold {
                handle: handle.clone(),
                status: HoldStatus::Authorized,
            },
        );

        Ok(handle)
    }

    async fn client_confirm(
        &self,
        handle: &AuthorizationHandle,
        _token: &PaymentMethodToken,
    ) -> Result<ClientResult, GatewayError> {
        let mut state = self.state();
        state.client_confirm_calls += 1;

        if state.client_timeouts > 0 {
            state.client_timeouts -= 1;
            return Err(GatewayError::Timeout);
        }
        if let Some(reason) = state.client_decline.clone() {
            return Ok(ClientResult::Declined { reason });
        }

        let hold = state
            .holds
            .get_mut(&handle.id)
            .ok_or_else(|| GatewayError::UnknownHandle(handle.id.clone()))?;

        match hold.status {
            HoldStatus::Authorized if hold.handle.is_expired(Utc::now()) => {
                Err(GatewayError::Expired {
                    handle_id: handle.id.clone(),
                })
            }
            HoldStatus::Authorized => {
                hold.status = HoldStatus::ClientConfirmed;
                Ok(ClientResult::Succeeded)
            }
            HoldStatus::ClientConfirmed | HoldStatus::Settled(_) => Ok(ClientResult::Succeeded),
            HoldStatus::Voided => Ok(ClientResult::Declined {
                reason: "authorization voided".to_string(),
            }),
        }
    }

    async fn server_confirm(
        &self,
        handle: &AuthorizationHandle,
    ) -> Result<SettlementResult, GatewayError> {
        let mut state = self.state();
        state.server_confirm_calls += 1;

        if state.settle_timeouts > 0 {
            state.settle_timeouts -= 1;
            return Err(GatewayError::Timeout);
        }

        let settle_decline = state.settle_decline.clone();
        let reference = format!("STL-{:06}", state.next_settlement + 1);

        let hold = state
            .holds
            .get_mut(&handle.id)
            .ok_or_else(|| GatewayError::UnknownHandle(handle.id.clone()))?;

        if let HoldStatus::Settled(settlement) = &hold.status {
            return Ok(SettlementResult::Settled(settlement.clone()));
        }
        if hold.status == HoldStatus::Voided {
            return Ok(SettlementResult::Declined {
                reason: "authorization voided".to_string(),
            });
        }
        if let Some(reason) = settle_decline {
            return Ok(SettlementResult::Declined { reason });
        }

        let settlement = Settlement {
            handle_id: hold.handle.id.clone(),
            amount: hold.handle.amount,
            reference,
            settled_at: Utc::now(),
        };
        hold.status = HoldStatus::Settled(settlement.clone());
        state.next_settlement += 1;
        Ok(SettlementResult::Settled(settlement))
    }

    async fn void(&self, handle: &AuthorizationHandle) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.void_calls += 1;

        if state.fail_on_void {
            return Err(GatewayError::Unavailable("void rejected".to_string()));
        }

        let hold = state
            .holds
            .get_mut(&handle.id)
            .ok_or_else(|| GatewayError::UnknownHandle(handle.id.clone()))?;

        if matches!(hold.status, HoldStatus::Settled(_)) {
            return Err(GatewayError::AlreadySettled {
                handle_id: handle.id.clone(),
            });
        }
        hold.status = HoldStatus::Voided;
        Ok(())
    }
}
