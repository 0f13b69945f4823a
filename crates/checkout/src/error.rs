//! Checkout error types.

use cart::{CartError, Money};
use common::SessionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::{GatewayError, MaterializerError, PricingError};
use crate::state::CheckoutState;
use crate::store::SessionStoreError;

/// How a failure should be handled by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// A local dependency is briefly unavailable; retrying later may succeed.
    RecoverableLocal,

    /// The gateway said no (decline, expired hold). Shown to the customer.
    GatewayRejected,

    /// The gateway outcome is unknown; only server-side confirmation decides.
    GatewayAmbiguous,

    /// Money moved but the order is not recorded. Needs manual reconciliation.
    IntegrityViolation,

    /// The request cannot proceed as made (not logged in, empty cart, ...).
    Precondition,
}

impl ErrorClass {
    /// Returns the class name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::RecoverableLocal => "recoverable_local",
            ErrorClass::GatewayRejected => "gateway_rejected",
            ErrorClass::GatewayAmbiguous => "gateway_ambiguous",
            ErrorClass::IntegrityViolation => "integrity_violation",
            ErrorClass::Precondition => "precondition",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Anonymous visitors must log in before checking out.
    #[error("Authentication required to check out")]
    AuthenticationRequired,

    /// There is nothing to check out.
    #[error("Cart is empty")]
    EmptyCart,

    /// No usable delivery address; the client should prompt for one.
    #[error("Delivery address required: {reason}")]
    AddressRequired { reason: String },

    /// A product in the cart has no current price.
    #[error("Product unavailable: {product_id}")]
    ProductUnavailable { product_id: String },

    /// Another checkout for this customer is waiting on settlement.
    #[error("Checkout already in progress: session {session_id}")]
    CheckoutInProgress { session_id: SessionId },

    /// No session with this ID exists.
    #[error("Checkout session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session is not in a state that allows the action.
    #[error("Cannot {action} a session in {current} state")]
    InvalidTransition {
        current: CheckoutState,
        action: &'static str,
    },

    /// Payment is already being confirmed, so the session can no longer be cancelled.
    #[error("Cannot cancel a session in {current} state")]
    CancellationNotAllowed { current: CheckoutState },

    /// The gateway could not grant an authorization after retrying.
    #[error("Payment authorization unavailable: {reason}")]
    AuthorizationUnavailable { reason: String },

    /// The gateway declined the payment.
    #[error("Payment declined: {reason}")]
    PaymentDeclined { reason: String },

    /// The payment hold expired before the customer confirmed.
    #[error("Payment authorization expired")]
    AuthorizationExpired,

    /// Settlement could not be confirmed; the session is flagged for reconciliation.
    #[error("Settlement unresolved for session {session_id}")]
    SettlementUnresolved { session_id: SessionId },

    /// The gateway settled a different amount than was authorized.
    #[error("Settlement mismatch: expected {expected}, settled {settled}")]
    SettlementMismatch { expected: Money, settled: Money },

    /// Cart store error.
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    /// Price lookup error.
    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    /// Session store error.
    #[error("Session store error: {0}")]
    SessionStore(#[from] SessionStoreError),

    /// Payment gateway error.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Order materializer error.
    #[error("Order materializer error: {0}")]
    Materializer(#[from] MaterializerError),
}

impl CheckoutError {
    /// Returns the class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            CheckoutError::AuthenticationRequired
            | CheckoutError::EmptyCart
            | CheckoutError::AddressRequired { .. }
            | CheckoutError::ProductUnavailable { .. }
            | CheckoutError::CheckoutInProgress { .. }
            | CheckoutError::SessionNotFound(_)
            | CheckoutError::InvalidTransition { .. }
            | CheckoutError::CancellationNotAllowed { .. } => ErrorClass::Precondition,
            CheckoutError::AuthorizationUnavailable { .. } | CheckoutError::Pricing(_) => {
                ErrorClass::RecoverableLocal
            }
            CheckoutError::PaymentDeclined { .. } | CheckoutError::AuthorizationExpired => {
                ErrorClass::GatewayRejected
            }
            CheckoutError::SettlementUnresolved { .. } => ErrorClass::GatewayAmbiguous,
            CheckoutError::SettlementMismatch { .. } | CheckoutError::Materializer(_) => {
                ErrorClass::IntegrityViolation
            }
            CheckoutError::Cart(e) if e.is_recoverable() => ErrorClass::RecoverableLocal,
            CheckoutError::Cart(_) => ErrorClass::Precondition,
            CheckoutError::SessionStore(
                SessionStoreError::ConcurrencyConflict { .. } | SessionStoreError::Unavailable(_),
            ) => ErrorClass::RecoverableLocal,
            CheckoutError::SessionStore(_) => ErrorClass::IntegrityViolation,
            CheckoutError::Gateway(e) if e.is_rejection() => ErrorClass::GatewayRejected,
            CheckoutError::Gateway(_) => ErrorClass::GatewayAmbiguous,
        }
    }

    /// Returns true if the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::RecoverableLocal | ErrorClass::GatewayAmbiguous
        )
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
