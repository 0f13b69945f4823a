//! Checkout session state machine.

use serde::{Deserialize, Serialize};

/// The state of a checkout session in its lifecycle.
///
/// State transitions:
/// ```text
/// Draft ──► AwaitingAuthorization ──► AwaitingServerConfirmation ──► Committed
///   │                │                            │
///   │                ├──► Abandoned               │
///   ├──► Abandoned   │                            │
///   └────────────────┴──────────► Failed ◄────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CheckoutState {
    /// Snapshot taken, authorization not yet granted.
    #[default]
    Draft,

    /// A payment hold exists; waiting for the customer to confirm payment.
    AwaitingAuthorization,

    /// Client confirmation done; settlement not yet confirmed by the gateway.
    AwaitingServerConfirmation,

    /// The order has been materialized (terminal state).
    Committed,

    /// The payment was rejected or could not be set up (terminal state).
    Failed,

    /// Cancelled before payment was confirmed (terminal state).
    Abandoned,
}

impl CheckoutState {
    /// Returns true if an authorization can be attached.
    pub fn can_authorize(&self) -> bool {
        matches!(self, CheckoutState::Draft)
    }

    /// Returns true if the client-side payment confirmation can be recorded.
    pub fn can_confirm_client(&self) -> bool {
        matches!(self, CheckoutState::AwaitingAuthorization)
    }

    /// Returns true if server-side settlement can be confirmed.
    pub fn can_settle(&self) -> bool {
        matches!(self, CheckoutState::AwaitingServerConfirmation)
    }

    /// Returns true if the session can be abandoned by the customer.
    pub fn can_abandon(&self) -> bool {
        matches!(
            self,
            CheckoutState::Draft | CheckoutState::AwaitingAuthorization
        )
    }

    /// Returns true if the session can be failed.
    pub fn can_fail(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutState::Committed | CheckoutState::Failed | CheckoutState::Abandoned
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Draft => "Draft",
            CheckoutState::AwaitingAuthorization => "AwaitingAuthorization",
            CheckoutState::AwaitingServerConfirmation => "AwaitingServerConfirmation",
            CheckoutState::Committed => "Committed",
            CheckoutState::Failed => "Failed",
            CheckoutState::Abandoned => "Abandoned",
        }
    }
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
