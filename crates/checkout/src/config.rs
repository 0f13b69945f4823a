//! Checkout orchestrator configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tunables for the checkout orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// ISO 4217 currency for every authorization.
    pub currency: String,

    /// Retries for creating a payment hold. Kept small; exhaustion fails the session.
    pub authorization_retry: RetryPolicy,

    /// Retries for server-side settlement confirmation.
    pub settlement_retry: RetryPolicy,

    /// Retries for materializing the order once funds are captured.
    pub materialization_retry: RetryPolicy,

    /// Retries for clearing the cart after commit.
    pub cart_clear_retry: RetryPolicy,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            authorization_retry: RetryPolicy::new(
                3,
                Duration::from_millis(200),
                Duration::from_secs(2),
            ),
            settlement_retry: RetryPolicy::new(
                6,
                Duration::from_millis(500),
                Duration::from_secs(8),
            ),
            materialization_retry: RetryPolicy::new(
                10,
                Duration::from_millis(500),
                Duration::from_secs(30),
            ),
            cart_clear_retry: RetryPolicy::new(
                3,
                Duration::from_millis(100),
                Duration::from_secs(1),
            ),
        }
    }
}

impl CheckoutConfig {
    /// Sets the currency.
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Replaces every retry policy with one that does not wait.
    pub fn without_backoff(mut self) -> Self {
        self.authorization_retry = RetryPolicy::immediate(self.authorization_retry.max_attempts);
        self.settlement_retry = RetryPolicy::immediate(self.settlement_retry.max_attempts);
        self.materialization_retry =
            RetryPolicy::immediate(self.materialization_retry.max_attempts);
        self.cart_clear_retry = RetryPolicy::immediate(self.cart_clear_retry.max_attempts);
        self
    }
}
