//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::CheckoutConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL for durable carts; in-memory when unset
/// - `CHECKOUT_CURRENCY`: authorization currency (default: `"USD"`)
/// - `CHECKOUT_AUTH_MAX_ATTEMPTS`, `CHECKOUT_SETTLEMENT_MAX_ATTEMPTS`,
///   `CHECKOUT_MATERIALIZE_MAX_ATTEMPTS`: retry attempts per external call
/// - `CHECKOUT_RETRY_BASE_MS`: first backoff delay for every retry policy
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub checkout: CheckoutConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.parse::<u32>().ok());

        let mut checkout = defaults.checkout;
        if let Some(currency) = lookup("CHECKOUT_CURRENCY") {
            checkout = checkout.with_currency(currency);
        }
        if let Some(attempts) = parsed("CHECKOUT_AUTH_MAX_ATTEMPTS") {
            checkout.authorization_retry.max_attempts = attempts;
        }
        if let Some(attempts) = parsed("CHECKOUT_SETTLEMENT_MAX_ATTEMPTS") {
            checkout.settlement_retry.max_attempts = attempts;
        }
        if let Some(attempts) = parsed("CHECKOUT_MATERIALIZE_MAX_ATTEMPTS") {
            checkout.materialization_retry.max_attempts = attempts;
        }
        if let Some(base_ms) = lookup("CHECKOUT_RETRY_BASE_MS").and_then(|v| v.parse().ok()) {
            let base = Duration::from_millis(base_ms);
            for policy in [
                &mut checkout.authorization_retry,
                &mut checkout.settlement_retry,
                &mut checkout.materialization_retry,
                &mut checkout.cart_clear_retry,
            ] {
                policy.base_delay = base;
            }
        }

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            checkout,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            checkout: CheckoutConfig::default(),
        }
    }
}
