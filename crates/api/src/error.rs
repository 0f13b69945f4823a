//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cart::CartError;
use checkout::{CheckoutError, ErrorClass, SessionStoreError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Cart store error.
    Cart(CartError),
    /// Checkout orchestration error.
    Checkout(CheckoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, class) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Cart(err) => (cart_error_status(&err), err.to_string(), None),
            ApiError::Checkout(err) => {
                let class = err.class();
                (checkout_error_status(&err), err.to_string(), Some(class))
            }
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = match class {
            Some(class) => serde_json::json!({ "error": message, "class": class.as_str() }),
            None => serde_json::json!({ "error": message }),
        };
        (status, axum::Json(body)).into_response()
    }
}

fn cart_error_status(err: &CartError) -> StatusCode {
    match err {
        CartError::StoreUnavailable(_) | CartError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        CartError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
        CartError::ItemNotFound { .. } => StatusCode::NOT_FOUND,
        CartError::OwnerModeMismatch { .. } => StatusCode::BAD_REQUEST,
        CartError::InvalidPrice { .. } | CartError::InvalidQuantity { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CartError::Migration(_) | CartError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn checkout_error_status(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
        CheckoutError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::CheckoutInProgress { .. }
        | CheckoutError::InvalidTransition { .. }
        | CheckoutError::CancellationNotAllowed { .. }
        | CheckoutError::SessionStore(SessionStoreError::ConcurrencyConflict { .. }) => {
            StatusCode::CONFLICT
        }
        // The customer was charged or may have been; the session awaits reconciliation.
        CheckoutError::SettlementUnresolved { .. } | CheckoutError::SettlementMismatch { .. } => {
            StatusCode::ACCEPTED
        }
        CheckoutError::SessionStore(SessionStoreError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CheckoutError::SessionStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CheckoutError::Cart(cart) => cart_error_status(cart),
        _ => match err.class() {
            ErrorClass::Precondition => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorClass::RecoverableLocal | ErrorClass::GatewayAmbiguous => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorClass::GatewayRejected => StatusCode::PAYMENT_REQUIRED,
            ErrorClass::IntegrityViolation => StatusCode::ACCEPTED,
        },
    }
}

impl From<CartError> for ApiError {
    fn from(err: CartError) -> Self {
        ApiError::Cart(err)
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}
