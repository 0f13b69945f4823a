//! Checkout route handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use cart::CartOwner;
use checkout::{
    BeginCheckout, CheckoutOutcome, CheckoutSession, ClientResult, DeliveryAddress,
    PaymentMethodToken,
};
use chrono::{DateTime, Utc};
use common::{CustomerId, DeviceId, SessionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::carts::LineItemResponse;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

/// Starts a checkout. Anonymous callers send only `device_id` and are refused.
#[derive(Debug, Deserialize)]
pub struct BeginCheckoutRequest {
    pub customer_id: Option<Uuid>,
    pub device_id: Option<String>,
    pub idempotency_key: Option<Uuid>,
}

/// Either a payment-method token to confirm through the gateway, or a result
/// the client already obtained from the payment form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ConfirmRequest {
    Token { payment_method_token: String },
    Reported(ClientResult),
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct AuthorizationResponse {
    pub id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FailureResponse {
    pub class: &'static str,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub customer_id: CustomerId,
    pub state: &'static str,
    pub version: i64,
    pub items: Vec<LineItemResponse>,
    pub amount_due_cents: i64,
    pub amount_due: String,
    pub currency: String,
    pub delivery_address: DeliveryAddress,
    pub authorization: Option<AuthorizationResponse>,
    pub order_id: Option<String>,
    pub cart_cleared: bool,
    pub escalated: bool,
    pub escalation_reason: Option<String>,
    pub failure: Option<FailureResponse>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&CheckoutSession> for SessionResponse {
    fn from(session: &CheckoutSession) -> Self {
        Self {
            session_id: session.id(),
            customer_id: session.customer_id(),
            state: session.state().as_str(),
            version: session.version().as_i64(),
            items: session
                .snapshot()
                .items()
                .iter()
                .map(LineItemResponse::from)
                .collect(),
            amount_due_cents: session.amount_due().cents(),
            amount_due: session.amount_due().to_string(),
            currency: session.currency().to_string(),
            delivery_address: session.delivery_address().clone(),
            authorization: session.authorization().map(|handle| AuthorizationResponse {
                id: handle.id.clone(),
                amount_cents: handle.amount.cents(),
                currency: handle.currency.clone(),
                expires_at: handle.expires_at,
            }),
            order_id: session.order_id().map(|id| id.to_string()),
            cart_cleared: session.cart_cleared(),
            escalated: session.is_escalated(),
            escalation_reason: session.escalation_reason().map(str::to_string),
            failure: session.failure().map(|(class, reason)| FailureResponse {
                class: class.as_str(),
                reason: reason.to_string(),
            }),
            started_at: session.started_at(),
            updated_at: session.updated_at(),
        }
    }
}

/// Committed outcomes are 200; captured-but-pending outcomes are 202.
fn outcome_response(outcome: CheckoutOutcome) -> (StatusCode, Json<CheckoutOutcome>) {
    let status = match outcome {
        CheckoutOutcome::Committed { .. } => StatusCode::OK,
        CheckoutOutcome::PaymentCapturedOrderPending { .. } => StatusCode::ACCEPTED,
    };
    (status, Json(outcome))
}

// -- Handlers --

/// POST /checkout: snapshots the customer's cart and places a payment hold.
#[tracing::instrument(skip(state))]
pub async fn begin(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BeginCheckoutRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let owner = match (req.customer_id, req.device_id) {
        (Some(customer_id), _) => CartOwner::Customer(CustomerId::from_uuid(customer_id)),
        (None, Some(device_id)) => CartOwner::Device(DeviceId::new(device_id)),
        (None, None) => {
            return Err(ApiError::BadRequest(
                "either customer_id or device_id is required".to_string(),
            ));
        }
    };

    let mut request = BeginCheckout::new(owner);
    if let Some(key) = req.idempotency_key {
        request = request.with_idempotency_key(SessionId::from_uuid(key));
    }

    let session = state.checkout.begin_checkout(request).await?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(&session))))
}

/// GET /checkout/{session_id}: returns the session, e.g. after a page reload.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .checkout
        .get_session(SessionId::from_uuid(session_id))
        .await?;
    Ok(Json(SessionResponse::from(&session)))
}

/// POST /checkout/{session_id}/confirm: confirms payment, settles, and commits.
#[tracing::instrument(skip(state, req))]
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<ConfirmRequest>,
) -> Result<(StatusCode, Json<CheckoutOutcome>), ApiError> {
    let session_id = SessionId::from_uuid(session_id);
    let outcome = match req {
        ConfirmRequest::Token {
            payment_method_token,
        } => {
            state
                .checkout
                .confirm_payment(session_id, PaymentMethodToken::new(payment_method_token))
                .await?
        }
        ConfirmRequest::Reported(result) => {
            state
                .checkout
                .report_client_result(session_id, result)
                .await?
        }
    };
    Ok(outcome_response(outcome))
}

/// POST /checkout/{session_id}/finalize: settles and commits a confirmed session.
#[tracing::instrument(skip(state))]
pub async fn finalize(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<(StatusCode, Json<CheckoutOutcome>), ApiError> {
    let outcome = state
        .checkout
        .finalize(SessionId::from_uuid(session_id))
        .await?;
    Ok(outcome_response(outcome))
}

/// POST /checkout/{session_id}/cancel: abandons a session and voids its hold.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.checkout.cancel(SessionId::from_uuid(session_id)).await?;
    Ok(Json(SessionResponse::from(&session)))
}

/// POST /checkout/{session_id}/reconcile: re-drives an escalated session.
#[tracing::instrument(skip(state))]
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<(StatusCode, Json<CheckoutOutcome>), ApiError> {
    let outcome = state
        .checkout
        .reconcile(SessionId::from_uuid(session_id))
        .await?;
    Ok(outcome_response(outcome))
}

/// GET /checkout/reconciliation: sessions awaiting manual reconciliation.
#[tracing::instrument(skip(state))]
pub async fn pending_reconciliation(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let sessions = state.checkout.pending_reconciliation().await?;
    Ok(Json(sessions.iter().map(SessionResponse::from).collect()))
}

/// PUT /customers/{customer_id}/address: sets the default delivery address.
#[tracing::instrument(skip(state, address))]
pub async fn set_address(
    State(state): State<Arc<AppState>>,
    Path(customer_id): Path<Uuid>,
    Json(address): Json<DeliveryAddress>,
) -> Result<StatusCode, ApiError> {
    if address.line1.trim().is_empty() || address.city.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "address requires line1 and city".to_string(),
        ));
    }
    state
        .addresses
        .set_default_address(CustomerId::from_uuid(customer_id), address);
    Ok(StatusCode::NO_CONTENT)
}
