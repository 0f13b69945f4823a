//! Checkout orchestrator: drives sessions from cart snapshot to committed order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use cart::{CartError, CartOwner, CartStore, CartStoreExt, ProductId, StoreHealth};
use chrono::Utc;
use common::{CustomerId, SessionId, Version};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, ErrorClass, Result};
use crate::events::{CheckoutEvent, SessionStartedData};
use crate::retry::retry_with_backoff;
use crate::services::{
    AddressBook, AuthorizationHandle, AuthorizationMetadata, ClientResult, GatewayError,
    MaterializerError, OrderId, OrderMaterializer, PaymentGateway, PaymentMethodToken,
    PriceSnapshot, SettlementResult,
};
use crate::session::CheckoutSession;
use crate::snapshot::CartSnapshot;
use crate::state::CheckoutState;
use crate::store::{SessionStore, SessionStoreError, SessionStoreExt};

/// Request to start (or resume) a checkout.
#[derive(Debug, Clone)]
pub struct BeginCheckout {
    /// Whose cart is being checked out. Must be an authenticated customer.
    pub owner: CartOwner,

    /// Caller-supplied key; a repeat with the same key returns the same session.
    pub idempotency_key: Option<SessionId>,
}

impl BeginCheckout {
    /// Creates a request without an idempotency key.
    pub fn new(owner: CartOwner) -> Self {
        Self {
            owner,
            idempotency_key: None,
        }
    }

    /// Sets the idempotency key. It becomes the session ID of a new session.
    pub fn with_idempotency_key(mut self, key: SessionId) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// Final answer for a session that got past client confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    /// The order exists. `cart_cleared` is false if the clear still has to be reconciled.
    Committed {
        session_id: SessionId,
        order_id: OrderId,
        cart_cleared: bool,
    },

    /// Funds were captured but the order is not recorded yet; the session is escalated.
    PaymentCapturedOrderPending { session_id: SessionId },
}

type CustomerLocks = Mutex<HashMap<CustomerId, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one customer's lock; drops the map entry once nobody else holds or
/// awaits it.
struct CustomerGuard<'a> {
    locks: &'a CustomerLocks,
    customer_id: CustomerId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CustomerGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.customer_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.customer_id);
        }
    }
}

enum Confirmation {
    Finished(CheckoutOutcome),
    Pending(AuthorizationHandle),
}

/// Orchestrates checkout sessions.
///
/// Each transition is appended to the session store before the next external
/// call, so any session can be resumed from its events after a crash or a
/// page reload. Operations on sessions of one customer are serialized.
pub struct CheckoutOrchestrator<C, P, G, M, A, S>
where
    C: CartStore,
    P: PriceSnapshot,
    G: PaymentGateway,
    M: OrderMaterializer,
    A: AddressBook,
    S: SessionStore,
{
    carts: C,
    pricing: P,
    gateway: G,
    materializer: M,
    addresses: A,
    sessions: S,
    config: CheckoutConfig,
    customer_locks: CustomerLocks,
}

impl<C, P, G, M, A, S> CheckoutOrchestrator<C, P, G, M, A, S>
where
    C: CartStore,
    P: PriceSnapshot,
    G: PaymentGateway,
    M: OrderMaterializer,
    A: AddressBook,
    S: SessionStore,
{
    /// Creates an orchestrator with the default configuration.
    ///
    /// `carts` is the durable, account-scoped cart store.
    pub fn new(carts: C, pricing: P, gateway: G, materializer: M, addresses: A, sessions: S) -> Self {
        Self::with_config(
            carts,
            pricing,
            gateway,
            materializer,
            addresses,
            sessions,
            CheckoutConfig::default(),
        )
    }

    /// Creates an orchestrator with an explicit configuration.
    pub fn with_config(
        carts: C,
        pricing: P,
        gateway: G,
        materializer: M,
        addresses: A,
        sessions: S,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            carts,
            pricing,
            gateway,
            materializer,
            addresses,
            sessions,
            config,
            customer_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn carts(&self) -> &C {
        &self.carts
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn materializer(&self) -> &M {
        &self.materializer
    }

    pub fn sessions(&self) -> &S {
        &self.sessions
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Starts a checkout: snapshots and re-prices the cart, then places a
    /// payment hold for exactly the snapshot total.
    ///
    /// Returns an existing session instead when the idempotency key names one,
    /// or when an open session already holds an unexpired authorization for
    /// identical contents.
    #[tracing::instrument(skip(self))]
    pub async fn begin_checkout(&self, request: BeginCheckout) -> Result<CheckoutSession> {
        let customer_id = request
            .owner
            .customer_id()
            .ok_or(CheckoutError::AuthenticationRequired)?;
        let _guard = self.lock_customer(customer_id).await;

        if let Some(key) = request.idempotency_key
            && let Some(existing) = self.sessions.load(key).await?
        {
            if existing.customer_id() != customer_id {
                return Err(CheckoutError::SessionNotFound(key));
            }
            tracing::info!(session_id = %key, state = %existing.state(), "returning session for idempotency key");
            return Ok(existing);
        }

        if let StoreHealth::Unavailable(reason) = self.carts.health().await {
            return Err(CartError::StoreUnavailable(reason).into());
        }
        let cart = self.carts.load(&request.owner).await?;
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let delivery_address = match self.addresses.default_address(customer_id).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                return Err(CheckoutError::AddressRequired {
                    reason: "no default delivery address".to_string(),
                });
            }
            Err(e) => {
                return Err(CheckoutError::AddressRequired {
                    reason: e.to_string(),
                });
            }
        };

        let product_ids: Vec<ProductId> = cart
            .items()
            .iter()
            .map(|line| line.product_id.clone())
            .collect();
        let prices = self.pricing.current_prices(&product_ids).await?;
        let snapshot = CartSnapshot::capture(&cart, &prices)?;

        if let Some(reusable) = self.resolve_open_sessions(customer_id, &snapshot).await? {
            tracing::info!(session_id = %reusable.id(), "reusing open session with identical snapshot");
            return Ok(reusable);
        }

        let session_id = request.idempotency_key.unwrap_or_default();
        let data = SessionStartedData {
            session_id,
            customer_id,
            amount_due: snapshot.total(),
            snapshot,
            currency: self.config.currency.clone(),
            delivery_address,
            started_at: Utc::now(),
        };
        let mut session = CheckoutSession::from_started(data.clone());
        let version = self
            .sessions
            .append(
                session_id,
                Version::initial(),
                vec![CheckoutEvent::SessionStarted(data)],
            )
            .await?;
        session.set_version(version);
        metrics::counter!("checkout_started_total").increment(1);

        let metadata = AuthorizationMetadata {
            session_id,
            customer_id,
        };
        let amount = session.amount_due();
        let authorization = retry_with_backoff(
            &self.config.authorization_retry,
            "create_authorization",
            GatewayError::is_transient,
            || {
                self.gateway
                    .create_authorization(amount, &self.config.currency, &metadata)
            },
        )
        .await;

        match authorization {
            Ok(handle) => {
                let created = CheckoutEvent::authorization_created(handle.clone());
                if let Err(e) = self.record(&mut session, created).await {
                    tracing::warn!(%session_id, error = %e, "hold not recorded, voiding it");
                    self.void_hold(session_id, &handle).await;
                    return Err(e);
                }
                tracing::info!(%session_id, %customer_id, amount = %amount, "checkout started");
                Ok(session)
            }
            Err(GatewayError::Declined { reason }) => {
                self.fail_session(&mut session, ErrorClass::GatewayRejected, &reason)
                    .await?;
                Err(CheckoutError::PaymentDeclined { reason })
            }
            Err(e) => {
                let reason = e.to_string();
                self.fail_session(&mut session, ErrorClass::RecoverableLocal, &reason)
                    .await?;
                Err(CheckoutError::AuthorizationUnavailable { reason })
            }
        }
    }

    /// Confirms payment through the gateway with the customer's payment-method
    /// token, then settles and commits.
    ///
    /// The client-side call is never retried. A timeout is treated as an
    /// unknown outcome and left to server-side confirmation.
    #[tracing::instrument(skip(self, token))]
    pub async fn confirm_payment(
        &self,
        session_id: SessionId,
        token: PaymentMethodToken,
    ) -> Result<CheckoutOutcome> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        let handle = match self.prepare_confirmation(&mut session).await? {
            Confirmation::Finished(outcome) => return Ok(outcome),
            Confirmation::Pending(handle) => handle,
        };

        let client_result = match self.gateway.client_confirm(&handle, &token).await {
            Ok(result) => result,
            Err(GatewayError::Expired { .. }) => return self.expire(&mut session).await,
            Err(GatewayError::Declined { reason }) => ClientResult::Declined { reason },
            Err(e) if e.is_transient() => {
                tracing::warn!(%session_id, error = %e, "client confirmation outcome unknown");
                ClientResult::Unknown
            }
            Err(e) => return Err(e.into()),
        };

        self.apply_client_result(&mut session, client_result).await
    }

    /// Records a result the client obtained from the payment form itself,
    /// then settles and commits.
    #[tracing::instrument(skip(self))]
    pub async fn report_client_result(
        &self,
        session_id: SessionId,
        result: ClientResult,
    ) -> Result<CheckoutOutcome> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        match self.prepare_confirmation(&mut session).await? {
            Confirmation::Finished(outcome) => Ok(outcome),
            Confirmation::Pending(_) => self.apply_client_result(&mut session, result).await,
        }
    }

    /// Resumes a session past client confirmation: settles if needed and
    /// commits. Committed sessions return their outcome unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn finalize(&self, session_id: SessionId) -> Result<CheckoutOutcome> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        match session.state() {
            CheckoutState::Committed => committed_outcome(&session),
            CheckoutState::AwaitingServerConfirmation => self.drive_finalize(&mut session).await,
            current => Err(CheckoutError::InvalidTransition {
                current,
                action: "finalize",
            }),
        }
    }

    /// Cancels a session that has not reached payment confirmation, voiding its hold.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, session_id: SessionId) -> Result<CheckoutSession> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        match session.state() {
            CheckoutState::Abandoned => Ok(session),
            state if state.can_abandon() => {
                self.abandon(&mut session, "cancelled by customer").await?;
                Ok(session)
            }
            current => Err(CheckoutError::CancellationNotAllowed { current }),
        }
    }

    /// Re-drives an escalated or interrupted session.
    ///
    /// Settlement is re-confirmed and the order re-materialized under the
    /// same idempotency key; a committed session whose cart clear failed has
    /// its cart cleared.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, session_id: SessionId) -> Result<CheckoutOutcome> {
        let (_guard, mut session) = self.lock_session(session_id).await?;
        let outcome = match session.state() {
            CheckoutState::AwaitingServerConfirmation => self.drive_finalize(&mut session).await?,
            CheckoutState::Committed => {
                if !session.cart_cleared() {
                    self.clear_cart(&mut session).await?;
                }
                committed_outcome(&session)?
            }
            current => {
                return Err(CheckoutError::InvalidTransition {
                    current,
                    action: "reconcile",
                });
            }
        };
        metrics::counter!("checkout_reconciliations_total").increment(1);
        tracing::info!(%session_id, ?outcome, "session reconciled");
        Ok(outcome)
    }

    /// Loads a session, e.g. after a page reload.
    pub async fn get_session(&self, session_id: SessionId) -> Result<CheckoutSession> {
        self.sessions
            .load(session_id)
            .await?
            .ok_or(CheckoutError::SessionNotFound(session_id))
    }

    /// Returns every session that needs reconciliation, oldest first.
    pub async fn pending_reconciliation(&self) -> Result<Vec<CheckoutSession>> {
        let mut pending = Vec::new();
        for session_id in self.sessions.session_ids().await? {
            if let Some(session) = self.sessions.load(session_id).await?
                && session.needs_reconciliation()
            {
                pending.push(session);
            }
        }
        Ok(pending)
    }

    /// Takes the per-customer lock.
    async fn lock_customer(&self, customer_id: CustomerId) -> CustomerGuard<'_> {
        let lock = {
            let mut locks = self
                .customer_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            locks.entry(customer_id).or_default().clone()
        };
        CustomerGuard {
            locks: &self.customer_locks,
            customer_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Locks the session's customer and loads the session under that lock.
    async fn lock_session(
        &self,
        session_id: SessionId,
    ) -> Result<(CustomerGuard<'_>, CheckoutSession)> {
        let customer_id = self.get_session(session_id).await?.customer_id();
        let guard = self.lock_customer(customer_id).await;
        let session = self.get_session(session_id).await?;
        Ok((guard, session))
    }

    /// Handles every open session of the customer before a new one starts.
    ///
    /// Returns a session that can be reused as is, if there is one.
    async fn resolve_open_sessions(
        &self,
        customer_id: CustomerId,
        snapshot: &CartSnapshot,
    ) -> Result<Option<CheckoutSession>> {
        let open: Vec<CheckoutSession> = self
            .sessions
            .load_for_customer(customer_id)
            .await?
            .into_iter()
            .filter(|session| !session.state().is_terminal())
            .collect();

        if let Some(in_progress) = open
            .iter()
            .find(|session| session.state() == CheckoutState::AwaitingServerConfirmation)
        {
            return Err(CheckoutError::CheckoutInProgress {
                session_id: in_progress.id(),
            });
        }

        let now = Utc::now();
        let mut reusable = None;
        for mut session in open {
            let same_contents = session.snapshot().same_contents(snapshot);
            if reusable.is_none()
                && same_contents
                && session.state() == CheckoutState::AwaitingAuthorization
                && !session.authorization_expired(now)
            {
                reusable = Some(session);
            } else if same_contents && session.authorization_expired(now) {
                self.fail_session(
                    &mut session,
                    ErrorClass::GatewayRejected,
                    "authorization expired",
                )
                .await?;
            } else {
                self.abandon(&mut session, "superseded by a new checkout")
                    .await?;
            }
        }
        Ok(reusable)
    }

    /// Runs the checks shared by both client confirmation paths.
    async fn prepare_confirmation(&self, session: &mut CheckoutSession) -> Result<Confirmation> {
        let current = session.state();
        match current {
            CheckoutState::Committed => {
                return committed_outcome(session).map(Confirmation::Finished);
            }
            CheckoutState::AwaitingServerConfirmation => {
                return self
                    .drive_finalize(session)
                    .await
                    .map(Confirmation::Finished);
            }
            CheckoutState::AwaitingAuthorization => {}
            _ => {
                return Err(CheckoutError::InvalidTransition {
                    current,
                    action: "confirm",
                });
            }
        }

        let handle = session
            .authorization()
            .cloned()
            .ok_or(CheckoutError::InvalidTransition {
                current,
                action: "confirm",
            })?;
        if handle.is_expired(Utc::now()) {
            return self.expire(session).await;
        }
        Ok(Confirmation::Pending(handle))
    }

    async fn apply_client_result(
        &self,
        session: &mut CheckoutSession,
        result: ClientResult,
    ) -> Result<CheckoutOutcome> {
        let ambiguous = match result {
            ClientResult::Succeeded => false,
            ClientResult::Unknown => true,
            ClientResult::Declined { reason } => {
                self.fail_session(session, ErrorClass::GatewayRejected, &reason)
                    .await?;
                return Err(CheckoutError::PaymentDeclined { reason });
            }
        };
        self.record(session, CheckoutEvent::client_confirmed(ambiguous))
            .await?;
        self.drive_finalize(session).await
    }

    /// Settlement, order materialization and cart clear, in that order.
    async fn drive_finalize(&self, session: &mut CheckoutSession) -> Result<CheckoutOutcome> {
        let session_id = session.id();
        let handle = session
            .authorization()
            .cloned()
            .ok_or(CheckoutError::InvalidTransition {
                current: session.state(),
                action: "finalize",
            })?;

        let settlement = match session.settlement().cloned() {
            Some(settlement) => settlement,
            None => {
                let result = retry_with_backoff(
                    &self.config.settlement_retry,
                    "server_confirm",
                    GatewayError::is_transient,
                    || self.gateway.server_confirm(&handle),
                )
                .await;

                match result {
                    Ok(SettlementResult::Settled(settlement)) => settlement,
                    Ok(SettlementResult::Declined { reason })
                    | Err(GatewayError::Declined { reason }) => {
                        self.fail_session(session, ErrorClass::GatewayRejected, &reason)
                            .await?;
                        return Err(CheckoutError::PaymentDeclined { reason });
                    }
                    Err(GatewayError::Expired { .. }) => return self.expire(session).await,
                    Err(e) => {
                        self.escalate(
                            session,
                            ErrorClass::GatewayAmbiguous,
                            format!("settlement unresolved: {e}"),
                        )
                        .await?;
                        return Err(CheckoutError::SettlementUnresolved { session_id });
                    }
                }
            }
        };

        if settlement.amount != session.amount_due() {
            self.escalate(
                session,
                ErrorClass::IntegrityViolation,
                format!(
                    "settled {} but {} was due",
                    settlement.amount,
                    session.amount_due()
                ),
            )
            .await?;
            return Err(CheckoutError::SettlementMismatch {
                expected: session.amount_due(),
                settled: settlement.amount,
            });
        }
        if session.settlement().is_none() {
            self.record(
                session,
                CheckoutEvent::settlement_confirmed(settlement.clone()),
            )
            .await?;
        }

        let created = retry_with_backoff(
            &self.config.materialization_retry,
            "create_order",
            MaterializerError::is_transient,
            || {
                self.materializer.create_order(
                    session_id,
                    session.snapshot(),
                    &settlement,
                    session.delivery_address(),
                )
            },
        )
        .await;
        let order_id = match created {
            Ok(order_id) => order_id,
            Err(e) => {
                tracing::error!(%session_id, error = %e, "payment captured but order not materialized");
                self.escalate(
                    session,
                    ErrorClass::IntegrityViolation,
                    format!("order not materialized: {e}"),
                )
                .await?;
                return Ok(CheckoutOutcome::PaymentCapturedOrderPending { session_id });
            }
        };

        self.record(session, CheckoutEvent::order_committed(order_id))
            .await?;
        let duration = (Utc::now() - session.started_at()).num_milliseconds() as f64 / 1000.0;
        metrics::counter!("checkout_committed_total").increment(1);
        metrics::histogram!("checkout_duration_seconds").record(duration);
        tracing::info!(%session_id, %order_id, amount = %session.amount_due(), "checkout committed");

        let cart_cleared = self.clear_cart(session).await?;
        Ok(CheckoutOutcome::Committed {
            session_id,
            order_id,
            cart_cleared,
        })
    }

    /// Removes the purchased lines from the customer's durable cart. Only
    /// called once the session is Committed.
    ///
    /// Quantities added after the snapshot was taken stay in the cart.
    async fn clear_cart(&self, session: &mut CheckoutSession) -> Result<bool> {
        let owner = CartOwner::Customer(session.customer_id());
        let purchased = session.snapshot().items().to_vec();
        let cleared = retry_with_backoff(
            &self.config.cart_clear_retry,
            "clear_cart",
            CartError::is_recoverable,
            || self.carts.subtract(&owner, &purchased),
        )
        .await;

        match cleared {
            Ok(_) => {
                self.record(session, CheckoutEvent::cart_cleared()).await?;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id(), error = %e, "cart not cleared after commit");
                Ok(false)
            }
        }
    }

    async fn expire<T>(&self, session: &mut CheckoutSession) -> Result<T> {
        self.fail_session(session, ErrorClass::GatewayRejected, "authorization expired")
            .await?;
        Err(CheckoutError::AuthorizationExpired)
    }

    /// Fails the session, releasing any uncaptured hold first.
    async fn fail_session(
        &self,
        session: &mut CheckoutSession,
        class: ErrorClass,
        reason: &str,
    ) -> Result<()> {
        if session.settlement().is_none()
            && let Some(handle) = session.authorization()
        {
            self.void_hold(session.id(), handle).await;
        }
        self.record(session, CheckoutEvent::session_failed(class, reason))
            .await?;
        metrics::counter!("checkout_failed_total", "class" => class.as_str()).increment(1);
        tracing::warn!(session_id = %session.id(), %class, reason, "checkout failed");
        Ok(())
    }

    async fn abandon(&self, session: &mut CheckoutSession, reason: &str) -> Result<()> {
        let voided = match session.authorization() {
            Some(handle) => self.void_hold(session.id(), handle).await,
            None => true,
        };
        self.record(session, CheckoutEvent::session_abandoned(reason, voided))
            .await?;
        metrics::counter!("checkout_abandoned_total").increment(1);
        tracing::info!(session_id = %session.id(), reason, voided, "checkout abandoned");
        Ok(())
    }

    async fn escalate(
        &self,
        session: &mut CheckoutSession,
        class: ErrorClass,
        reason: String,
    ) -> Result<()> {
        tracing::error!(session_id = %session.id(), %class, %reason, "session escalated for reconciliation");
        self.record(session, CheckoutEvent::escalated(class, reason))
            .await?;
        metrics::counter!("checkout_escalations_total", "class" => class.as_str()).increment(1);
        Ok(())
    }

    /// Best-effort void. Returns false if the gateway refused.
    async fn void_hold(&self, session_id: SessionId, handle: &AuthorizationHandle) -> bool {
        match self.gateway.void(handle).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%session_id, handle_id = %handle.id, error = %e, "failed to void authorization");
                false
            }
        }
    }

    /// Appends one event at the session's version and applies it.
    async fn record(&self, session: &mut CheckoutSession, event: CheckoutEvent) -> Result<()> {
        let version = self
            .sessions
            .append(session.id(), session.version(), vec![event.clone()])
            .await?;
        session.apply(event);
        session.set_version(version);
        Ok(())
    }
}

fn committed_outcome(session: &CheckoutSession) -> Result<CheckoutOutcome> {
    let order_id = session
        .order_id()
        .ok_or_else(|| SessionStoreError::Corrupted {
            session_id: session.id(),
            reason: "committed without an order".to_string(),
        })?;
    Ok(CheckoutOutcome::Committed {
        session_id: session.id(),
        order_id,
        cart_cleared: session.cart_cleared(),
    })
}

#[cfg(test)]
mod tests {
    use cart::{AddItem, InMemoryDurableCartStore, Money};
    use futures_util::future::join_all;

    use super::*;
    use crate::services::{
        DeliveryAddress, InMemoryAddressBook, InMemoryOrderMaterializer, InMemoryPaymentGateway,
        InMemoryPriceCatalog,
    };
    use crate::store::InMemorySessionStore;

    type TestOrchestrator = CheckoutOrchestrator<
        InMemoryDurableCartStore,
        InMemoryPriceCatalog,
        InMemoryPaymentGateway,
        InMemoryOrderMaterializer,
        InMemoryAddressBook,
        InMemorySessionStore,
    >;

    fn orchestrator(
        carts: InMemoryDurableCartStore,
        addresses: InMemoryAddressBook,
    ) -> TestOrchestrator {
        CheckoutOrchestrator::with_config(
            carts,
            InMemoryPriceCatalog::with_prices([("sku1", Money::from_cents(1000))]),
            InMemoryPaymentGateway::new(),
            InMemoryOrderMaterializer::new(),
            addresses,
            InMemorySessionStore::new(),
            CheckoutConfig::default().without_backoff(),
        )
    }

    fn tracked_customers(orchestrator: &TestOrchestrator) -> usize {
        orchestrator
            .customer_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn ready_customer(
        carts: &InMemoryDurableCartStore,
        addresses: &InMemoryAddressBook,
    ) -> CustomerId {
        let customer_id = CustomerId::new();
        addresses.set_default_address(
            customer_id,
            DeliveryAddress::new("Ada Lovelace", "1 Main St", "Springfield", "12345", "US"),
        );
        carts
            .add(
                &CartOwner::Customer(customer_id),
                AddItem::new("sku1", 1, Money::from_cents(1000)),
            )
            .await
            .unwrap();
        customer_id
    }

    #[tokio::test]
    async fn customer_locks_are_released_after_use() {
        let carts = InMemoryDurableCartStore::new();
        let addresses = InMemoryAddressBook::new();
        let orchestrator = orchestrator(carts.clone(), addresses.clone());

        for _ in 0..5 {
            let customer_id = ready_customer(&carts, &addresses).await;
            let session = orchestrator
                .begin_checkout(BeginCheckout::new(CartOwner::Customer(customer_id)))
                .await
                .unwrap();
            orchestrator.cancel(session.id()).await.unwrap();
        }

        assert_eq!(tracked_customers(&orchestrator), 0);
    }

    #[tokio::test]
    async fn contended_customer_lock_is_released_by_last_holder() {
        let carts = InMemoryDurableCartStore::new();
        let addresses = InMemoryAddressBook::new();
        let orchestrator = orchestrator(carts.clone(), addresses.clone());
        let customer_id = ready_customer(&carts, &addresses).await;

        let begins = (0..4).map(|_| {
            orchestrator.begin_checkout(BeginCheckout::new(CartOwner::Customer(customer_id)))
        });
        let sessions: Vec<_> = join_all(begins)
            .await
            .into_iter()
            .map(|result| result.unwrap().id())
            .collect();

        assert!(sessions.iter().all(|id| *id == sessions[0]));
        assert_eq!(tracked_customers(&orchestrator), 0);
    }

    #[tokio::test]
    async fn failed_begin_releases_customer_lock() {
        let orchestrator =
            orchestrator(InMemoryDurableCartStore::new(), InMemoryAddressBook::new());
        let result = orchestrator
            .begin_checkout(BeginCheckout::new(CartOwner::Customer(CustomerId::new())))
            .await;

        assert!(matches!(result, Err(CheckoutError::EmptyCart)));
        assert_eq!(tracked_customers(&orchestrator), 0);
    }
}
