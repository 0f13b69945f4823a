//! End-to-end checkout tests against the in-memory collaborators.

use cart::{
    AddItem, CartError, CartOwner, CartStore, CartStoreExt, InMemoryDurableCartStore, Money,
    ProductId,
};
use checkout::{
    BeginCheckout, CheckoutConfig, CheckoutError, CheckoutOrchestrator, CheckoutOutcome,
    CheckoutState, ClientResult, DeliveryAddress, ErrorClass, InMemoryAddressBook,
    InMemoryOrderMaterializer, InMemoryPaymentGateway, InMemoryPriceCatalog,
    InMemorySessionStore, PaymentMethodToken, SessionStore, SessionStoreError,
};
use chrono::Duration;
use common::{CustomerId, DeviceId, SessionId};
use futures_util::future::join_all;

type Orchestrator = CheckoutOrchestrator<
    InMemoryDurableCartStore,
    InMemoryPriceCatalog,
    InMemoryPaymentGateway,
    InMemoryOrderMaterializer,
    InMemoryAddressBook,
    InMemorySessionStore,
>;

struct Harness {
    carts: InMemoryDurableCartStore,
    catalog: InMemoryPriceCatalog,
    gateway: InMemoryPaymentGateway,
    materializer: InMemoryOrderMaterializer,
    addresses: InMemoryAddressBook,
    sessions: InMemorySessionStore,
    orchestrator: Orchestrator,
    customer_id: CustomerId,
}

impl Harness {
    fn new() -> Self {
        let carts = InMemoryDurableCartStore::new();
        let catalog = InMemoryPriceCatalog::with_prices([
            ("sku1", Money::from_cents(1000)),
            ("sku2", Money::from_cents(250)),
        ]);
        let gateway = InMemoryPaymentGateway::new();
        let materializer = InMemoryOrderMaterializer::new();
        let addresses = InMemoryAddressBook::new();
        let sessions = InMemorySessionStore::new();
        let customer_id = CustomerId::new();
        addresses.set_default_address(
            customer_id,
            DeliveryAddress::new("Ada Lovelace", "1 Main St", "Springfield", "12345", "US"),
        );

        let orchestrator = CheckoutOrchestrator::with_config(
            carts.clone(),
            catalog.clone(),
            gateway.clone(),
            materializer.clone(),
            addresses.clone(),
            sessions.clone(),
            CheckoutConfig::default().without_backoff(),
        );

        Self {
            carts,
            catalog,
            gateway,
            materializer,
            addresses,
            sessions,
            orchestrator,
            customer_id,
        }
    }

    fn owner(&self) -> CartOwner {
        CartOwner::Customer(self.customer_id)
    }

    async fn add(&self, sku: &str, qty: i64, cents: i64) {
        self.carts
            .add(&self.owner(), AddItem::new(sku, qty, Money::from_cents(cents)))
            .await
            .unwrap();
    }

    async fn begin(&self) -> checkout::Result<checkout::CheckoutSession> {
        self.orchestrator
            .begin_checkout(BeginCheckout::new(self.owner()))
            .await
    }

    async fn cart_is_empty(&self) -> bool {
        self.carts.load(&self.owner()).await.unwrap().is_empty()
    }
}

fn token() -> PaymentMethodToken {
    PaymentMethodToken::new("pm_card_visa")
}

#[tokio::test]
async fn settlement_retries_through_timeouts_and_commits_once() {
    let h = Harness::new();
    h.add("sku1", 3, 1000).await;

    let session = h.begin().await.unwrap();
    assert_eq!(session.state(), CheckoutState::AwaitingAuthorization);
    assert_eq!(session.amount_due(), Money::from_cents(3000));
    assert_eq!(session.authorization().unwrap().amount, Money::from_cents(3000));

    h.gateway.set_server_confirm_timeouts(3);
    let outcome = h
        .orchestrator
        .confirm_payment(session.id(), token())
        .await
        .unwrap();

    let CheckoutOutcome::Committed {
        order_id,
        cart_cleared,
        ..
    } = outcome
    else {
        panic!("expected commit, got {outcome:?}");
    };
    assert!(cart_cleared);
    assert_eq!(h.gateway.server_confirm_calls(), 4);
    assert_eq!(h.materializer.order_count(), 1);
    let order = h.materializer.get_order(order_id).unwrap();
    assert_eq!(order.total_amount, Money::from_cents(3000));
    assert!(h.cart_is_empty().await);

    let session = h.orchestrator.get_session(session.id()).await.unwrap();
    assert_eq!(session.state(), CheckoutState::Committed);
    assert!(!session.needs_reconciliation());
}

#[tokio::test]
async fn amount_due_is_fixed_at_snapshot() {
    let h = Harness::new();
    h.add("sku1", 3, 900).await;

    let session = h.begin().await.unwrap();
    // Price hint of 9.00 is replaced by the catalog price.
    assert_eq!(session.amount_due(), Money::from_cents(3000));

    h.add("sku2", 4, 250).await;
    h.catalog.set_price("sku1", Money::from_cents(5000));

    h.orchestrator
        .confirm_payment(session.id(), token())
        .await
        .unwrap();

    let order = h.materializer.order_for_session(session.id()).unwrap();
    assert_eq!(order.total_amount, Money::from_cents(3000));
    assert_eq!(order.line_items.len(), 1);
    assert_eq!(
        h.orchestrator
            .get_session(session.id())
            .await
            .unwrap()
            .settlement()
            .unwrap()
            .amount,
        Money::from_cents(3000)
    );

    // The line added while paying stays in the cart.
    let remaining = h.carts.list(&h.owner()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].product_id, ProductId::new("sku2"));
    assert_eq!(remaining[0].quantity, 4);
}

#[tokio::test]
async fn commit_removes_only_purchased_quantities() {
    let h = Harness::new();
    h.add("sku1", 3, 1000).await;
    let session = h.begin().await.unwrap();

    // Another tab keeps shopping while payment is in flight.
    h.add("sku1", 2, 1000).await;
    h.add("sku2", 1, 250).await;

    let outcome = h
        .orchestrator
        .confirm_payment(session.id(), token())
        .await
        .unwrap();
    assert!(matches!(outcome, CheckoutOutcome::Committed { cart_cleared: true, .. }));

    let cart = h.carts.load(&h.owner()).await.unwrap();
    assert_eq!(cart.line_count(), 2);
    assert_eq!(cart.get(&ProductId::new("sku1")).unwrap().quantity, 2);
    assert_eq!(cart.get(&ProductId::new("sku2")).unwrap().quantity, 1);
    assert_eq!(cart.total(), Money::from_cents(2250));
}

#[tokio::test]
async fn unrecorded_hold_is_voided() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    h.sessions.reject_appends_of(Some("AuthorizationCreated")).await;

    let result = h.begin().await;
    assert!(matches!(
        result,
        Err(CheckoutError::SessionStore(SessionStoreError::Unavailable(_)))
    ));
    assert_eq!(h.gateway.authorization_count(), 1);
    assert_eq!(h.gateway.void_calls(), 1);

    h.sessions.reject_appends_of(None).await;
    let session = h.begin().await.unwrap();
    assert_eq!(session.state(), CheckoutState::AwaitingAuthorization);
    assert_eq!(h.gateway.authorization_count(), 2);
    assert_eq!(h.gateway.void_calls(), 1);
    assert!(!h.gateway.is_voided(&session.authorization().unwrap().id));
}

#[tokio::test]
async fn oversized_quantity_is_rejected_before_checkout() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;

    let result = h
        .carts
        .add(
            &h.owner(),
            AddItem::new("sku1", i64::from(u32::MAX), Money::from_cents(1000)),
        )
        .await;
    assert!(matches!(result, Err(CartError::InvalidQuantity { .. })));

    let session = h.begin().await.unwrap();
    assert_eq!(session.amount_due(), Money::from_cents(1000));
}

#[tokio::test]
async fn declined_payment_keeps_cart() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    let session = h.begin().await.unwrap();
    let handle_id = session.authorization().unwrap().id.clone();

    h.gateway.set_client_decline(Some("insufficient funds"));
    let result = h.orchestrator.confirm_payment(session.id(), token()).await;

    let err = result.unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentDeclined { ref reason } if reason == "insufficient funds"));
    assert_eq!(err.class(), ErrorClass::GatewayRejected);

    let session = h.orchestrator.get_session(session.id()).await.unwrap();
    assert_eq!(session.state(), CheckoutState::Failed);
    assert_eq!(
        session.failure(),
        Some((ErrorClass::GatewayRejected, "insufficient funds"))
    );
    assert!(h.gateway.is_voided(&handle_id));
    assert!(!h.cart_is_empty().await);
    assert_eq!(h.materializer.call_count(), 0);
}

#[tokio::test]
async fn settlement_decline_fails_without_order() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    let session = h.begin().await.unwrap();

    h.gateway.set_settlement_decline(Some("risk check"));
    let result = h.orchestrator.confirm_payment(session.id(), token()).await;

    assert!(matches!(result, Err(CheckoutError::PaymentDeclined { .. })));
    assert_eq!(h.materializer.order_count(), 0);
    assert!(!h.cart_is_empty().await);
}

#[tokio::test]
async fn cancel_voids_hold_and_keeps_cart() {
    let h = Harness::new();
    h.add("sku1", 2, 1000).await;
    let session = h.begin().await.unwrap();
    let handle_id = session.authorization().unwrap().id.clone();

    let cancelled = h.orchestrator.cancel(session.id()).await.unwrap();
    assert_eq!(cancelled.state(), CheckoutState::Abandoned);
    assert!(h.gateway.is_voided(&handle_id));
    assert!(!h.cart_is_empty().await);

    // Cancelling twice is harmless.
    let again = h.orchestrator.cancel(session.id()).await.unwrap();
    assert_eq!(again.version(), cancelled.version());

    let result = h.orchestrator.confirm_payment(session.id(), token()).await;
    assert!(matches!(
        result,
        Err(CheckoutError::InvalidTransition {
            current: CheckoutState::Abandoned,
            ..
        })
    ));
}

#[tokio::test]
async fn unresolved_settlement_escalates_and_reconciles() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    let session = h.begin().await.unwrap();

    h.gateway.set_server_confirm_timeouts(100);
    let result = h.orchestrator.confirm_payment(session.id(), token()).await;
    let err = result.unwrap_err();
    assert!(matches!(err, CheckoutError::SettlementUnresolved { session_id } if session_id == session.id()));
    assert_eq!(err.class(), ErrorClass::GatewayAmbiguous);

    let stuck = h.orchestrator.get_session(session.id()).await.unwrap();
    assert_eq!(stuck.state(), CheckoutState::AwaitingServerConfirmation);
    assert!(stuck.is_escalated());
    assert!(!h.cart_is_empty().await);

    let cancel = h.orchestrator.cancel(session.id()).await;
    assert!(matches!(
        cancel,
        Err(CheckoutError::CancellationNotAllowed { .. })
    ));

    let blocked = h.begin().await;
    assert!(matches!(
        blocked,
        Err(CheckoutError::CheckoutInProgress { session_id }) if session_id == session.id()
    ));

    let pending = h.orchestrator.pending_reconciliation().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id(), session.id());

    h.gateway.set_server_confirm_timeouts(0);
    let outcome = h.orchestrator.reconcile(session.id()).await.unwrap();
    assert!(matches!(outcome, CheckoutOutcome::Committed { cart_cleared: true, .. }));
    assert_eq!(h.materializer.order_count(), 1);
    assert!(h.orchestrator.pending_reconciliation().await.unwrap().is_empty());
}

#[tokio::test]
async fn repeated_begin_reuses_open_session() {
    let h = Harness::new();
    h.add("sku1", 2, 1000).await;

    let first = h.begin().await.unwrap();
    let second = h.begin().await.unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(h.gateway.authorization_count(), 1);
    assert_eq!(h.sessions.session_count().await, 1);
}

#[tokio::test]
async fn concurrent_begins_start_one_session() {
    let h = Harness::new();
    h.add("sku1", 2, 1000).await;

    let results = join_all((0..5).map(|_| h.begin())).await;

    let ids: Vec<SessionId> = results.into_iter().map(|r| r.unwrap().id()).collect();
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(h.gateway.authorization_count(), 1);
}

#[tokio::test]
async fn changed_cart_supersedes_open_session() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    let first = h.begin().await.unwrap();
    let first_handle = first.authorization().unwrap().id.clone();

    h.add("sku2", 1, 250).await;
    let second = h.begin().await.unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(second.amount_due(), Money::from_cents(1250));
    assert!(h.gateway.is_voided(&first_handle));
    let first = h.orchestrator.get_session(first.id()).await.unwrap();
    assert_eq!(first.state(), CheckoutState::Abandoned);
}

#[tokio::test]
async fn expired_hold_fails_session() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    h.gateway.set_authorization_ttl(Duration::zero());

    let session = h.begin().await.unwrap();
    let result = h.orchestrator.confirm_payment(session.id(), token()).await;

    assert!(matches!(result, Err(CheckoutError::AuthorizationExpired)));
    assert_eq!(h.gateway.client_confirm_calls(), 0);
    let session = h.orchestrator.get_session(session.id()).await.unwrap();
    assert_eq!(session.state(), CheckoutState::Failed);
}

#[tokio::test]
async fn expired_hold_is_replaced_on_next_begin() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    h.gateway.set_authorization_ttl(Duration::zero());
    let stale = h.begin().await.unwrap();

    h.gateway.set_authorization_ttl(Duration::minutes(30));
    let fresh = h.begin().await.unwrap();

    assert_ne!(stale.id(), fresh.id());
    let stale = h.orchestrator.get_session(stale.id()).await.unwrap();
    assert_eq!(stale.state(), CheckoutState::Failed);
    assert!(!fresh.authorization_expired(chrono::Utc::now()));
}

#[tokio::test]
async fn anonymous_visitor_must_log_in() {
    let h = Harness::new();
    let result = h
        .orchestrator
        .begin_checkout(BeginCheckout::new(CartOwner::Device(DeviceId::new(
            "browser",
        ))))
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, CheckoutError::AuthenticationRequired));
    assert_eq!(err.class(), ErrorClass::Precondition);
}

#[tokio::test]
async fn preconditions_are_checked_before_authorizing() {
    let h = Harness::new();
    let err = h.begin().await.unwrap_err();
    assert!(matches!(err, CheckoutError::EmptyCart));
    assert!(!err.is_retryable());

    h.add("unlisted", 1, 100).await;
    assert!(matches!(
        h.begin().await,
        Err(CheckoutError::ProductUnavailable { product_id }) if product_id == "unlisted"
    ));

    h.carts
        .remove(&h.owner(), ProductId::new("unlisted"))
        .await
        .unwrap();
    h.add("sku1", 1, 1000).await;
    h.catalog.remove_product(&ProductId::new("sku1"));
    assert!(matches!(
        h.begin().await,
        Err(CheckoutError::ProductUnavailable { .. })
    ));

    assert_eq!(h.gateway.create_calls(), 0);
    assert_eq!(h.sessions.session_count().await, 0);
}

#[tokio::test]
async fn missing_address_prompts_for_one() {
    let h = Harness::new();
    let customer_id = CustomerId::new();
    let owner = CartOwner::Customer(customer_id);
    h.carts
        .add(&owner, AddItem::new("sku1", 1, Money::from_cents(1000)))
        .await
        .unwrap();

    let result = h
        .orchestrator
        .begin_checkout(BeginCheckout::new(owner.clone()))
        .await;
    assert!(matches!(result, Err(CheckoutError::AddressRequired { .. })));

    h.addresses.set_unavailable(true);
    h.addresses.set_default_address(
        customer_id,
        DeliveryAddress::new("Bob", "2 Side St", "Shelbyville", "54321", "US"),
    );
    let result = h
        .orchestrator
        .begin_checkout(BeginCheckout::new(owner))
        .await;
    assert!(matches!(result, Err(CheckoutError::AddressRequired { .. })));
    assert_eq!(h.sessions.session_count().await, 0);
}

#[tokio::test]
async fn durable_store_outage_is_recoverable() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    h.carts.set_available(false);

    let err = h.begin().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::RecoverableLocal);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn authorization_retries_are_bounded() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    h.gateway.fail_next_authorizations(3);

    let err = h.begin().await.unwrap_err();
    assert!(matches!(err, CheckoutError::AuthorizationUnavailable { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.gateway.create_calls(), 3);

    let failed = h
        .sessions
        .session_ids()
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let failed = h.orchestrator.get_session(failed).await.unwrap();
    assert_eq!(failed.state(), CheckoutState::Failed);

    // Two transient failures are absorbed by the retry.
    h.gateway.fail_next_authorizations(2);
    let session = h.begin().await.unwrap();
    assert_eq!(session.state(), CheckoutState::AwaitingAuthorization);
}

#[tokio::test]
async fn materializer_outage_reports_captured_payment() {
    let h = Harness::new();
    h.add("sku1", 2, 1000).await;
    let session = h.begin().await.unwrap();

    h.materializer.fail_next_calls(10);
    let outcome = h
        .orchestrator
        .confirm_payment(session.id(), token())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        CheckoutOutcome::PaymentCapturedOrderPending {
            session_id: session.id()
        }
    );
    assert!(!h.cart_is_empty().await);
    let stuck = h.orchestrator.get_session(session.id()).await.unwrap();
    assert!(stuck.is_escalated());
    assert!(stuck.settlement().is_some());

    let outcome = h.orchestrator.reconcile(session.id()).await.unwrap();
    assert!(matches!(outcome, CheckoutOutcome::Committed { cart_cleared: true, .. }));
    assert_eq!(h.materializer.order_count(), 1);
    assert_eq!(h.gateway.settlement_count(), 1);
    assert!(h.cart_is_empty().await);
}

#[tokio::test]
async fn lost_order_acknowledgement_does_not_duplicate() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    let session = h.begin().await.unwrap();

    h.materializer.lose_next_acknowledgements(1);
    let outcome = h
        .orchestrator
        .confirm_payment(session.id(), token())
        .await
        .unwrap();

    let CheckoutOutcome::Committed { order_id, .. } = outcome else {
        panic!("expected commit, got {outcome:?}");
    };
    assert_eq!(h.materializer.call_count(), 2);
    assert_eq!(h.materializer.order_count(), 1);
    assert_eq!(
        h.materializer.order_for_session(session.id()).unwrap().order_id,
        order_id
    );
}

#[tokio::test]
async fn failed_cart_clear_is_finished_by_reconcile() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    let session = h.begin().await.unwrap();

    h.carts.fail_next_writes(3);
    let outcome = h
        .orchestrator
        .confirm_payment(session.id(), token())
        .await
        .unwrap();
    assert!(matches!(outcome, CheckoutOutcome::Committed { cart_cleared: false, .. }));
    assert!(!h.cart_is_empty().await);

    let pending = h.orchestrator.pending_reconciliation().await.unwrap();
    assert_eq!(pending.len(), 1);

    let outcome = h.orchestrator.reconcile(session.id()).await.unwrap();
    assert!(matches!(outcome, CheckoutOutcome::Committed { cart_cleared: true, .. }));
    assert!(h.cart_is_empty().await);
    assert_eq!(h.materializer.order_count(), 1);
}

#[tokio::test]
async fn ambiguous_client_result_is_settled_server_side() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    let session = h.begin().await.unwrap();

    let outcome = h
        .orchestrator
        .report_client_result(session.id(), ClientResult::Unknown)
        .await
        .unwrap();

    assert!(matches!(outcome, CheckoutOutcome::Committed { .. }));
    let session = h.orchestrator.get_session(session.id()).await.unwrap();
    assert!(session.client_result_ambiguous());
    assert_eq!(h.gateway.client_confirm_calls(), 0);
}

#[tokio::test]
async fn client_confirm_timeout_is_treated_as_unknown() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    let session = h.begin().await.unwrap();

    h.gateway.set_client_confirm_timeouts(1);
    let outcome = h
        .orchestrator
        .confirm_payment(session.id(), token())
        .await
        .unwrap();

    assert!(matches!(outcome, CheckoutOutcome::Committed { .. }));
    assert_eq!(h.gateway.client_confirm_calls(), 1);
}

#[tokio::test]
async fn idempotency_key_survives_reload() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    let key = SessionId::new();
    let request = BeginCheckout::new(h.owner()).with_idempotency_key(key);

    let session = h.orchestrator.begin_checkout(request.clone()).await.unwrap();
    assert_eq!(session.id(), key);

    let first = h
        .orchestrator
        .confirm_payment(key, token())
        .await
        .unwrap();

    // After a reload the client repeats both calls.
    let resumed = h.orchestrator.begin_checkout(request).await.unwrap();
    assert_eq!(resumed.id(), key);
    assert_eq!(resumed.state(), CheckoutState::Committed);
    let second = h
        .orchestrator
        .confirm_payment(key, token())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.materializer.order_count(), 1);
    assert_eq!(h.gateway.settlement_count(), 1);
}

#[tokio::test]
async fn idempotency_key_of_another_customer_is_not_found() {
    let h = Harness::new();
    h.add("sku1", 1, 1000).await;
    let session = h.begin().await.unwrap();

    let stranger = CartOwner::Customer(CustomerId::new());
    let result = h
        .orchestrator
        .begin_checkout(BeginCheckout::new(stranger).with_idempotency_key(session.id()))
        .await;

    assert!(matches!(result, Err(CheckoutError::SessionNotFound(_))));
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = Harness::new();
    let missing = SessionId::new();

    assert!(matches!(
        h.orchestrator.get_session(missing).await,
        Err(CheckoutError::SessionNotFound(id)) if id == missing
    ));
    assert!(matches!(
        h.orchestrator.reconcile(missing).await,
        Err(CheckoutError::SessionNotFound(_))
    ));
}
