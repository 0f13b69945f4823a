use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use common::Version;
use tokio::sync::RwLock;

use crate::{
    CartError, CartMutation, CartOwner, CartState, OwnerMode, Result,
    observer::{CartChanged, CartPublisher},
    store::{CartStore, StoreHealth, check_owner_mode, check_replacement},
};

/// Carts keyed by owner, shared by both in-memory stores.
///
/// The write lock is held for the whole read-apply-write of a mutation, so
/// writes to one cart are atomic and totally ordered.
#[derive(Clone, Default)]
struct CartTable {
    carts: Arc<RwLock<HashMap<CartOwner, CartState>>>,
}

impl CartTable {
    async fn load(&self, owner: &CartOwner) -> CartState {
        self.carts
            .read()
            .await
            .get(owner)
            .cloned()
            .unwrap_or_else(|| CartState::empty(owner.clone()))
    }

    async fn mutate(&self, owner: &CartOwner, mutation: &CartMutation) -> Result<(CartState, bool)> {
        let mut carts = self.carts.write().await;
        let mut state = carts
            .get(owner)
            .cloned()
            .unwrap_or_else(|| CartState::empty(owner.clone()));

        let changed = state.apply(mutation)?;
        if changed {
            let next = state.version().next();
            state.stamp(next);
            carts.insert(owner.clone(), state.clone());
        }

        Ok((state, changed))
    }

    async fn replace(
        &self,
        owner: &CartOwner,
        expected: Version,
        mut state: CartState,
    ) -> Result<CartState> {
        let mut carts = self.carts.write().await;
        let actual = carts
            .get(owner)
            .map(CartState::version)
            .unwrap_or(Version::initial());

        if actual != expected {
            return Err(CartError::ConcurrencyConflict {
                owner: owner.clone(),
                expected,
                actual,
            });
        }

        state.stamp(expected.next());
        carts.insert(owner.clone(), state.clone());
        Ok(state)
    }

    async fn len(&self) -> usize {
        self.carts.read().await.len()
    }
}

/// Per-device cart store for anonymous visitors.
///
/// Stands in for browser or device-local storage: nothing here survives the
/// process, and no account identity is involved.
#[derive(Clone, Default)]
pub struct EphemeralCartStore {
    table: CartTable,
    publisher: CartPublisher,
    fail_on_write: Arc<AtomicBool>,
}

impl EphemeralCartStore {
    /// Creates a new empty ephemeral store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that notifies the given publisher.
    pub fn with_publisher(publisher: CartPublisher) -> Self {
        Self {
            publisher,
            ..Self::default()
        }
    }

    /// Returns the publisher this store notifies.
    pub fn publisher(&self) -> &CartPublisher {
        &self.publisher
    }

    /// Configures every write to fail, as when device storage is full.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of devices holding a cart.
    pub async fn cart_count(&self) -> usize {
        self.table.len().await
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(CartError::StoreUnavailable(
                "device storage rejected the write".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CartStore for EphemeralCartStore {
    fn mode(&self) -> OwnerMode {
        OwnerMode::Anonymous
    }

    async fn health(&self) -> StoreHealth {
        StoreHealth::Available
    }

    async fn load(&self, owner: &CartOwner) -> Result<CartState> {
        check_owner_mode(self.mode(), owner)?;
        Ok(self.table.load(owner).await)
    }

    #[tracing::instrument(skip(self, mutation), fields(kind = mutation.kind()))]
    async fn mutate(&self, owner: &CartOwner, mutation: CartMutation) -> Result<CartState> {
        check_owner_mode(self.mode(), owner)?;
        self.check_writable()?;

        let (state, changed) = self.table.mutate(owner, &mutation).await?;
        metrics::counter!("cart_mutations_total", "mode" => "anonymous", "kind" => mutation.kind())
            .increment(1);

        if changed {
            self.publisher.publish(CartChanged::from_state(&state)).await;
        }
        Ok(state)
    }

    async fn replace(
        &self,
        owner: &CartOwner,
        expected: Version,
        state: CartState,
    ) -> Result<CartState> {
        check_owner_mode(self.mode(), owner)?;
        check_replacement(owner, &state)?;
        self.check_writable()?;

        let state = self.table.replace(owner, expected, state).await?;
        self.publisher.publish(CartChanged::from_state(&state)).await;
        Ok(state)
    }
}

/// In-memory store for authenticated carts.
///
/// Behaves like the PostgreSQL store, including reachability: tests can take
/// the backing "offline" or make a number of upcoming writes fail.
#[derive(Clone, Default)]
pub struct InMemoryDurableCartStore {
    table: CartTable,
    publisher: CartPublisher,
    unavailable: Arc<AtomicBool>,
    failing_writes: Arc<AtomicU32>,
}

impl InMemoryDurableCartStore {
    /// Creates a new empty durable store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that notifies the given publisher.
    pub fn with_publisher(publisher: CartPublisher) -> Self {
        Self {
            publisher,
            ..Self::default()
        }
    }

    /// Returns the publisher this store notifies.
    pub fn publisher(&self) -> &CartPublisher {
        &self.publisher
    }

    /// Marks the backing reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail with `StoreUnavailable`.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Returns the number of customers holding a cart.
    pub async fn cart_count(&self) -> usize {
        self.table.len().await
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CartError::StoreUnavailable(
                "durable cart backing is unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_reachable()?;
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CartError::StoreUnavailable(
                "durable cart write timed out".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CartStore for InMemoryDurableCartStore {
    fn mode(&self) -> OwnerMode {
        OwnerMode::Authenticated
    }

    async fn health(&self) -> StoreHealth {
        match self.check_reachable() {
            Ok(()) => StoreHealth::Available,
            Err(e) => StoreHealth::Unavailable(e.to_string()),
        }
    }

    async fn load(&self, owner: &CartOwner) -> Result<CartState> {
        check_owner_mode(self.mode(), owner)?;
        self.check_reachable()?;
        Ok(self.table.load(owner).await)
    }

    #[tracing::instrument(skip(self, mutation), fields(kind = mutation.kind()))]
    async fn mutate(&self, owner: &CartOwner, mutation: CartMutation) -> Result<CartState> {
        check_owner_mode(self.mode(), owner)?;
        self.check_writable()?;

        let (state, changed) = self.table.mutate(owner, &mutation).await?;
        metrics::counter!("cart_mutations_total", "mode" => "authenticated", "kind" => mutation.kind())
            .increment(1);

        if changed {
            self.publisher.publish(CartChanged::from_state(&state)).await;
        }
        Ok(state)
    }

    async fn replace(
        &self,
        owner: &CartOwner,
        expected: Version,
        state: CartState,
    ) -> Result<CartState> {
        check_owner_mode(self.mode(), owner)?;
        check_replacement(owner, &state)?;
        self.check_writable()?;

        let state = self.table.replace(owner, expected, state).await?;
        self.publisher.publish(CartChanged::from_state(&state)).await;
        Ok(state)
    }
}
