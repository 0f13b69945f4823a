//! Change notification for cart observers.
//!
//! Stores publish a [`CartChanged`] after every write that altered a cart's
//! contents. Observers may see notifications late, but never out of version
//! order for the same owner.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::Version;
use tokio::sync::RwLock;

use crate::{CartOwner, CartState, Money};

/// Notification emitted after a cart changed.
#[derive(Debug, Clone)]
pub struct CartChanged {
    /// Whose cart changed.
    pub owner: CartOwner,

    /// Version after the change.
    pub version: Version,

    /// Sum of quantities after the change.
    pub item_count: u32,

    /// Total after the change.
    pub total: Money,

    /// Full cart after the change.
    pub state: CartState,
}

impl CartChanged {
    /// Builds a notification from the resulting cart state.
    pub fn from_state(state: &CartState) -> Self {
        Self {
            owner: state.owner().clone(),
            version: state.version(),
            item_count: state.item_count(),
            total: state.total(),
            state: state.clone(),
        }
    }
}

/// Receives cart change notifications.
#[async_trait]
pub trait CartObserver: Send + Sync {
    /// Returns the observer name used in logs.
    fn name(&self) -> &'static str;

    /// Handles a change notification.
    async fn on_cart_changed(&self, change: &CartChanged);
}

/// Fan-out of change notifications to registered observers.
#[derive(Clone, Default)]
pub struct CartPublisher {
    observers: Arc<RwLock<Vec<Arc<dyn CartObserver>>>>,
}

impl CartPublisher {
    /// Creates a publisher with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer.
    pub async fn register(&self, observer: Arc<dyn CartObserver>) {
        tracing::debug!(observer = observer.name(), "registered cart observer");
        self.observers.write().await.push(observer);
    }

    /// Returns the number of registered observers.
    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// Delivers a notification to every observer, in registration order.
    pub async fn publish(&self, change: CartChanged) {
        let observers = self.observers.read().await.clone();
        for observer in observers {
            observer.on_cart_changed(&change).await;
        }
    }
}

/// Observer keeping the item count shown on a cart badge.
///
/// Notifications older than the last one seen for an owner are ignored, so a
/// late delivery never rolls the badge back.
#[derive(Default)]
pub struct ItemCountBadge {
    counts: RwLock<HashMap<CartOwner, (Version, u32)>>,
}

impl ItemCountBadge {
    /// Creates an empty badge tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last item count seen for an owner.
    pub async fn count(&self, owner: &CartOwner) -> u32 {
        self.counts
            .read()
            .await
            .get(owner)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}

#[async_trait]
impl CartObserver for ItemCountBadge {
    fn name(&self) -> &'static str {
        "ItemCountBadge"
    }

    async fn on_cart_changed(&self, change: &CartChanged) {
        let mut counts = self.counts.write().await;
        let entry = counts
            .entry(change.owner.clone())
            .or_insert((Version::initial(), 0));
        if change.version > entry.0 {
            *entry = (change.version, change.item_count);
        }
    }
}
