//! Append-only storage for checkout session events.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, SessionId, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::events::CheckoutEvent;
use crate::session::CheckoutSession;

/// Errors that can occur when reading or appending session events.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// Another writer appended to the session first.
    #[error(
        "Concurrency conflict for session {session_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        session_id: SessionId,
        expected: Version,
        actual: Version,
    },

    /// An event could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing refused the write. Nothing was appended.
    #[error("Session store unavailable: {0}")]
    Unavailable(String),

    /// The stored stream does not describe a valid session.
    #[error("Session {session_id} is corrupted: {reason}")]
    Corrupted { session_id: SessionId, reason: String },
}

type StoreResult<T> = std::result::Result<T, SessionStoreError>;

/// A stored event with its position in the session stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub session_id: SessionId,
    pub version: Version,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl RecordedEvent {
    /// Serializes an event at the given position.
    pub fn new(session_id: SessionId, version: Version, event: &CheckoutEvent) -> StoreResult<Self> {
        Ok(Self {
            session_id,
            version,
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(event)?,
            recorded_at: Utc::now(),
        })
    }

    /// Deserializes the stored event.
    pub fn to_event(&self) -> StoreResult<CheckoutEvent> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Storage for checkout session event streams.
///
/// Appends are compare-and-set on the stream version, so two writers racing
/// on one session cannot both succeed.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Appends events if the stream is at `expected`; returns the new version.
    async fn append(
        &self,
        session_id: SessionId,
        expected: Version,
        events: Vec<CheckoutEvent>,
    ) -> StoreResult<Version>;

    /// Returns the events of one session in version order.
    async fn events(&self, session_id: SessionId) -> StoreResult<Vec<RecordedEvent>>;

    /// Returns the sessions a customer has started, oldest first.
    async fn sessions_for_customer(&self, customer_id: CustomerId) -> StoreResult<Vec<SessionId>>;

    /// Returns every session ID, oldest first.
    async fn session_ids(&self) -> StoreResult<Vec<SessionId>>;
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn append(
        &self,
        session_id: SessionId,
        expected: Version,
        events: Vec<CheckoutEvent>,
    ) -> StoreResult<Version> {
        (**self).append(session_id, expected, events).await
    }

    async fn events(&self, session_id: SessionId) -> StoreResult<Vec<RecordedEvent>> {
        (**self).events(session_id).await
    }

    async fn sessions_for_customer(&self, customer_id: CustomerId) -> StoreResult<Vec<SessionId>> {
        (**self).sessions_for_customer(customer_id).await
    }

    async fn session_ids(&self) -> StoreResult<Vec<SessionId>> {
        (**self).session_ids().await
    }
}

/// Extension trait that rebuilds sessions from their streams.
#[async_trait]
pub trait SessionStoreExt: SessionStore {
    /// Loads a session by replaying its events. `None` if it does not exist.
    async fn load(&self, session_id: SessionId) -> StoreResult<Option<CheckoutSession>> {
        let recorded = self.events(session_id).await?;
        if recorded.is_empty() {
            return Ok(None);
        }

        let events = recorded
            .iter()
            .map(RecordedEvent::to_event)
            .collect::<StoreResult<Vec<_>>>()?;
        CheckoutSession::replay(events)
            .map(Some)
            .ok_or_else(|| SessionStoreError::Corrupted {
                session_id,
                reason: "stream does not begin with SessionStarted".to_string(),
            })
    }

    /// Loads every session a customer has started, oldest first.
    async fn load_for_customer(&self, customer_id: CustomerId) -> StoreResult<Vec<CheckoutSession>> {
        let mut sessions = Vec::new();
        for session_id in self.sessions_for_customer(customer_id).await? {
            if let Some(session) = self.load(session_id).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}

impl<T: SessionStore + ?Sized> SessionStoreExt for T {}

#[derive(Default)]
struct SessionTables {
    streams: HashMap<SessionId, Vec<RecordedEvent>>,
    by_customer: HashMap<CustomerId, Vec<SessionId>>,
    order: Vec<SessionId>,
    rejected_event_type: Option<&'static str>,
}

/// In-memory session store.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    tables: Arc<RwLock<SessionTables>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes appends that contain the given event type fail as unavailable.
    pub async fn reject_appends_of(&self, event_type: Option<&'static str>) {
        self.tables.write().await.rejected_event_type = event_type;
    }

    /// Returns the number of sessions stored.
    pub async fn session_count(&self) -> usize {
        self.tables.read().await.streams.len()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.tables
            .read()
            .await
            .streams
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append(
        &self,
        session_id: SessionId,
        expected: Version,
        events: Vec<CheckoutEvent>,
    ) -> StoreResult<Version> {
        let mut tables = self.tables.write().await;

        if let Some(rejected) = tables.rejected_event_type
            && events.iter().any(|event| event.event_type() == rejected)
        {
            return Err(SessionStoreError::Unavailable(format!(
                "{rejected} appends are rejected"
            )));
        }

        let current = tables
            .streams
            .get(&session_id)
            .and_then(|stream| stream.last())
            .map(|event| event.version)
            .unwrap_or_else(Version::initial);
        if current != expected {
            return Err(SessionStoreError::ConcurrencyConflict {
                session_id,
                expected,
                actual: current,
            });
        }

        let mut version = current;
        let mut recorded = Vec::with_capacity(events.len());
        let mut started_by = None;
        for event in &events {
            version = version.next();
            if let CheckoutEvent::SessionStarted(data) = event {
                started_by = Some(data.customer_id);
            }
            recorded.push(RecordedEvent::new(session_id, version, event)?);
        }

        if current == Version::initial() {
            tables.order.push(session_id);
        }
        if let Some(customer_id) = started_by {
            tables
                .by_customer
                .entry(customer_id)
                .or_default()
                .push(session_id);
        }
        tables
            .streams
            .entry(session_id)
            .or_default()
            .extend(recorded);

        Ok(version)
    }

    async fn events(&self, session_id: SessionId) -> StoreResult<Vec<RecordedEvent>> {
        Ok(self
            .tables
            .read()
            .await
            .streams
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn sessions_for_customer(&self, customer_id: CustomerId) -> StoreResult<Vec<SessionId>> {
        Ok(self
            .tables
            .read()
            .await
            .by_customer
            .get(&customer_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn session_ids(&self) -> StoreResult<Vec<SessionId>> {
        Ok(self.tables.read().await.order.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cart::{AddItem, CartMutation, CartOwner, CartState, Money, ProductId};

    use super::*;
    use crate::services::DeliveryAddress;
    use crate::snapshot::CartSnapshot;
    use crate::state::CheckoutState;

    fn started(session_id: SessionId, customer_id: CustomerId) -> CheckoutEvent {
        let mut cart = CartState::empty(CartOwner::Customer(customer_id));
        cart.apply(&CartMutation::Add(AddItem::new(
            "sku1",
            1,
            Money::from_cents(500),
        )))
        .unwrap();
        let prices = HashMap::from([(ProductId::new("sku1"), Money::from_cents(500))]);
        CheckoutEvent::session_started(
            session_id,
            customer_id,
            CartSnapshot::capture(&cart, &prices).unwrap(),
            "USD",
            DeliveryAddress::new("Ada", "1 Main St", "Springfield", "12345", "US"),
        )
    }

    #[tokio::test]
    async fn append_and_load() {
        let store = InMemorySessionStore::new();
        let session_id = SessionId::new();
        let customer_id = CustomerId::new();

        let version = store
            .append(session_id, Version::initial(), vec![started(session_id, customer_id)])
            .await
            .unwrap();
        assert_eq!(version, Version::new(1));

        let session = store.load(session_id).await.unwrap().unwrap();
        assert_eq!(session.state(), CheckoutState::Draft);
        assert_eq!(session.version(), Version::new(1));
        assert_eq!(
            store.sessions_for_customer(customer_id).await.unwrap(),
            vec![session_id]
        );
    }

    #[tokio::test]
    async fn stale_append_conflicts() {
        let store = InMemorySessionStore::new();
        let session_id = SessionId::new();
        store
            .append(
                session_id,
                Version::initial(),
                vec![started(session_id, CustomerId::new())],
            )
            .await
            .unwrap();

        let result = store
            .append(
                session_id,
                Version::initial(),
                vec![CheckoutEvent::cart_cleared()],
            )
            .await;

        assert!(matches!(
            result,
            Err(SessionStoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(1)
        ));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn rejected_append_leaves_stream_untouched() {
        let store = InMemorySessionStore::new();
        let session_id = SessionId::new();
        store.reject_appends_of(Some("SessionStarted")).await;

        let result = store
            .append(
                session_id,
                Version::initial(),
                vec![started(session_id, CustomerId::new())],
            )
            .await;
        assert!(matches!(result, Err(SessionStoreError::Unavailable(_))));
        assert_eq!(store.event_count().await, 0);
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn missing_session_loads_as_none() {
        let store = InMemorySessionStore::new();
        assert!(store.load(SessionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stream_without_start_is_corrupted() {
        let store = InMemorySessionStore::new();
        let session_id = SessionId::new();
        store
            .append(
                session_id,
                Version::initial(),
                vec![CheckoutEvent::cart_cleared()],
            )
            .await
            .unwrap();

        assert!(matches!(
            store.load(session_id).await,
            Err(SessionStoreError::Corrupted { .. })
        ));
    }
}
