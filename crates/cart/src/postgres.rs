use async_trait::async_trait;
use common::Version;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    CartError, CartMutation, CartOwner, CartState, OwnerMode, Result,
    observer::{CartChanged, CartPublisher},
    store::{CartStore, StoreHealth, check_owner_mode, check_replacement},
};

/// PostgreSQL-backed store for authenticated carts.
///
/// Each cart is one row holding the serialized state. Writes lock the row with
/// `SELECT ... FOR UPDATE`, so concurrent writers for one customer serialize.
#[derive(Clone)]
pub struct PostgresCartStore {
    pool: PgPool,
    publisher: CartPublisher,
}

impl PostgresCartStore {
    /// Creates a new PostgreSQL cart store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            publisher: CartPublisher::new(),
        }
    }

    /// Creates a store that notifies the given publisher.
    pub fn with_publisher(pool: PgPool, publisher: CartPublisher) -> Self {
        Self { pool, publisher }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the publisher this store notifies.
    pub fn publisher(&self) -> &CartPublisher {
        &self.publisher
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Ensures the row exists, then locks and decodes it.
    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        owner: &CartOwner,
    ) -> Result<CartState> {
        let empty = CartState::empty(owner.clone());
        sqlx::query(
            r#"
            INSERT INTO carts (owner_key, customer_id, state, version, updated_at)
            VALUES ($1, $2, $3, 0, $4)
            ON CONFLICT (owner_key) DO NOTHING
            "#,
        )
        .bind(owner.storage_key())
        .bind(owner.customer_id().map(|id| id.as_uuid()))
        .bind(serde_json::to_value(&empty)?)
        .bind(empty.last_mutated_at())
        .execute(&mut **tx)
        .await
        .map_err(classify)?;

        let row = sqlx::query("SELECT state FROM carts WHERE owner_key = $1 FOR UPDATE")
            .bind(owner.storage_key())
            .fetch_one(&mut **tx)
            .await
            .map_err(classify)?;

        let state: serde_json::Value = row.try_get("state")?;
        Ok(serde_json::from_value(state)?)
    }

    async fn write_row(tx: &mut Transaction<'_, Postgres>, state: &CartState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE carts
            SET state = $2, version = $3, updated_at = $4
            WHERE owner_key = $1
            "#,
        )
        .bind(state.owner().storage_key())
        .bind(serde_json::to_value(state)?)
        .bind(state.version().as_i64())
        .bind(state.last_mutated_at())
        .execute(&mut **tx)
        .await
        .map_err(classify)?;
        Ok(())
    }
}

/// Maps connectivity failures to `StoreUnavailable`.
fn classify(e: sqlx::Error) -> CartError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            CartError::StoreUnavailable(e.to_string())
        }
        other => CartError::Database(other),
    }
}

#[async_trait]
impl CartStore for PostgresCartStore {
    fn mode(&self) -> OwnerMode {
        OwnerMode::Authenticated
    }

    async fn health(&self) -> StoreHealth {
        match sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(_) => StoreHealth::Available,
            Err(e) => StoreHealth::Unavailable(e.to_string()),
        }
    }

    async fn load(&self, owner: &CartOwner) -> Result<CartState> {
        check_owner_mode(self.mode(), owner)?;

        let row = sqlx::query("SELECT state FROM carts WHERE owner_key = $1")
            .bind(owner.storage_key())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        match row {
            Some(row) => {
                let state: serde_json::Value = row.try_get("state")?;
                Ok(serde_json::from_value(state)?)
            }
            None => Ok(CartState::empty(owner.clone())),
        }
    }

    #[tracing::instrument(skip(self, mutation), fields(kind = mutation.kind()))]
    async fn mutate(&self, owner: &CartOwner, mutation: CartMutation) -> Result<CartState> {
        check_owner_mode(self.mode(), owner)?;

        let mut tx = self.pool.begin().await.map_err(classify)?;
        let mut state = Self::lock_row(&mut tx, owner).await?;

        let changed = state.apply(&mutation)?;
        if changed {
            let next = state.version().next();
            state.stamp(next);
            Self::write_row(&mut tx, &state).await?;
        }
        tx.commit().await.map_err(classify)?;

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
        mut state: CartState,
    ) -> Result<CartState> {
        check_owner_mode(self.mode(), owner)?;
        check_replacement(owner, &state)?;

        let mut tx = self.pool.begin().await.map_err(classify)?;
        let current = Self::lock_row(&mut tx, owner).await?;

        if current.version() != expected {
            return Err(CartError::ConcurrencyConflict {
                owner: owner.clone(),
                expected,
                actual: current.version(),
            });
        }

        state.stamp(expected.next());
        Self::write_row(&mut tx, &state).await?;
        tx.commit().await.map_err(classify)?;

        self.publisher.publish(CartChanged::from_state(&state)).await;
        Ok(state)
    }
}
