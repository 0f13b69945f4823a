//! Folding an anonymous cart into a customer's cart at login.

use common::{CustomerId, DeviceId};

use crate::{CartError, CartOwner, CartState, CartStore, Result};

/// Default number of compare-and-set attempts against the durable cart.
pub const DEFAULT_MERGE_ATTEMPTS: u32 = 3;

/// How a merge ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    /// The device cart was empty; nothing was written.
    NothingToMerge,

    /// The device cart's lines were folded in.
    Merged { lines: usize },

    /// This device cart had already been merged by an earlier attempt.
    AlreadyApplied,
}

/// Result of a merge: the customer's cart afterwards and what happened.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub cart: CartState,
    pub status: MergeStatus,
}

/// Merges ephemeral carts into durable carts.
///
/// Running the same merge twice never double-counts: the durable cart records
/// a token for every device cart it absorbed. If clearing the device cart fails
/// after the durable write, the durable write is rolled back so the user can
/// simply log in again.
pub struct CartMerger<E, D> {
    ephemeral: E,
    durable: D,
    max_attempts: u32,
}

impl<E, D> CartMerger<E, D>
where
    E: CartStore,
    D: CartStore,
{
    /// Creates a merger over the two stores.
    pub fn new(ephemeral: E, durable: D) -> Self {
        Self {
            ephemeral,
            durable,
            max_attempts: DEFAULT_MERGE_ATTEMPTS,
        }
    }

    /// Sets how many times a lost compare-and-set is retried.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Returns the ephemeral store.
    pub fn ephemeral(&self) -> &E {
        &self.ephemeral
    }

    /// Returns the durable store.
    pub fn durable(&self) -> &D {
        &self.durable
    }

    /// Merges the device's cart into the customer's cart and empties the device cart.
    #[tracing::instrument(skip(self))]
    pub async fn merge(&self, device: &DeviceId, customer: CustomerId) -> Result<MergeOutcome> {
        let device_owner = CartOwner::Device(device.clone());
        let customer_owner = CartOwner::Customer(customer);

        let source = self.ephemeral.load(&device_owner).await?;
        if source.is_empty() {
            let cart = self.durable.load(&customer_owner).await?;
            return Ok(MergeOutcome {
                cart,
                status: MergeStatus::NothingToMerge,
            });
        }

        let token = source.merge_token();
        let mut attempt = 0;
        let (previous, cart, lines) = loop {
            attempt += 1;
            let current = self.durable.load(&customer_owner).await?;

            if current.has_merged(&token) {
                tracing::info!("device cart already merged");
                self.clear_source(&device_owner, &source).await?;
                metrics::counter!("cart_merges_total", "status" => "already_applied").increment(1);
                return Ok(MergeOutcome {
                    cart: current,
                    status: MergeStatus::AlreadyApplied,
                });
            }

            let mut merged = current.clone();
            let lines = merged.merge_from(&source);

            match self
                .durable
                .replace(&customer_owner, current.version(), merged)
                .await
            {
                Ok(cart) => break (current, cart, lines),
                Err(CartError::ConcurrencyConflict { .. }) if attempt < self.max_attempts => {
                    tracing::debug!(attempt, "durable cart changed during merge, retrying");
                }
                Err(e) => return Err(e),
            }
        };

        if let Err(e) = self.clear_source(&device_owner, &source).await {
            tracing::warn!(error = %e, "failed to clear device cart, rolling back merge");
            if let Err(rollback) = self
                .durable
                .replace(&customer_owner, cart.version(), previous)
                .await
            {
                tracing::error!(
                    error = %rollback,
                    "merge rollback failed, merge token left in place"
                );
            }
            metrics::counter!("cart_merges_total", "status" => "failed").increment(1);
            return Err(e);
        }

        metrics::counter!("cart_merges_total", "status" => "merged").increment(1);
        tracing::info!(lines, version = %cart.version(), "device cart merged");
        Ok(MergeOutcome {
            cart,
            status: MergeStatus::Merged { lines },
        })
    }

    async fn clear_source(&self, owner: &CartOwner, source: &CartState) -> Result<()> {
        self.ephemeral
            .replace(owner, source.version(), source.emptied())
            .await?;
        Ok(())
    }
}
