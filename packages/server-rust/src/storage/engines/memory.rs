//! In-memory [`EntityStore`] implementation backed by [`DashMap`].
//!
//! Each call waits for the configured latency before touching the maps, which
//! stands in for a round trip to a real database. The wait is raced against
//! the request context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reqscope_core::{ContextError, RequestContext};

use crate::service::domain::Entity;
use crate::storage::engine::{EntityStore, StoreError};

/// Entity storage backed by [`DashMap`].
///
/// `emails` indexes lowercase email to entity id for the uniqueness check.
/// `seq` orders listings by insertion.
pub struct MemoryEntityStore {
    entries: DashMap<String, (u64, Entity)>,
    emails: DashMap<String, String>,
    seq: AtomicU64,
    latency: Duration,
}

impl MemoryEntityStore {
    /// Creates a new, empty store whose calls take `latency` each.
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            emails: DashMap::new(),
            seq: AtomicU64::new(0),
            latency,
        }
    }

    /// One simulated round trip. Checks the context on both sides of the wait.
    async fn round_trip(&self, ctx: &RequestContext) -> Result<(), ContextError> {
        ctx.check()?;
        if !self.latency.is_zero() {
            ctx.run_until_cancelled(tokio::time::sleep(self.latency))
                .await?;
        }
        ctx.check()
    }
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn insert(&self, ctx: &RequestContext, entity: Entity) -> Result<Entity, StoreError> {
        self.round_trip(ctx).await?;

        // Lock order is always entries, then emails.
        let Entry::Vacant(id_slot) = self.entries.entry(entity.id.clone()) else {
            return Err(StoreError::DuplicateId { id: entity.id });
        };
        let Entry::Vacant(email_slot) = self.emails.entry(entity.email.to_ascii_lowercase()) else {
            return Err(StoreError::DuplicateEmail {
                email: entity.email,
            });
        };

        email_slot.insert(entity.id.clone());
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        id_slot.insert((seq, entity.clone()));
        Ok(entity)
    }

    async fn list(&self, ctx: &RequestContext) -> Result<Vec<Entity>, StoreError> {
        self.round_trip(ctx).await?;

        let mut rows: Vec<(u64, Entity)> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, entity)| entity).collect())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
