use crate::accelerate::decorator::Accelerated;
use crate::accelerate::store::CacheStore;
use crate::accelerate::strategy::{InvalidateInput, InvalidationReceipt};
use crate::entity::Entity;
use crate::error::DbError;
use crate::repository::PgRepository;
use configuration::AccelerateSettings;
use sqlx::PgPool;
use std::sync::Arc;

/// The cache-augmented view of the database handle.
///
/// It shares the service's pool and the service's single cache store; cloning
/// it or asking the service for another view never opens new connections.
#[derive(Clone)]
pub struct AcceleratedClient {
    pool: PgPool,
    store: Arc<CacheStore>,
    settings: AccelerateSettings,
}

impl AcceleratedClient {
    pub fn new(pool: PgPool, store: Arc<CacheStore>, settings: AccelerateSettings) -> Self {
        Self { pool, store, settings }
    }

    /// The underlying pool, identical to the plain handle.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// A cached accessor for one entity.
    pub fn repository<E: Entity>(&self) -> Accelerated<E, PgRepository<E>> {
        Accelerated::new(PgRepository::new(self.pool.clone()), Arc::clone(&self.store), &self.settings)
    }

    /// Evicts every cached result tagged with one of `input.tags`.
    pub fn invalidate(&self, input: InvalidateInput) -> Result<InvalidationReceipt, DbError> {
        self.store.invalidate(&input)
    }

    /// Evicts every cached result.
    pub fn invalidate_all(&self) -> InvalidationReceipt {
        self.store.invalidate_all()
    }
}

impl std::fmt::Debug for AcceleratedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceleratedClient")
            .field("enabled", &self.settings.enabled)
            .field("cached_entries", &self.store.len())
            .finish()
    }
}
