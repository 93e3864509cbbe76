use crate::accelerate::{AcceleratedClient, CacheStore};
use crate::connection::{connect, run_migrations};
use crate::entity::Entity;
use crate::error::DbError;
use crate::lifecycle::Lifecycle;
use crate::repository::PgRepository;
use async_trait::async_trait;
use configuration::{AccelerateSettings, DatabaseSettings};
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Where the service is in its lifetime. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Ready,
    Closed,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Uninitialized => "uninitialized",
            ServiceState::Ready => "ready",
            ServiceState::Closed => "closed",
        };
        f.write_str(s)
    }
}

enum Slot {
    Uninitialized,
    Ready(PgPool),
    Closed,
}

/// The process-wide owner of the database handle.
///
/// Construct one in the application's composition root, share it behind an
/// `Arc`, and let the host drive it through `Lifecycle`. Every handle it gives
/// out (plain pool, repositories, accelerated view) is backed by the same pool
/// and, for the accelerated view, the same cache store.
pub struct DatabaseService {
    settings: DatabaseSettings,
    accelerate: AccelerateSettings,
    slot: RwLock<Slot>,
    cache: Arc<CacheStore>,
}

impl DatabaseService {
    /// Creates the service in the `Uninitialized` state. No I/O happens here.
    pub fn new(settings: DatabaseSettings, accelerate: AccelerateSettings) -> Self {
        let cache = Arc::new(CacheStore::new(accelerate.max_entries));
        Self { settings, accelerate, slot: RwLock::new(Slot::Uninitialized), cache }
    }

    pub async fn state(&self) -> ServiceState {
        match &*self.slot.read().await {
            Slot::Uninitialized => ServiceState::Uninitialized,
            Slot::Ready(_) => ServiceState::Ready,
            Slot::Closed => ServiceState::Closed,
        }
    }

    /// Opens the pool (and applies migrations when configured).
    ///
    /// A second call while ready is a no-op. Calling it after `shutdown` fails
    /// with `DbError::Closed`. On failure the service stays uninitialized.
    pub async fn initialize(&self) -> Result<(), DbError> {
        let mut slot = self.slot.write().await;
        match &*slot {
            Slot::Ready(_) => {
                tracing::warn!("Database service is already initialized; ignoring repeated initialize.");
                return Ok(());
            }
            Slot::Closed => return Err(DbError::Closed),
            Slot::Uninitialized => {}
        }

        tracing::info!(
            max_connections = self.settings.max_connections,
            lazy = self.settings.lazy,
            "Connecting to the database."
        );
        let pool = connect(&self.settings).await?;

        if self.settings.run_migrations {
            if let Err(err) = run_migrations(&pool).await {
                pool.close().await;
                return Err(err);
            }
            tracing::info!("Database migrations applied.");
        }

        *slot = Slot::Ready(pool);
        tracing::info!("Database service ready.");
        Ok(())
    }

    /// Closes the pool, waiting for checked-out connections to be returned,
    /// and drops every cached result. Repeated calls are no-ops.
    pub async fn shutdown(&self) -> Result<(), DbError> {
        let mut slot = self.slot.write().await;
        match std::mem::replace(&mut *slot, Slot::Closed) {
            Slot::Ready(pool) => {
                self.cache.invalidate_all();
                tracing::info!("Closing database connections.");
                pool.close().await;
                tracing::info!("Database service closed.");
            }
            Slot::Uninitialized => {
                tracing::debug!("Database service shut down before it was initialized.");
            }
            Slot::Closed => {
                tracing::debug!("Database service already closed.");
            }
        }
        Ok(())
    }

    /// The plain, shared pool.
    pub async fn client(&self) -> Result<PgPool, DbError> {
        match &*self.slot.read().await {
            Slot::Ready(pool) => Ok(pool.clone()),
            Slot::Uninitialized => Err(DbError::NotConnected),
            Slot::Closed => Err(DbError::Closed),
        }
    }

    /// An uncached accessor for one entity.
    pub async fn repository<E: Entity>(&self) -> Result<PgRepository<E>, DbError> {
        Ok(PgRepository::new(self.client().await?))
    }

    /// The cache-augmented view over the same pool.
    pub async fn accelerated(&self) -> Result<AcceleratedClient, DbError> {
        let pool = self.client().await?;
        Ok(AcceleratedClient::new(pool, Arc::clone(&self.cache), self.accelerate.clone()))
    }
}

impl fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseService")
            .field("max_connections", &self.settings.max_connections)
            .field("accelerate", &self.accelerate.enabled)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Lifecycle for DatabaseService {
    fn name(&self) -> &str {
        "database"
    }

    async fn initialize(&self) -> Result<(), DbError> {
        DatabaseService::initialize(self).await
    }

    async fn shutdown(&self) -> Result<(), DbError> {
        DatabaseService::shutdown(self).await
    }
}
