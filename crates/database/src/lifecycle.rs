use crate::error::DbError;
use async_trait::async_trait;

/// Hooks the host application calls around its own lifetime.
///
/// The host calls `initialize` once during startup, before any request is
/// served, and `shutdown` once during teardown, after the last one.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Short, stable name used in logs.
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<(), DbError>;

    async fn shutdown(&self) -> Result<(), DbError>;
}
