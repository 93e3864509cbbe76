//! # Strata Database Crate
//!
//! This crate owns the application's single handle to PostgreSQL and everything
//! that reads through it.
//!
//! ## Architectural Principles
//!
//! - **Explicit Singleton:** `DatabaseService` is constructed once in the composition
//!   root and driven by the host through the `Lifecycle` hooks
//!   (`Uninitialized → Ready → Closed`). There is no module-level state.
//! - **One Accessor, Every Entity:** The read operations (find-first, find-many,
//!   find-unique and their `_or_fail` forms, count, aggregate, group-by) are defined
//!   once on the `Accessor` trait and implemented generically over `Entity`.
//! - **Decorated Read Path:** `Accelerated` wraps any accessor with an in-process
//!   read cache (ttl / stale-while-revalidate, tag and global invalidation) and
//!   implements the same `Accessor` trait.
//!
//! ## Public API
//!
//! - `DatabaseService`: lifecycle, plain pool, repositories and the accelerated view.
//! - `connect`, `run_migrations`, `ping`: connection utilities.
//! - `Accessor`, `PgRepository`, `Entity`: the generic read surface.
//! - `AcceleratedClient`, `Accelerated`, `CacheStrategy`: the cached read surface.
//! - `DbError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod accelerate;
pub mod connection;
pub mod entity;
pub mod error;
pub mod lifecycle;
pub mod query;
pub mod repository;
pub mod service;
mod sql;

// Re-export the key components to create a clean, public-facing API.
pub use accelerate::{
    AccelerateInfo, AccelerateQuery, Accelerated, AcceleratedClient, CacheStatus, CacheStore, CacheStrategy,
    InvalidateInput, InvalidationReceipt,
};
pub use connection::{connect, ping, run_migrations};
pub use entity::Entity;
pub use error::DbError;
pub use lifecycle::Lifecycle;
pub use query::{
    AggregateArgs, AggregateResult, AggregateSelection, CountArgs, FindArgs, Filter, GroupByArgs, GroupRow, Op,
    OrderBy, SortOrder, UniqueWhere, Value,
};
pub use repository::{Accessor, PgRepository};
pub use service::{DatabaseService, ServiceState};
