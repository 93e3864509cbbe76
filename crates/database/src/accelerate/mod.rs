//! The read-cache layer over the generic accessor.
//!
//! Results are cached in-process as JSON, keyed by entity, operation and the
//! serialized arguments, and can be evicted by tag or wholesale.

pub mod client;
pub mod decorator;
pub mod store;
pub mod strategy;

pub use client::AcceleratedClient;
pub use decorator::{AccelerateQuery, Accelerated};
pub use store::{CacheStore, Lookup};
pub use strategy::{AccelerateInfo, CacheStatus, CacheStrategy, InvalidateInput, InvalidationReceipt};
