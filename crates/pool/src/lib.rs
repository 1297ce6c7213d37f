//! Object pools and pool-recycled collection builders.
//!
//! This crate provides allocation-avoiding containers for hot paths:
//! * `ObjectPool`: a bounded, thread-safe free list of reusable instances
//! * `PooledBuilder`: a growable sequence checked out of a shared pool
//! * `PooledHashSet` / `PooledHashMap`: hash collections with the same discipline
//! * `SpannableBuilder`: a builder exposing its backing storage as slices
//!
//! Checked-out containers are single-owner values. Dropping one (or calling
//! its consuming `free`) is the only way back into the pool, so a container
//! can never be returned twice or used after it was returned.

#![warn(missing_docs)]

pub mod builder;
pub mod hashed;
pub mod object_pool;
pub mod registry;
pub mod spannable;

pub use builder::PooledBuilder;
pub use hashed::{PooledHashMap, PooledHashSet};
pub use object_pool::{ObjectPool, PoolSpec, PoolStats, Pooled};
pub use registry::shared_pool;
pub use spannable::SpannableBuilder;

/// Default number of instances a pool retains.
pub const DEFAULT_POOL_SIZE: usize = 128;

/// Largest backing capacity a pooled container may have and still be
/// returned to its pool. Larger containers are abandoned on free.
pub const MAX_POOLED_CAPACITY: usize = 128;
